use ptmrs_cli::input::Input;
use ptmrs_cli::runner::Runner;
use ptmrs_core::ion_series::{base_types, fragments, Composition, Kind};
use ptmrs_core::modification::{Definition, ModificationRegistry};
use ptmrs_core::peptide::Peptide;
use serde_json::json;

fn modifications() -> serde_json::Value {
    json!([
        { "id": 1, "name": "Phospho", "mass": 79.966331, "targets": ["S", "T", "Y"] },
        { "id": 2, "name": "Oxidation", "mass": 15.994915, "targets": ["M"] }
    ])
}

fn peaks(sequence: &str, map: &str) -> anyhow::Result<serde_json::Value> {
    let definitions: Vec<Definition> = serde_json::from_value(modifications())?;
    let registry = ModificationRegistry::from_definitions(definitions);
    let peptide = Peptide::from_modification_map(0, sequence, map, &registry)?;
    let composition: Composition = [Kind::B, Kind::Y].into_iter().collect();
    let types = base_types(composition, 1);
    Ok(fragments(&peptide, &types, false)
        .iter()
        .map(|ion| json!({ "mz": ion.mz, "intensity": 1000.0 / ion.index as f64 }))
        .collect())
}

#[test]
fn integration() -> anyhow::Result<()> {
    let dir = std::env::temp_dir().join(format!("ptmrs-cli-{}", std::process::id()));
    std::fs::create_dir_all(&dir)?;

    let psms = json!([
        {
            "spectrum_id": 1, "activation": "CID", "charge": 2, "precursor_mz": 250.0,
            "peaks": peaks("AMAM", "1,1,2;3,1,2")?,
            "candidates": [
                { "peptide_id": 100, "sequence": "AMAM", "modifications": "1,1,2;3,1,2" }
            ]
        },
        {
            "spectrum_id": 2, "activation": "CID", "charge": 2, "precursor_mz": 180.0,
            "peaks": peaks("SSS", "1,1,1")?,
            "candidates": [
                { "peptide_id": 200, "sequence": "SSS", "modifications": "0,1,1" },
                { "peptide_id": 201, "sequence": "SSS", "modifications": "1,1,1", "rank": 1 }
            ]
        },
        {
            "spectrum_id": 3, "activation": "HCD", "charge": 2, "precursor_mz": 200.0,
            "peaks": [],
            "candidates": [{ "peptide_id": 300, "sequence": "AAAAA" }]
        }
    ]);
    let psm_path = dir.join("psms.json");
    std::fs::write(&psm_path, serde_json::to_vec(&psms)?)?;

    let parameters = json!({
        "settings": { "fragment_tol": { "da": [-0.05, 0.05] } },
        "modifications": modifications(),
        "psm_paths": [psm_path.display().to_string()],
        "output_directory": dir.join("out").display().to_string(),
    });
    let parameter_path = dir.join("parameters.json");
    std::fs::write(&parameter_path, serde_json::to_vec(&parameters)?)?;

    let input = Input::load(parameter_path.display().to_string())?;
    let runner = input.build().and_then(Runner::new)?;
    let summary = runner.run()?;
    assert!(!summary.error_happened);
    assert_eq!(summary.spectra, 3);
    assert_eq!(summary.records, 3);

    let localizations = std::fs::read_to_string(dir.join("out").join("localizations.tsv"))?;
    let rows = localizations.lines().collect::<Vec<_>>();
    // header, one row for AMAM, two for the SSS candidates
    assert_eq!(rows.len(), 4);
    assert!(rows[0].starts_with("spectrum_id\tsequence_id\tsequence\tpeptide_id"));
    assert!(rows[1].starts_with("1\t100\tAMAM\t100\t"));
    assert!(rows[1].contains("Oxidation: M2: 100; M4: 100"));
    // the best ranked candidate represents the isoform group
    assert!(rows[2].starts_with("2\t200\tSSS\t200\t"));
    assert!(rows[3].starts_with("2\t200\tSSS\t201\t"));

    let errors = std::fs::read_to_string(dir.join("out").join("errors.tsv"))?;
    let rows = errors.lines().collect::<Vec<_>>();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1], "3\t300\t300\tNo modification contained");

    let results: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(dir.join("out").join("results.json"))?)?;
    assert_eq!(results["output_paths"].as_array().map(Vec::len), Some(3));

    std::fs::remove_dir_all(&dir)?;
    Ok(())
}
