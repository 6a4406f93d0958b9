//! End-to-end localization scenarios

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{sync_channel, SyncSender};
use std::sync::Arc;

use ptmrs_core::activation::Activation;
use ptmrs_core::ion_series::{base_types, fragments, Composition, Kind};
use ptmrs_core::mass::Tolerance;
use ptmrs_core::modification::{Definition, ModificationRegistry};
use ptmrs_core::peptide::Peptide;
use ptmrs_core::pipeline::{DataSource, Fetched, Pipeline, Progress};
use ptmrs_core::psm::{Candidate, Item, Package, Psm};
use ptmrs_core::record::Record;
use ptmrs_core::scoring::{Scorer, ScoringError};
use ptmrs_core::settings::{Builder, Settings};
use ptmrs_core::spectrum::Peak;

fn registry() -> ModificationRegistry {
    ModificationRegistry::from_definitions(vec![
        Definition {
            id: 1,
            name: Some("Phospho".into()),
            mass: 79.9663,
            targets: vec!["S".into(), "T".into(), "Y".into()],
            ..Default::default()
        },
        Definition {
            id: 2,
            name: Some("Oxidation".into()),
            mass: 15.9949,
            targets: vec!["M".into()],
            ..Default::default()
        },
    ])
}

fn settings() -> Settings {
    Builder {
        fragment_tol: Some(Tolerance::Da(-0.05, 0.05)),
        ..Default::default()
    }
    .make_settings()
}

fn spectrum_of(peptide: &Peptide) -> Vec<Peak> {
    let composition: Composition = [Kind::B, Kind::Y].into_iter().collect();
    let types = base_types(composition, 1);
    fragments(peptide, &types, false)
        .iter()
        .map(|ion| Peak {
            mz: ion.mz,
            intensity: 1000.0 / ion.index as f64,
        })
        .collect()
}

fn psm(spectrum_id: usize, peptide: Peptide, peaks: Vec<Peak>) -> Psm {
    Psm {
        spectrum_id,
        peptide,
        activation: Activation::Cid,
        charge: 2,
        precursor_mz: 400.0,
        peaks,
    }
}

#[test]
fn unmodified_peptide() {
    let registry = ModificationRegistry::default();
    let settings = settings();
    let scorer = Scorer::new(&settings, &registry);
    let peptide = Peptide::unmodified(1, "AAAAA").unwrap();
    let peaks = spectrum_of(&peptide);
    assert_eq!(
        scorer.score(&psm(1, peptide, peaks)).unwrap_err(),
        ScoringError::NoModificationContained
    );
}

#[test]
fn unambiguous_oxidation() {
    let registry = registry();
    let settings = settings();
    let scorer = Scorer::new(&settings, &registry);
    let peptide = Peptide::from_modification_map(1, "AMAM", "1,1,2;3,1,2", &registry).unwrap();
    let peaks = spectrum_of(&peptide);

    let localization = scorer.score(&psm(1, peptide, peaks)).unwrap();
    assert_eq!(localization.isoforms.len(), 1);
    assert!((localization.isoforms[0].probability - 1.0).abs() < 1e-12);

    let sites = localization
        .sites
        .iter()
        .map(|s| (s.position, s.probability))
        .collect::<Vec<_>>();
    assert_eq!(sites.len(), 2);
    assert_eq!(sites[0].0, 1);
    assert_eq!(sites[1].0, 3);
    assert!(sites.iter().all(|(_, p)| (p - 1.0).abs() < 1e-12));
    assert_eq!(localization.site_strings[0].1, "M2: 100; M4: 100");
}

#[test]
fn ambiguous_phosphorylation() {
    let registry = registry();
    let settings = settings();
    let scorer = Scorer::new(&settings, &registry);

    let truth = Peptide::from_modification_map(1, "SSS", "1,1,1", &registry).unwrap();
    let reported = Peptide::from_modification_map(1, "SSS", "0,1,1", &registry).unwrap();
    let localization = scorer.score(&psm(1, reported, spectrum_of(&truth))).unwrap();

    assert_eq!(localization.isoforms.len(), 3);
    let total = localization
        .sites
        .iter()
        .map(|s| s.probability)
        .sum::<f64>();
    assert!((total - 1.0).abs() < 1e-9);
    let isoforms = localization
        .isoforms
        .iter()
        .map(|iso| iso.probability)
        .sum::<f64>();
    assert!((isoforms - 1.0).abs() < 1e-9);
}

struct Packages {
    packages: VecDeque<Package>,
    total: usize,
    fetches: Arc<AtomicUsize>,
    progress: SyncSender<Progress>,
}

impl DataSource for Packages {
    fn total_spectra(&self) -> usize {
        self.total
    }

    fn fetch(&mut self, _desired: usize) -> Result<Option<Fetched>, String> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.packages.pop_front().map(|package| Fetched {
            spectra: package.len(),
            peptides: package.iter().map(Item::peptides).sum(),
            packages: vec![package],
        }))
    }

    fn progress(&self) -> Option<SyncSender<Progress>> {
        Some(self.progress.clone())
    }
}

fn package(registry: &ModificationRegistry, ids: std::ops::Range<usize>) -> Package {
    ids.map(|id| {
        let sequence = match id % 3 {
            0 => "SSS",
            1 => "AMAM",
            _ => "AAAAA",
        };
        let map = match id % 3 {
            0 => "0,1,1",
            1 => "1,1,2;3,1,2",
            _ => "",
        };
        let peptide = Peptide::from_modification_map(id, sequence, map, registry).unwrap();
        let peaks = spectrum_of(&peptide);
        Item::Psm {
            psm: psm(id, peptide.clone(), peaks),
            candidates: vec![Candidate {
                peptide_id: id,
                peptide,
            }],
        }
    })
    .collect()
}

#[test]
fn two_packages() {
    let registry = registry();
    let settings = settings();
    let fetches = Arc::new(AtomicUsize::new(0));
    let (progress, _messages) = sync_channel(256);
    let source = Packages {
        packages: vec![package(&registry, 0..10), package(&registry, 10..25)].into(),
        total: 25,
        fetches: fetches.clone(),
        progress,
    };

    let (tx, rx) = sync_channel(8);
    let pipeline = Pipeline::new(&settings, &registry, source).unwrap();
    let (records, summary) = std::thread::scope(|s| {
        let handle = s.spawn(move || pipeline.run(tx));
        // records stream while the pipeline runs; the channel closes at the end
        let records = rx.iter().collect::<Vec<Record>>();
        (records, handle.join().unwrap().unwrap())
    });

    let mut ids = records.iter().map(Record::spectrum_id).collect::<Vec<_>>();
    ids.sort_unstable();
    assert_eq!(ids, (0..25).collect::<Vec<_>>());
    assert!(!summary.error_happened);
    assert_eq!(summary.spectra, 25);
    assert_eq!(summary.records, 25);
    // two packages, then the exhausted signal
    assert_eq!(fetches.load(Ordering::SeqCst), 3);

    for record in &records {
        match (record.spectrum_id() % 3, record) {
            (2, Record::Error { message, .. }) => assert_eq!(message, "No modification contained"),
            (1, Record::Success { peptides, .. }) => {
                assert!((peptides[0].probability - 1.0).abs() < 1e-12)
            }
            (0, Record::Success { peptides, .. }) => assert_eq!(peptides.len(), 1),
            (_, record) => panic!("unexpected record {:?}", record),
        }
    }
}
