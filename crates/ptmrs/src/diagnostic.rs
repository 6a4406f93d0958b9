use serde::{Deserialize, Serialize};

use crate::activation::Activation;
use crate::isoform::ModificationSites;
use crate::mass::{Tolerance, PROTON};
use crate::modification::Modification;
use crate::peptide::Peptide;
use crate::spectrum::PeakExtractor;

/// What the diagnostic peak is measured relative to
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relativity {
    /// Offset from the singly charged precursor, which must itself be observed
    #[default]
    ExistingPrecursor,
    /// Offset from the singly charged precursor
    Precursor,
    /// Absolute m/z of an immonium ion
    Immonium,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Evidence {
    Report,
    Factor,
    Target,
    TargetAndFactor,
}

/// A peak whose presence testifies to a number of modification copies
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiagnosticIon {
    pub name: String,
    pub mass: f64,
    /// Number of most intense peaks per window searched for evidence
    pub peak_depth: usize,
    #[serde(default)]
    pub relativity: Relativity,
    /// Residue multiplicities the evidence supports
    #[serde(default)]
    pub factors: Vec<u8>,
    /// Residues the evidence supports
    #[serde(default)]
    pub targets: Vec<char>,
    /// Only consider spectra acquired with this activation
    #[serde(default)]
    pub activation: Option<Activation>,
}

impl DiagnosticIon {
    pub fn evidence(&self) -> Evidence {
        match (self.factors.is_empty(), self.targets.is_empty()) {
            (true, true) => Evidence::Report,
            (false, true) => Evidence::Factor,
            (true, false) => Evidence::Target,
            (false, false) => Evidence::TargetAndFactor,
        }
    }

    pub fn applies_to(&self, activation: Activation) -> bool {
        self.activation.map(|a| a == activation).unwrap_or(true)
    }

    fn min_factor(&self) -> u32 {
        self.factors.iter().copied().min().unwrap_or(1).max(1) as u32
    }

    /// Highest number of copies evidenced by the spectrum, 0 if none
    pub fn detect(
        &self,
        extractor: &PeakExtractor,
        precursor_mz: f64,
        charge: u8,
        copies: u32,
        tolerance: Tolerance,
    ) -> u32 {
        let candidates = extractor.most_intense(self.peak_depth);
        let present = |mz: f64| extractor.first_match(&candidates, mz, tolerance).is_some();

        let n = match self.relativity {
            Relativity::Immonium => 1,
            _ => copies / self.min_factor(),
        };
        let base = match self.relativity {
            Relativity::Immonium => 0.0,
            _ => {
                let z = charge.max(1) as f64;
                precursor_mz * z - (z - 1.0) * PROTON
            }
        };

        if self.relativity == Relativity::ExistingPrecursor && !present(base) {
            return 0;
        }
        (1..=n)
            .filter(|&i| present(base + i as f64 * self.mass))
            .max()
            .unwrap_or(0)
    }

    pub fn note(&self, n: u32) -> String {
        let join = |v: &[String]| v.join(",");
        let factors = self.factors.iter().map(|f| f.to_string()).collect::<Vec<_>>();
        let targets = self.targets.iter().map(|t| t.to_string()).collect::<Vec<_>>();
        match self.evidence() {
            Evidence::Report => format!("{}x{}:Report", n, self.name),
            Evidence::Factor => format!("{}x{}:Filter, factor {}", n, self.name, join(&factors)),
            Evidence::Target => format!("{}x{}:Filter, target {}", n, self.name, join(&targets)),
            Evidence::TargetAndFactor => format!(
                "{}x{}:Filter, factor {} and target {}",
                n,
                self.name,
                join(&factors),
                join(&targets)
            ),
        }
    }

    /// Does `isoform` carry `m` on at least `n` residues matching the evidence?
    pub fn supports(&self, isoform: &Peptide, m: &Modification, n: u32) -> bool {
        let factor = |copies: u8| self.factors.contains(&copies);
        let target = |pos: usize| {
            let residue = isoform.residues()[pos].code() as char;
            self.targets.iter().any(|t| t.eq_ignore_ascii_case(&residue))
        };
        let count = isoform
            .positions_of(m)
            .into_iter()
            .filter(|&(pos, copies)| match self.evidence() {
                Evidence::Report => true,
                Evidence::Factor => factor(copies),
                Evidence::Target => target(pos),
                Evidence::TargetAndFactor => factor(copies) && target(pos),
            })
            .count();
        count as u32 >= n
    }
}

/// Spectrum context needed to locate diagnostic peaks
#[derive(Copy, Clone, Debug)]
pub struct Context<'a> {
    pub extractor: &'a PeakExtractor,
    pub activation: Activation,
    pub precursor_mz: f64,
    pub charge: u8,
    pub tolerance: Tolerance,
}

/// Remove isoforms contradicted by diagnostic-ion evidence. Returns the
/// surviving isoforms and one note per diagnostic ion that was observed.
///
/// A filter that would discard every remaining isoform is noted but not applied.
pub fn prefilter(
    mut isoforms: Vec<Peptide>,
    sites: &[ModificationSites],
    ctx: Context<'_>,
) -> (Vec<Peptide>, Vec<String>) {
    let mut notes = Vec::new();
    for site in sites {
        for ion in site
            .modification
            .diagnostic_ions
            .iter()
            .filter(|ion| ion.applies_to(ctx.activation))
        {
            let n = ion.detect(
                ctx.extractor,
                ctx.precursor_mz,
                ctx.charge,
                site.copies,
                ctx.tolerance,
            );
            if n == 0 {
                continue;
            }
            notes.push(ion.note(n));
            if ion.evidence() == Evidence::Report {
                continue;
            }

            let kept = isoforms
                .iter()
                .filter(|iso| ion.supports(iso, &site.modification, n))
                .count();
            if kept == 0 {
                log::debug!("{}: evidence excludes every isoform, ignoring", ion.name);
                continue;
            }
            isoforms.retain(|iso| ion.supports(iso, &site.modification, n));
        }
    }
    (isoforms, notes)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::modification::Target;
    use crate::peptide::Placement;
    use crate::spectrum::Peak;
    use std::sync::Arc;

    fn acetyl_k(ions: Vec<DiagnosticIon>) -> Arc<Modification> {
        Arc::new(
            Modification::new(
                7,
                "Acetyl",
                "Ac",
                42.010565,
                vec![
                    Target {
                        residue: b'K',
                        count: None,
                    },
                    Target {
                        residue: b'S',
                        count: None,
                    },
                ],
                vec![],
            )
            .with_diagnostic_ions(ions),
        )
    }

    fn immonium(targets: Vec<char>) -> DiagnosticIon {
        DiagnosticIon {
            name: "AcK".into(),
            mass: 126.0913,
            peak_depth: 4,
            relativity: Relativity::Immonium,
            factors: vec![],
            targets,
            activation: None,
        }
    }

    #[test]
    fn deserialize() {
        let ion: DiagnosticIon = serde_json::from_str(
            r#"{"name": "HexNAc", "mass": 203.0794, "peak_depth": 8, "factors": [1, 2],
                "relativity": "precursor", "activation": "HCD"}"#,
        )
        .unwrap();
        assert_eq!(ion.evidence(), Evidence::Factor);
        assert_eq!(ion.relativity, Relativity::Precursor);
        assert!(ion.applies_to(Activation::Hcd));
        assert!(!ion.applies_to(Activation::Cid));
        assert_eq!(ion.note(2), "2xHexNAc:Filter, factor 1,2");
        assert_eq!(immonium(vec!['K']).note(1), "1xAcK:Filter, target K");
    }

    #[test]
    fn precursor_offsets() {
        // singly charged precursor of a 2+ ion at 500.5: 1000.0 - 1.007276 + ...
        let base = 500.5 * 2.0 - PROTON;
        let extractor = PeakExtractor::new(vec![
            Peak {
                mz: base,
                intensity: 10.0,
            },
            Peak {
                mz: base + 2.0 * 80.0,
                intensity: 5.0,
            },
        ]);
        let mut ion = DiagnosticIon {
            name: "X".into(),
            mass: 80.0,
            peak_depth: 5,
            relativity: Relativity::ExistingPrecursor,
            factors: vec![1],
            targets: vec![],
            activation: None,
        };
        let tol = Tolerance::Da(-0.1, 0.1);
        assert_eq!(ion.detect(&extractor, 500.5, 2, 3, tol), 2);
        assert_eq!(ion.detect(&extractor, 500.5, 2, 1, tol), 0);

        // no precursor peak: existing precursor evidence fails, plain precursor does not
        assert_eq!(ion.detect(&extractor, 510.5, 2, 3, tol), 0);
        ion.relativity = Relativity::Precursor;
        assert_eq!(ion.detect(&extractor, 500.5 - 40.0, 2, 3, tol), 3);
    }

    #[test]
    fn target_filtering() {
        let m = acetyl_k(vec![immonium(vec!['K'])]);
        let peptide = Peptide::unmodified(1, "SAKR").unwrap();
        let isoforms = [0usize, 2]
            .iter()
            .enumerate()
            .map(|(id, &pos)| {
                let mut placement = Placement::new();
                placement.insert(pos, (1, m.clone()));
                peptide.place(id + 1, &placement)
            })
            .collect::<Vec<_>>();

        let extractor = PeakExtractor::new(vec![Peak {
            mz: 126.0913,
            intensity: 1.0,
        }]);
        let sites = vec![ModificationSites {
            modification: m.clone(),
            copies: 1,
            positions: vec![(0, 1), (2, 1)],
        }];
        let ctx = Context {
            extractor: &extractor,
            activation: Activation::Hcd,
            precursor_mz: 300.0,
            charge: 2,
            tolerance: Tolerance::Da(-0.02, 0.02),
        };
        let (kept, notes) = prefilter(isoforms.clone(), &sites, ctx);
        assert_eq!(notes, vec!["1xAcK:Filter, target K".to_string()]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, 2);

        // no evidence peak: nothing filtered
        let empty = PeakExtractor::new(vec![]);
        let (kept, notes) = prefilter(
            isoforms,
            &sites,
            Context {
                extractor: &empty,
                ..ctx
            },
        );
        assert_eq!(kept.len(), 2);
        assert!(notes.is_empty());
    }
}
