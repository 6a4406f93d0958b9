use serde::Serialize;

use crate::psm::{Candidate, Item, Psm};
use crate::scoring::{Localization, Scorer, ScoringError};

/// Score of one input candidate peptide
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PeptideScore {
    pub peptide_id: usize,
    pub score: f64,
    pub probability: f64,
}

/// Result emitted for every processed PSM
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Record {
    Error {
        sequence_id: usize,
        spectrum_id: usize,
        message: String,
        peptide_ids: Vec<usize>,
    },
    Success {
        sequence_id: usize,
        spectrum_id: usize,
        sequence: String,
        /// (modification label, site probability string)
        site_probabilities: Vec<(String, String)>,
        best: String,
        report: String,
        peptides: Vec<PeptideScore>,
    },
}

impl Record {
    pub fn success(psm: &Psm, candidates: &[Candidate], localization: &Localization) -> Self {
        let peptides = candidates
            .iter()
            .map(|candidate| {
                let (score, probability) = localization
                    .matching(candidate)
                    .map(|iso| (iso.score, iso.probability))
                    .unwrap_or((0.0, 0.0));
                PeptideScore {
                    peptide_id: candidate.peptide_id,
                    score,
                    probability,
                }
            })
            .collect();

        Record::Success {
            sequence_id: psm.peptide.id,
            spectrum_id: psm.spectrum_id,
            sequence: psm.peptide.sequence(),
            site_probabilities: localization
                .site_strings
                .iter()
                .map(|(m, s)| (m.label().to_string(), s.clone()))
                .collect(),
            best: localization.best.clone(),
            report: localization.report.clone(),
            peptides,
        }
    }

    pub fn failure(psm: &Psm, candidates: &[Candidate], error: ScoringError) -> Self {
        Record::Error {
            sequence_id: psm.peptide.id,
            spectrum_id: psm.spectrum_id,
            message: error.to_string(),
            peptide_ids: candidates.iter().map(|c| c.peptide_id).collect(),
        }
    }

    /// Score one package item. Items without any candidate peptide produce
    /// no record.
    pub fn from_item(scorer: &Scorer<'_>, item: &Item) -> Option<Self> {
        let record = match item {
            Item::Psm { psm, candidates } => match scorer.score(psm) {
                Ok(localization) => Record::success(psm, candidates, &localization),
                Err(error) => Record::failure(psm, candidates, error),
            },
            Item::Error { message, .. } => Record::interrupted(item, message.clone()),
        };
        match record.peptides() {
            0 => None,
            _ => Some(record),
        }
    }

    /// Error record carrying the identity of `item`
    pub fn interrupted(item: &Item, message: String) -> Self {
        match item {
            Item::Psm { psm, candidates } => Record::Error {
                sequence_id: psm.peptide.id,
                spectrum_id: psm.spectrum_id,
                message,
                peptide_ids: candidates.iter().map(|c| c.peptide_id).collect(),
            },
            Item::Error {
                sequence_id,
                spectrum_id,
                peptide_ids,
                ..
            } => Record::Error {
                sequence_id: *sequence_id,
                spectrum_id: *spectrum_id,
                message,
                peptide_ids: peptide_ids.clone(),
            },
        }
    }

    pub fn spectrum_id(&self) -> usize {
        match self {
            Record::Error { spectrum_id, .. } | Record::Success { spectrum_id, .. } => *spectrum_id,
        }
    }

    pub fn sequence_id(&self) -> usize {
        match self {
            Record::Error { sequence_id, .. } | Record::Success { sequence_id, .. } => *sequence_id,
        }
    }

    /// Number of peptides the record reports on
    pub fn peptides(&self) -> usize {
        match self {
            Record::Error { peptide_ids, .. } => peptide_ids.len(),
            Record::Success { peptides, .. } => peptides.len(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Record::Error { .. })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::activation::Activation;
    use crate::modification::{Definition, ModificationRegistry};
    use crate::peptide::Peptide;
    use crate::settings::Settings;

    fn registry() -> ModificationRegistry {
        ModificationRegistry::from_definitions(vec![Definition {
            id: 1,
            name: Some("Phospho".into()),
            mass: 79.966331,
            targets: vec!["S".into()],
            ..Default::default()
        }])
    }

    fn item(peptides: Vec<Peptide>) -> Item {
        let psm = Psm {
            spectrum_id: 3,
            peptide: peptides[0].clone(),
            activation: Activation::Cid,
            charge: 2,
            precursor_mz: 200.0,
            peaks: vec![],
        };
        let candidates = peptides
            .into_iter()
            .map(|peptide| Candidate {
                peptide_id: peptide.id,
                peptide,
            })
            .collect();
        Item::Psm { psm, candidates }
    }

    #[test]
    fn success_lists_every_candidate() {
        let registry = registry();
        let settings = Settings::default();
        let scorer = Scorer::new(&settings, &registry);

        let a = Peptide::from_modification_map(11, "SAS", "0,1,1", &registry).unwrap();
        let b = Peptide::from_modification_map(12, "SAS", "2,1,1", &registry).unwrap();
        let record = Record::from_item(&scorer, &item(vec![a, b])).unwrap();
        match &record {
            Record::Success {
                sequence_id,
                sequence,
                site_probabilities,
                best,
                peptides,
                ..
            } => {
                assert_eq!(*sequence_id, 11);
                assert_eq!(sequence, "SAS");
                assert_eq!(site_probabilities[0].0, "Phospho");
                assert_eq!(best, "Inconclusive data");
                assert_eq!(
                    peptides.iter().map(|p| p.peptide_id).collect::<Vec<_>>(),
                    vec![11, 12]
                );
                assert!(peptides.iter().all(|p| (p.probability - 0.5).abs() < 1e-12));
            }
            Record::Error { .. } => panic!("expected a success record"),
        }
        assert_eq!(record.spectrum_id(), 3);
        assert!(!record.is_error());
    }

    #[test]
    fn errors() {
        let registry = registry();
        let settings = Settings::default();
        let scorer = Scorer::new(&settings, &registry);

        let plain = Peptide::unmodified(5, "AAAAA").unwrap();
        let record = Record::from_item(&scorer, &item(vec![plain])).unwrap();
        assert_eq!(
            record,
            Record::Error {
                sequence_id: 5,
                spectrum_id: 3,
                message: "No modification contained".into(),
                peptide_ids: vec![5],
            }
        );

        let forwarded = Item::Error {
            sequence_id: 1,
            spectrum_id: 2,
            message: "unreadable spectrum".into(),
            peptide_ids: vec![],
        };
        assert!(Record::from_item(&scorer, &forwarded).is_none());
    }
}
