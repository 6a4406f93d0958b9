use std::sync::Arc;

use crate::activation::Activation;
use crate::modification::Modification;
use crate::peptide::Peptide;
use crate::spectrum::Peak;

/// A fragmentation spectrum and the peptide identified from it
#[derive(Clone, Debug)]
pub struct Psm {
    pub spectrum_id: usize,
    /// Identified peptide; its `id` is the sequence id reported in records
    pub peptide: Peptide,
    pub activation: Activation,
    pub charge: u8,
    pub precursor_mz: f64,
    pub peaks: Vec<Peak>,
}

/// A candidate peptide of the search engine that shares the PSM's sequence
/// and modification content, differing only in placement
#[derive(Clone, Debug)]
pub struct Candidate {
    pub peptide_id: usize,
    pub peptide: Peptide,
}

impl Candidate {
    /// Does this candidate place the scored modifications exactly as `isoform`?
    pub fn same_placement(&self, isoform: &Peptide, scored: &[Arc<Modification>]) -> bool {
        self.peptide.sequence() == isoform.sequence()
            && self.peptide.scored_positions(scored) == isoform.scored_positions(scored)
    }
}

/// Unit of work delivered by a data source
#[derive(Clone, Debug)]
pub enum Item {
    Psm {
        psm: Psm,
        candidates: Vec<Candidate>,
    },
    /// The data source could not build a PSM; forwarded as an error record
    Error {
        sequence_id: usize,
        spectrum_id: usize,
        message: String,
        peptide_ids: Vec<usize>,
    },
}

impl Item {
    pub fn spectrum_id(&self) -> usize {
        match self {
            Item::Psm { psm, .. } => psm.spectrum_id,
            Item::Error { spectrum_id, .. } => *spectrum_id,
        }
    }

    /// Number of candidate peptides carried
    pub fn peptides(&self) -> usize {
        match self {
            Item::Psm { candidates, .. } => candidates.len(),
            Item::Error { peptide_ids, .. } => peptide_ids.len(),
        }
    }
}

pub type Package = Vec<Item>;

/// Sorted ids of every modification copy a peptide carries, termini included
fn modification_content(peptide: &Peptide) -> Vec<u32> {
    let mut ids = peptide
        .residues()
        .iter()
        .filter_map(|r| r.modification())
        .flat_map(|(m, n)| std::iter::repeat(m.id).take(n as usize))
        .chain(peptide.nterm.modification.iter().map(|m| m.id))
        .chain(peptide.cterm.modification.iter().map(|m| m.id))
        .collect::<Vec<_>>();
    ids.sort_unstable();
    ids
}

/// Group the candidate peptides identified for one spectrum into positional
/// isoform groups: same sequence, same modification content. Candidates are
/// ordered by rank and the best ranked one represents its group.
pub fn isoform_groups(candidates: Vec<Peptide>) -> Vec<Vec<Peptide>> {
    let mut candidates = candidates;
    candidates.sort_by_key(|p| p.rank);

    let mut groups: Vec<(String, Vec<u32>, Vec<Peptide>)> = Vec::new();
    for peptide in candidates {
        let sequence = peptide.sequence();
        let content = modification_content(&peptide);
        match groups
            .iter_mut()
            .find(|(s, c, _)| *s == sequence && *c == content)
        {
            Some((_, _, group)) => group.push(peptide),
            None => groups.push((sequence, content, vec![peptide])),
        }
    }
    groups.into_iter().map(|(_, _, group)| group).collect()
}

/// Build one package item per isoform group of a spectrum
pub fn items(
    spectrum_id: usize,
    activation: Activation,
    charge: u8,
    precursor_mz: f64,
    peaks: Vec<Peak>,
    candidates: Vec<Peptide>,
) -> Vec<Item> {
    isoform_groups(candidates)
        .into_iter()
        .filter_map(|group| {
            let representative = group.first()?.clone();
            let candidates = group
                .into_iter()
                .map(|peptide| Candidate {
                    peptide_id: peptide.id,
                    peptide,
                })
                .collect();
            Some(Item::Psm {
                psm: Psm {
                    spectrum_id,
                    peptide: representative,
                    activation,
                    charge,
                    precursor_mz,
                    peaks: peaks.clone(),
                },
                candidates,
            })
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::modification::{Definition, ModificationRegistry};

    fn registry() -> ModificationRegistry {
        ModificationRegistry::from_definitions(vec![
            Definition {
                id: 1,
                name: Some("Phospho".into()),
                mass: 79.966331,
                targets: vec!["S".into(), "T".into()],
                ..Default::default()
            },
            Definition {
                id: 2,
                name: Some("Oxidation".into()),
                mass: 15.994915,
                targets: vec!["M".into()],
                ..Default::default()
            },
        ])
    }

    #[test]
    fn grouping() {
        let registry = registry();
        let peptide = |id, rank, map| {
            Peptide::from_modification_map(id, "SAMTK", map, &registry)
                .unwrap()
                .with_rank(rank)
        };
        let groups = isoform_groups(vec![
            peptide(1, 3, "3,1,1"),
            peptide(2, 1, "0,1,1"),
            peptide(3, 2, "0,1,1;2,1,2"),
            Peptide::unmodified(4, "PEPTIDE").unwrap(),
        ]);
        assert_eq!(groups.len(), 3);
        // ordered by rank within a group, best first
        let phospho = groups.iter().find(|g| g.len() == 2).unwrap();
        assert_eq!(phospho.iter().map(|p| p.id).collect::<Vec<_>>(), vec![2, 1]);
    }

    #[test]
    fn package_items() {
        let registry = registry();
        let a = Peptide::from_modification_map(10, "SAMTK", "0,1,1", &registry).unwrap();
        let b = Peptide::from_modification_map(11, "SAMTK", "3,1,1", &registry)
            .unwrap()
            .with_rank(1);
        let items = items(7, Activation::Hcd, 2, 300.0, vec![], vec![a, b.clone()]);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].spectrum_id(), 7);
        assert_eq!(items[0].peptides(), 2);

        let scored = registry.scored().cloned().collect::<Vec<_>>();
        match &items[0] {
            Item::Psm { psm, candidates } => {
                assert_eq!(psm.peptide.id, 10);
                assert!(candidates[1].same_placement(&b, &scored));
                assert!(!candidates[0].same_placement(&b, &scored));
            }
            Item::Error { .. } => panic!("expected a PSM"),
        }
    }
}
