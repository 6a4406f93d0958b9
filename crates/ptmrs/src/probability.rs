//! Isoform and site probabilities, and their textual forms

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::modification::Modification;
use crate::peptide::Peptide;

/// Score gap (`-10·log10(0.8)`) within which isoform groups are reported in
/// the best localization string
pub const BEST_SCORE_MARGIN: f64 = 0.969_100_130_080_564;

/// How multiplicities are aggregated into site probabilities
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Probability that a residue carries at least `n` copies
    #[default]
    AtLeast,
    /// Probability that a residue carries exactly `n` copies, divided by `n`
    Exactly,
}

/// `10^(score/10)`
pub fn reciprocal(score: f64) -> f64 {
    10f64.powf(score / 10.0)
}

/// Normalize scores into a probability distribution over isoforms.
///
/// Reciprocal scores are taken relative to the best score, which leaves the
/// ratios unchanged and keeps large scores finite.
pub fn isoform_probabilities(scores: &[f64]) -> Vec<f64> {
    let best = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !best.is_finite() {
        return vec![0.0; scores.len()];
    }
    let reciprocals = scores
        .iter()
        .map(|s| reciprocal(s - best))
        .collect::<Vec<_>>();
    let total = reciprocals.iter().sum::<f64>();
    reciprocals.into_iter().map(|r| r / total).collect()
}

#[derive(Clone, Debug)]
pub struct SiteProbability {
    /// Zero-based residue index
    pub position: usize,
    pub copies: u8,
    pub modification: Arc<Modification>,
    pub probability: f64,
}

/// Marginal probabilities for every potential (position, copies) pair of one
/// modification, given isoforms and their probabilities
pub fn site_probabilities<'a, I>(
    isoforms: I,
    modification: &Arc<Modification>,
    potential: &[(usize, u8)],
    mode: Mode,
) -> Vec<SiteProbability>
where
    I: IntoIterator<Item = (&'a Peptide, f64)> + Clone,
{
    potential
        .iter()
        .map(|&(position, copies)| {
            let total = isoforms
                .clone()
                .into_iter()
                .filter(|(iso, _)| match mode {
                    Mode::AtLeast => iso.has_at_least(position, copies, modification),
                    Mode::Exactly => iso.has_exactly(position, copies, modification),
                })
                .map(|(_, p)| p)
                .sum::<f64>();
            let probability = match mode {
                Mode::AtLeast => total,
                Mode::Exactly => total / copies.max(1) as f64,
            };
            SiteProbability {
                position,
                copies,
                modification: modification.clone(),
                probability,
            }
        })
        .collect()
}

/// Percentage with at most two decimals
fn percent(p: f64) -> f64 {
    ((p * 100.0).max(0.0) * 100.0).round() / 100.0
}

fn residue(sequence: &[u8], position: usize) -> char {
    sequence.get(position).map(|&c| c as char).unwrap_or('?')
}

/// `S3: 99.5; T5: 0.5`, or with multiplicities `K4(1x): 80; K4(min 2x): 20`
pub fn site_string(sequence: &[u8], sites: &[SiteProbability]) -> String {
    let mut sorted = sites.iter().collect::<Vec<_>>();
    sorted.sort_by_key(|s| (s.position, s.copies));

    let mut entries = Vec::with_capacity(sorted.len());
    for group in sorted.chunk_by(|a, b| a.position == b.position) {
        let max = group.iter().map(|s| s.copies).max().unwrap_or(1);
        for s in group {
            let aa = residue(sequence, s.position);
            let pct = percent(s.probability);
            let entry = match (max <= 1, s.copies == max) {
                (true, _) => format!("{}{}: {}", aa, s.position + 1, pct),
                (false, true) => format!("{}{}({}x): {}", aa, s.position + 1, s.copies, pct),
                (false, false) => format!("{}{}(min {}x): {}", aa, s.position + 1, s.copies, pct),
            };
            entries.push(entry);
        }
    }
    entries.join("; ")
}

/// Localization string for the best supported isoforms.
///
/// `ranked` holds every scored isoform with its score, best first. For each
/// modification, isoforms are grouped by where they place it; groups scoring
/// within [`BEST_SCORE_MARGIN`] of the best isoform contribute their
/// representative. The site probabilities realized by those representatives
/// are printed as `S3(Phospho): 99.5`, reduced by the probability of a higher
/// multiplicity at the same residue that was not selected.
pub fn best_string(
    sequence: &[u8],
    ranked: &[(&Peptide, f64)],
    modifications: &[Arc<Modification>],
    sites: &[SiteProbability],
) -> String {
    if ranked.iter().map(|(_, s)| s).sum::<f64>() == 0.0 {
        return "Inconclusive data".into();
    }
    let best = ranked
        .iter()
        .map(|(_, s)| *s)
        .fold(f64::NEG_INFINITY, f64::max);

    let mut representatives: Vec<&Peptide> = Vec::new();
    for m in modifications {
        let mut groups: Vec<(Vec<(usize, u8)>, &Peptide, f64)> = Vec::new();
        for &(iso, score) in ranked {
            let key = iso.positions_of(m);
            match groups.iter_mut().find(|(k, _, _)| *k == key) {
                Some((_, _, max)) => *max = max.max(score),
                None => groups.push((key, iso, score)),
            }
        }
        representatives.extend(
            groups
                .into_iter()
                .filter(|(_, _, max)| best - max <= BEST_SCORE_MARGIN)
                .map(|(_, iso, _)| iso),
        );
    }

    let realized = |s: &SiteProbability| {
        representatives
            .iter()
            .any(|iso| iso.has_exactly(s.position, s.copies, &s.modification))
    };
    let mut selected = sites.iter().filter(|s| realized(s)).collect::<Vec<_>>();
    let mut others = sites.iter().filter(|s| !realized(s)).collect::<Vec<_>>();
    selected.sort_by_key(|s| (s.position, s.copies));
    others.sort_by_key(|s| s.copies);

    let mut entries = Vec::with_capacity(selected.len());
    for at_position in selected.chunk_by(|a, b| a.position == b.position) {
        let mut seen: Vec<&Arc<Modification>> = Vec::new();
        for s in at_position {
            if seen.iter().any(|m| Arc::ptr_eq(m, &s.modification)) {
                continue;
            }
            seen.push(&s.modification);
            let group = at_position
                .iter()
                .filter(|o| Arc::ptr_eq(&o.modification, &s.modification))
                .collect::<Vec<_>>();
            let max = group.iter().map(|o| o.copies).max().unwrap_or(1);
            for p in group {
                let higher = others
                    .iter()
                    .find(|o| {
                        o.position == p.position
                            && o.copies > p.copies
                            && *o.modification == *p.modification
                    })
                    .map(|o| o.probability)
                    .unwrap_or(0.0);
                let label = p.modification.label();
                let site = match (max <= 1, p.copies == max) {
                    (true, _) => label.to_string(),
                    (false, true) => format!("{}x{}", p.copies, label),
                    (false, false) => format!("min {}x{}", p.copies, label),
                };
                entries.push(format!(
                    "{}{}({}): {}",
                    residue(sequence, p.position),
                    p.position + 1,
                    site,
                    percent(p.probability - higher)
                ));
            }
        }
    }
    entries.join("; ")
}
