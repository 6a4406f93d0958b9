use std::ops::AddAssign;
use std::sync::Arc;

use crate::binomial;
use crate::diagnostic::{self, Context};
use crate::ion_series::{all_ion_types, base_types, fragments, Ion, IonType};
use crate::isoform::{self, ModificationSites};
use crate::modification::{Modification, ModificationRegistry};
use crate::peptide::Peptide;
use crate::probability::{
    best_string, isoform_probabilities, site_probabilities, site_string, SiteProbability,
};
use crate::psm::{Candidate, Psm};
use crate::settings::Settings;
use crate::spectrum::PeakExtractor;

/// Recoverable, per-PSM scoring failures
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ScoringError {
    /// The peptide carries none of the scored modifications
    NoModificationContained,
    /// Placement enumeration exceeded the configured bounds
    TooManyIsoforms,
}

impl std::fmt::Display for ScoringError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScoringError::NoModificationContained => f.write_str("No modification contained"),
            ScoringError::TooManyIsoforms => f.write_str("Too many isoforms"),
        }
    }
}

impl std::error::Error for ScoringError {}

/// Matched and extracted peak counts of one isoform
#[derive(Copy, Clone, Default, Debug, PartialEq, Eq)]
pub struct MatchData {
    pub matched: u32,
    pub extracted: u32,
}

impl AddAssign for MatchData {
    fn add_assign(&mut self, rhs: Self) {
        self.matched += rhs.matched;
        self.extracted += rhs.extracted;
    }
}

/// Per-window match counts of one isoform, at every depth in
/// `[min_depth, max_depth]`
#[derive(Clone, Debug)]
struct MatchTable {
    min_depth: usize,
    windows: Vec<Vec<MatchData>>,
    /// Number of theoretical fragments generated for the isoform
    theoretical: u32,
}

impl MatchTable {
    fn build(extractor: &PeakExtractor, counts: &[u32], theoretical: u32, min: usize, max: usize) -> Self {
        let windows = (0..extractor.len())
            .map(|w| {
                let mut acc = MatchData::default();
                let mut row = Vec::with_capacity(max + 1 - min);
                for depth in 1..=max {
                    if let Some(ix) = extractor.nth_most_intense(w, depth - 1) {
                        acc += MatchData {
                            matched: counts[ix],
                            extracted: 1,
                        };
                    }
                    if depth >= min {
                        row.push(acc);
                    }
                }
                row
            })
            .collect();
        MatchTable {
            min_depth: min,
            windows,
            theoretical,
        }
    }

    fn get(&self, window: usize, depth: usize) -> MatchData {
        self.windows[window][depth - self.min_depth]
    }

    /// Counts summed over every window at its chosen depth
    fn total(&self, depths: &[usize]) -> MatchData {
        let mut acc = MatchData::default();
        for (w, &depth) in depths.iter().enumerate() {
            acc += self.get(w, depth);
        }
        acc
    }
}

/// Score and probability of one generated isoform
#[derive(Clone, Debug)]
pub struct IsoformScore {
    pub isoform: Peptide,
    pub score: f64,
    pub probability: f64,
}

/// Outcome of scoring one PSM
#[derive(Clone, Debug)]
pub struct Localization {
    /// Isoforms in scoring order
    pub isoforms: Vec<IsoformScore>,
    /// Scored modifications the peptide carries
    pub modifications: Vec<Arc<Modification>>,
    /// Chosen peak depth of every m/z window
    pub optimal_depths: Vec<usize>,
    pub sites: Vec<SiteProbability>,
    /// Site probability string of every scored modification
    pub site_strings: Vec<(Arc<Modification>, String)>,
    pub best: String,
    pub report: String,
}

impl Localization {
    /// The generated isoform placing the scored modifications like `candidate`
    pub fn matching(&self, candidate: &Candidate) -> Option<&IsoformScore> {
        self.isoforms
            .iter()
            .find(|iso| candidate.same_placement(&iso.isoform, &self.modifications))
    }
}

/// Pick the peak depth of one m/z window that best separates the top ranked
/// isoforms. `scores[i][d]` is the score of isoform `i` at depth `min_depth + d`.
///
/// Returns the chosen depth and every depth that separates equally well.
pub fn optimal_depth(scores: &[Vec<f64>], min_depth: usize) -> (usize, Vec<usize>) {
    let depths = scores.first().map(|s| s.len()).unwrap_or(0);
    let mut equivalent = (min_depth..min_depth + depths).collect::<Vec<_>>();

    if scores.len() <= 1 {
        let mut best = min_depth;
        let mut max = f64::NEG_INFINITY;
        for (d, &score) in scores.first().into_iter().flatten().enumerate() {
            if score > max {
                max = score;
                best = min_depth + d;
            }
        }
        return (best, equivalent);
    }

    let mut best = min_depth;
    let iterations = (scores.len() - 1).min(3);
    for rank in 1..=iterations {
        let mut max_delta = -1.0;
        let mut max_score = -1.0;
        let mut kept = Vec::with_capacity(equivalent.len());
        for &depth in &equivalent {
            let mut ranked = scores
                .iter()
                .map(|s| s[depth - min_depth])
                .collect::<Vec<_>>();
            ranked.sort_by(|a, b| b.total_cmp(a));
            let top = ranked[rank - 1];
            let delta = (top - ranked[rank]).abs();

            if delta > max_delta {
                max_delta = delta;
                max_score = top;
                best = depth;
                kept.clear();
                kept.push(depth);
            } else if (delta - max_delta).abs() <= 0.001 {
                kept.push(depth);
                if top > max_score {
                    max_score = top;
                    best = depth;
                }
            }
        }
        equivalent = kept;
        if equivalent.len() <= 1 {
            break;
        }
    }
    (best, equivalent)
}

/// Scores the positional isoforms of PSMs
pub struct Scorer<'a> {
    settings: &'a Settings,
    scored: Vec<Arc<Modification>>,
}

impl<'a> Scorer<'a> {
    pub fn new(settings: &'a Settings, registry: &ModificationRegistry) -> Self {
        Scorer {
            settings,
            scored: registry.scored().cloned().collect(),
        }
    }

    /// Random match probability of `extracted` peaks over an m/z span
    fn probability(&self, extracted: u32, lower: f64, upper: f64) -> f64 {
        let center = (lower + upper) / 2.0;
        let span = (upper - lower) * self.settings.accuracy_correction(center);
        match span > 0.0 {
            true => self.settings.fragment_tol.width(center) * extracted as f64 / span,
            false => 0.0,
        }
    }

    pub fn score(&self, psm: &Psm) -> Result<Localization, ScoringError> {
        let settings = self.settings;
        let sites = ModificationSites::collect(&psm.peptide, &self.scored);
        if sites.is_empty() {
            return Err(ScoringError::NoModificationContained);
        }
        let copies = sites.iter().map(|s| s.copies as usize).sum::<usize>();
        if settings.max_ptms > 0 && copies > settings.max_ptms {
            log::debug!(
                "spectrum {}: {} modification copies exceed the limit of {}",
                psm.spectrum_id,
                copies,
                settings.max_ptms
            );
            return Err(ScoringError::TooManyIsoforms);
        }

        let modifications = sites
            .iter()
            .map(|s| s.modification.clone())
            .collect::<Vec<_>>();
        let enumeration = isoform::enumerate(&sites, settings.max_isoforms)?;
        let stripped = psm.peptide.strip(&modifications);
        let isoforms = isoform::isoforms(&stripped, &enumeration.placements, settings.seed);

        let extractor = PeakExtractor::new(psm.peaks.clone());
        let activation = psm.activation;

        let mut notes = Vec::new();
        let isoforms = match settings.diagnostic_ions {
            true => {
                let ctx = Context {
                    extractor: &extractor,
                    activation,
                    precursor_mz: psm.precursor_mz,
                    charge: psm.charge,
                    tolerance: settings.fragment_tol,
                };
                let (kept, found) = diagnostic::prefilter(isoforms, &sites, ctx);
                notes = found;
                kept
            }
            false => isoforms,
        };

        let base = base_types(
            settings.composition(activation),
            activation.max_fragment_charge(psm.charge),
        );
        let nl_composition = settings.neutral_loss_composition(activation);
        let avoid_proline = activation.avoids_proline();
        let (min, max) = (settings.min_peak_depth, settings.max_peak_depth);

        // Match every theoretical fragment to the first peak within tolerance,
        // in descending intensity order
        let candidates = extractor.most_intense(max);
        let tables = isoforms
            .iter()
            .map(|iso| {
                let types = all_ion_types(iso, &modifications, &base, nl_composition);
                let ions = fragments(iso, &types, avoid_proline);
                let mut counts = vec![0u32; extractor.peaks().len()];
                for ion in &ions {
                    if let Some(ix) = extractor.first_match(&candidates, ion.mz, settings.fragment_tol) {
                        counts[ix] += 1;
                    }
                }
                MatchTable::build(&extractor, &counts, ions.len() as u32, min, max)
            })
            .collect::<Vec<_>>();
        let theoretical = tables.iter().map(|t| t.theoretical).max().unwrap_or(0);
        let fragments_per_window = activation.theoretical_fragments(settings.neutral_losses);

        // Per-window optimal depths
        let mut depths = Vec::with_capacity(extractor.len());
        let mut ambiguous = Vec::new();
        for (w, window) in extractor.windows().iter().enumerate() {
            let scores = tables
                .iter()
                .map(|table| {
                    (min..=max)
                        .map(|depth| {
                            let data = table.get(w, depth);
                            let p = self.probability(data.extracted, window.lower, window.upper);
                            binomial::score(p, fragments_per_window, data.matched)
                        })
                        .collect::<Vec<_>>()
                })
                .collect::<Vec<_>>();
            let (depth, equivalent) = optimal_depth(&scores, min);
            depths.push(depth);
            if equivalent.len() >= 2 {
                ambiguous.push((w, equivalent));
            }
        }

        let combined = |table: &MatchTable, depths: &[usize]| match extractor.range() {
            Some((lower, upper)) => {
                let data = table.total(depths);
                binomial::score(
                    self.probability(data.extracted, lower, upper),
                    theoretical,
                    data.matched,
                )
            }
            None => 0.0,
        };

        // Windows left with several equivalent depths are settled on the
        // whole-spectrum score, one window at a time
        for (w, equivalent) in ambiguous {
            let mut best_score = -1.0;
            let mut best_depth = depths[w];
            for table in &tables {
                for &depth in &equivalent {
                    depths[w] = depth;
                    let score = combined(table, &depths);
                    if score > best_score {
                        best_score = score;
                        best_depth = depth;
                    }
                }
            }
            depths[w] = best_depth;
        }

        let scores = tables
            .iter()
            .map(|table| combined(table, &depths))
            .collect::<Vec<_>>();
        let probabilities = isoform_probabilities(&scores);

        let isoforms = isoforms
            .into_iter()
            .zip(scores.iter().zip(&probabilities))
            .map(|(isoform, (&score, &probability))| IsoformScore {
                isoform,
                score,
                probability,
            })
            .collect::<Vec<_>>();

        let sequence = psm.peptide.sequence();
        let mut all_sites = Vec::new();
        let mut site_strings = Vec::with_capacity(sites.len());
        for (site, potential) in sites.iter().zip(&enumeration.potential) {
            let pairs = isoforms.iter().map(|iso| (&iso.isoform, iso.probability));
            let probs = site_probabilities(
                pairs,
                &site.modification,
                potential,
                settings.site_probability,
            );
            site_strings.push((
                site.modification.clone(),
                site_string(sequence.as_bytes(), &probs),
            ));
            all_sites.extend(probs);
        }

        let mut ranked = isoforms
            .iter()
            .map(|iso| (&iso.isoform, iso.score))
            .collect::<Vec<_>>();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        let best = best_string(sequence.as_bytes(), &ranked, &modifications, &all_sites);

        let mut report = notes;
        if let [(first, _), (second, _), ..] = ranked.as_slice() {
            let ions = self.site_determining_ions(
                &extractor,
                &depths,
                first,
                second,
                &modifications,
                &base,
                psm,
            );
            if !ions.is_empty() {
                report.push(format!("Site determining ions: {}", ions.join(", ")));
            }
        }

        log::trace!(
            "spectrum {}: {} isoforms, best {:?}",
            psm.spectrum_id,
            isoforms.len(),
            best
        );

        Ok(Localization {
            isoforms,
            modifications,
            optimal_depths: depths,
            sites: all_sites,
            site_strings,
            best,
            report: report.join("; "),
        })
    }

    /// Fragment ions of `first` matched at the optimal depths that `second`
    /// does not match
    #[allow(clippy::too_many_arguments)]
    fn site_determining_ions(
        &self,
        extractor: &PeakExtractor,
        depths: &[usize],
        first: &Peptide,
        second: &Peptide,
        modifications: &[Arc<Modification>],
        base: &[IonType],
        psm: &Psm,
    ) -> Vec<String> {
        let mut peaks = depths
            .iter()
            .enumerate()
            .flat_map(|(w, &depth)| extractor.top(w, depth).iter().copied())
            .collect::<Vec<_>>();
        peaks.sort_by(|&a, &b| {
            extractor
                .peak(b)
                .intensity
                .total_cmp(&extractor.peak(a).intensity)
        });

        let nl_composition = self.settings.neutral_loss_composition(psm.activation);
        let avoid_proline = psm.activation.avoids_proline();
        let tol = self.settings.fragment_tol;

        let first_types = all_ion_types(first, modifications, base, nl_composition);
        let second_types = all_ion_types(second, modifications, base, nl_composition);
        let matched = |ions: Vec<Ion<'_>>| -> Vec<(String, f64, usize, String)> {
            ions.into_iter()
                .filter(|ion| extractor.first_match(&peaks, ion.mz, tol).is_some())
                .map(|ion| (ion.ion_type.to_string(), ion.mz, ion.index, ion.to_string()))
                .collect()
        };
        let a = matched(fragments(first, &first_types, avoid_proline));
        let b = matched(fragments(second, &second_types, avoid_proline));

        a.into_iter()
            .filter(|(ty, mz, index, _)| {
                !b.iter()
                    .any(|(t, m, i, _)| t == ty && i == index && (m - mz).abs() <= 1E-4)
            })
            .map(|(_, _, _, text)| text)
            .collect()
    }
}
