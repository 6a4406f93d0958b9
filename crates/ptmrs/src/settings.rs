use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};

use crate::activation::Activation;
use crate::ion_series::Composition;
use crate::mass::Tolerance;
use crate::probability::Mode;

/// Per-activation override of the fragment ion families
#[derive(Deserialize, Serialize, Default, Clone, Copy, Debug, PartialEq)]
pub struct CompositionOverride {
    /// Fragment ion families that are matched
    pub fragments: Option<Composition>,
    /// Fragment ion families that receive neutral-loss variants
    pub neutral_losses: Option<Composition>,
}

#[derive(Deserialize, Default, Clone, Debug)]
/// User-facing scoring parameters; every field is optional
pub struct Builder {
    /// Fragment matching tolerance
    pub fragment_tol: Option<Tolerance>,
    /// Smallest number of most intense peaks per window considered
    pub min_peak_depth: Option<usize>,
    /// Largest number of most intense peaks per window considered
    pub max_peak_depth: Option<usize>,
    /// Maximum number of isoforms per spectrum, 0 for no limit
    pub max_isoforms: Option<usize>,
    /// Maximum number of scored modification copies per peptide, 0 for no limit
    pub max_ptms: Option<usize>,
    /// -1: random isoform order, -2: enumeration order, otherwise seeded
    pub seed: Option<i64>,
    /// Filter isoforms using diagnostic ions
    pub diagnostic_ions: Option<bool>,
    pub site_probability: Option<Mode>,
    /// Score neutral loss peaks: `true`, `false`, or unset to let the
    /// activation type decide
    pub neutral_losses: Option<bool>,
    pub mass_accuracy_correction: Option<bool>,
    pub compositions: Option<FnvHashMap<Activation, CompositionOverride>>,
    /// Number of worker tasks, defaults to the number of cores
    pub max_tasks: Option<usize>,
}

impl Builder {
    pub fn make_settings(self) -> Settings {
        let fragment_tol = validate_tolerance(self.fragment_tol.unwrap_or_default());

        let mut min_peak_depth = self.min_peak_depth.unwrap_or(2).max(1);
        let mut max_peak_depth = self.max_peak_depth.unwrap_or(8).max(1);
        if min_peak_depth > max_peak_depth {
            log::warn!(
                "min_peak_depth ({}) > max_peak_depth ({}), swapping",
                min_peak_depth,
                max_peak_depth
            );
            std::mem::swap(&mut min_peak_depth, &mut max_peak_depth);
        }

        let seed = match self.seed.unwrap_or(-2) {
            s if s < -2 => {
                log::warn!("seed {} is not valid, isoforms will not be shuffled", s);
                -2
            }
            s => s,
        };

        Settings {
            fragment_tol,
            min_peak_depth,
            max_peak_depth,
            max_isoforms: self.max_isoforms.unwrap_or(200),
            max_ptms: self.max_ptms.unwrap_or(10),
            seed,
            diagnostic_ions: self.diagnostic_ions.unwrap_or(false),
            site_probability: self.site_probability.unwrap_or_default(),
            neutral_losses: self.neutral_losses,
            mass_accuracy_correction: self.mass_accuracy_correction.unwrap_or(false),
            compositions: self.compositions.unwrap_or_default(),
            max_tasks: self.max_tasks.filter(|&n| n > 0),
        }
    }
}

fn validate_tolerance(tol: Tolerance) -> Tolerance {
    let tol = match tol {
        Tolerance::Da(lo, hi) if lo > hi => {
            log::warn!("fragment tolerance bounds are inverted: ({}, {})", lo, hi);
            Tolerance::Da(hi, lo)
        }
        Tolerance::Ppm(lo, hi) if lo > hi => {
            log::warn!("fragment tolerance bounds are inverted: ({}, {})", lo, hi);
            Tolerance::Ppm(hi, lo)
        }
        tol => tol,
    };
    match tol {
        Tolerance::Da(lo, hi) if hi - lo > 2.0 => {
            log::warn!("fragment tolerance of {} Da is very wide", hi - lo)
        }
        Tolerance::Ppm(lo, hi) if hi - lo > 200.0 => {
            log::warn!("fragment tolerance of {} ppm is very wide", hi - lo)
        }
        Tolerance::Da(lo, hi) | Tolerance::Ppm(lo, hi) if hi - lo <= 0.0 => {
            log::error!("fragment tolerance has zero width: no fragment can match")
        }
        _ => {}
    }
    tol
}

#[derive(Serialize, Clone, Debug)]
/// Validated scoring parameters
pub struct Settings {
    pub fragment_tol: Tolerance,
    pub min_peak_depth: usize,
    pub max_peak_depth: usize,
    pub max_isoforms: usize,
    pub max_ptms: usize,
    pub seed: i64,
    pub diagnostic_ions: bool,
    pub site_probability: Mode,
    pub neutral_losses: Option<bool>,
    pub mass_accuracy_correction: bool,
    pub compositions: FnvHashMap<Activation, CompositionOverride>,
    pub max_tasks: Option<usize>,
}

impl Default for Settings {
    fn default() -> Self {
        Builder::default().make_settings()
    }
}

impl Settings {
    /// Fragment ion families matched for spectra of this activation type
    pub fn composition(&self, activation: Activation) -> Composition {
        self.compositions
            .get(&activation)
            .and_then(|c| c.fragments)
            .unwrap_or_else(|| activation.default_composition())
    }

    /// Fragment ion families that receive neutral-loss variants
    pub fn neutral_loss_composition(&self, activation: Activation) -> Composition {
        let configured = self.compositions.get(&activation).and_then(|c| c.neutral_losses);
        activation.neutral_loss_composition(self.neutral_losses, configured)
    }

    /// Correction of the random match denominator for narrow tolerances:
    /// `min(1, 8 · window width)` when enabled, else 1
    pub fn accuracy_correction(&self, mz: f64) -> f64 {
        match self.mass_accuracy_correction {
            true => (8.0 * self.fragment_tol.width(mz)).min(1.0),
            false => 1.0,
        }
    }
}
