use std::cell::OnceCell;

use serde::{Deserialize, Serialize};

use crate::mass::Tolerance;

/// A centroided fragment peak
#[derive(PartialEq, PartialOrd, Copy, Clone, Default, Debug, Serialize, Deserialize)]
pub struct Peak {
    pub mz: f64,
    pub intensity: f64,
}

/// Half-open m/z interval `[lower, upper)` holding the indices of its peaks
#[derive(Debug)]
pub struct Window {
    pub lower: f64,
    pub upper: f64,
    peaks: Vec<usize>,
    // Peak indices by descending intensity, computed on first use
    ranked: OnceCell<Vec<usize>>,
}

impl Window {
    fn new(lower: f64, upper: f64) -> Self {
        Window {
            lower,
            upper,
            peaks: Vec::new(),
            ranked: OnceCell::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.peaks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peaks.is_empty()
    }

    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }
}

/// Partitions a peak list into contiguous fixed-width m/z windows and
/// provides intensity-ranked subsets of each window
#[derive(Debug)]
pub struct PeakExtractor {
    peaks: Vec<Peak>,
    windows: Vec<Window>,
}

impl PeakExtractor {
    pub const WINDOW_WIDTH: f64 = 100.0;
    pub const START_MZ: f64 = 50.0;

    pub fn new(peaks: Vec<Peak>) -> Self {
        Self::with_windows(peaks, Self::START_MZ, Self::WINDOW_WIDTH)
    }

    /// Build windows of `width` starting at `start`. Peaks below `start` are
    /// discarded; the first window is the one holding the first retained peak.
    pub fn with_windows(mut peaks: Vec<Peak>, start: f64, width: f64) -> Self {
        peaks.retain(|p| p.mz >= start && p.mz.is_finite());
        peaks.sort_by(|a, b| a.mz.total_cmp(&b.mz));

        let mut windows: Vec<Window> = Vec::new();
        if let Some(first) = peaks.first() {
            let offset = ((first.mz - start) / width).floor();
            let lower = start + width * offset;
            windows.push(Window::new(lower, lower + width));
        }

        for (ix, peak) in peaks.iter().enumerate() {
            // Open empty windows until the peak fits, keeping bounds contiguous
            while let Some(window) = windows.last() {
                if peak.mz < window.upper {
                    break;
                }
                let lower = window.upper;
                windows.push(Window::new(lower, lower + width));
            }
            if let Some(window) = windows.last_mut() {
                window.peaks.push(ix);
            }
        }

        PeakExtractor { peaks, windows }
    }

    pub fn peaks(&self) -> &[Peak] {
        &self.peaks
    }

    pub fn peak(&self, ix: usize) -> &Peak {
        &self.peaks[ix]
    }

    pub fn windows(&self) -> &[Window] {
        &self.windows
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Lower bound of the first window and upper bound of the last
    pub fn range(&self) -> Option<(f64, f64)> {
        match (self.windows.first(), self.windows.last()) {
            (Some(first), Some(last)) => Some((first.lower, last.upper)),
            _ => None,
        }
    }

    pub fn bounds(&self, window: usize) -> Option<(f64, f64)> {
        self.windows.get(window).map(|w| (w.lower, w.upper))
    }

    fn ranked<'w>(&self, window: &'w Window) -> &'w [usize] {
        window.ranked.get_or_init(|| {
            let mut ranked = window.peaks.clone();
            ranked.sort_by(|&a, &b| {
                self.peaks[b]
                    .intensity
                    .total_cmp(&self.peaks[a].intensity)
                    .then(a.cmp(&b))
            });
            ranked
        })
    }

    /// Indices of the `depth` most intense peaks of one window (all of them
    /// if the window holds fewer)
    pub fn top(&self, window: usize, depth: usize) -> &[usize] {
        match self.windows.get(window) {
            Some(w) => {
                let ranked = self.ranked(w);
                &ranked[..depth.min(ranked.len())]
            }
            None => &[],
        }
    }

    /// Index of the `n`-th most intense peak of a window, counting from 0
    pub fn nth_most_intense(&self, window: usize, n: usize) -> Option<usize> {
        self.windows
            .get(window)
            .and_then(|w| self.ranked(w).get(n).copied())
    }

    /// Union of every window's top-`depth` peaks, by descending intensity
    pub fn most_intense(&self, depth: usize) -> Vec<usize> {
        let mut peaks = (0..self.windows.len())
            .flat_map(|w| self.top(w, depth).iter().copied())
            .collect::<Vec<_>>();
        peaks.sort_by(|&a, &b| {
            self.peaks[b]
                .intensity
                .total_cmp(&self.peaks[a].intensity)
                .then(a.cmp(&b))
        });
        peaks
    }

    /// First peak of `candidates` (in order) within tolerance of `mz`
    pub fn first_match(&self, candidates: &[usize], mz: f64, tolerance: Tolerance) -> Option<usize> {
        let (lo, hi) = tolerance.bounds(mz);
        candidates
            .iter()
            .copied()
            .find(|&ix| self.peaks[ix].mz >= lo && self.peaks[ix].mz <= hi)
    }
}
