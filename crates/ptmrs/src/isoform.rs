//! Enumeration of modification placements ("isoforms")

use std::sync::Arc;

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

use crate::modification::Modification;
use crate::peptide::{Peptide, Placement};
use crate::scoring::ScoringError;

/// Lexicographic k-of-n index combinations
pub struct Combinations {
    n: usize,
    indices: Vec<usize>,
    done: bool,
}

impl Combinations {
    pub fn new(n: usize, k: usize) -> Self {
        Combinations {
            n,
            indices: (0..k).collect(),
            done: k > n,
        }
    }
}

impl Iterator for Combinations {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let current = self.indices.clone();

        // Advance: find the rightmost index that can still move right
        let k = self.indices.len();
        let mut i = k;
        loop {
            if i == 0 {
                self.done = true;
                break;
            }
            i -= 1;
            if self.indices[i] < self.n - k + i {
                self.indices[i] += 1;
                for j in i + 1..k {
                    self.indices[j] = self.indices[j - 1] + 1;
                }
                break;
            }
        }
        Some(current)
    }
}

/// Exact binomial coefficient, saturating at `u128::MAX`
pub fn choose(n: u64, k: u64) -> u128 {
    if k > n {
        return 0;
    }
    let k = k.min(n - k);
    let mut acc: u128 = 1;
    for i in 0..k {
        // acc * (n - i) is always divisible by (i + 1)
        acc = match acc.checked_mul((n - i) as u128) {
            Some(v) => v / (i as u128 + 1),
            None => return u128::MAX,
        };
    }
    acc
}

/// Every way of distributing `total` copies over boxes with per-box upper
/// bounds, produced lazily in descending lexicographic order
pub struct MultiCombinations {
    bounds: Vec<u8>,
    counts: Vec<u8>,
    done: bool,
}

impl MultiCombinations {
    pub fn new(total: u32, bounds: Vec<u8>) -> Self {
        let capacity = bounds.iter().map(|&b| b as u32).sum::<u32>();
        let mut counts = vec![0; bounds.len()];
        let done = total > capacity;
        if !done {
            Self::fill(&bounds, &mut counts, 0, total);
        }
        MultiCombinations {
            bounds,
            counts,
            done,
        }
    }

    /// Greedily place `remaining` copies into boxes `from..`, leftmost first
    fn fill(bounds: &[u8], counts: &mut [u8], from: usize, mut remaining: u32) {
        for (count, &bound) in counts[from..].iter_mut().zip(&bounds[from..]) {
            let take = remaining.min(bound as u32);
            *count = take as u8;
            remaining -= take;
        }
    }
}

impl Iterator for MultiCombinations {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let current = self.counts.clone();

        // Move one copy from the rightmost box `i` that has room to its right,
        // then pack everything right of `i` as far left as possible
        let len = self.counts.len();
        let mut right_used = 0u32;
        let mut right_capacity = 0u32;
        let mut advanced = false;
        for i in (0..len).rev() {
            if self.counts[i] > 0 && right_capacity > right_used {
                self.counts[i] -= 1;
                Self::fill(&self.bounds, &mut self.counts, i + 1, right_used + 1);
                advanced = true;
                break;
            }
            right_used += self.counts[i] as u32;
            right_capacity += self.bounds[i] as u32;
        }
        self.done = !advanced;
        Some(current)
    }
}

/// The sites one scored modification can occupy on a candidate peptide
#[derive(Clone, Debug)]
pub struct ModificationSites {
    pub modification: Arc<Modification>,
    /// Number of copies that must be placed
    pub copies: u32,
    /// Eligible residue index and the maximum copies it can carry
    pub positions: Vec<(usize, u8)>,
}

impl ModificationSites {
    /// Sites for every scored modification `peptide` carries. Positions are
    /// the unmodified target residues once the scored modifications are
    /// removed; residues holding other modifications are not eligible.
    pub fn collect(peptide: &Peptide, scored: &[Arc<Modification>]) -> Vec<ModificationSites> {
        let stripped = peptide.strip(scored);
        scored
            .iter()
            .filter_map(|m| {
                let copies = peptide.site_count(m);
                if copies == 0 {
                    return None;
                }
                let multiple = m.allows_multiple();
                let positions = stripped
                    .eligible_positions(m)
                    .into_iter()
                    .map(|ix| {
                        let bound = match multiple {
                            true => m.max_multiplicity(stripped.residues()[ix].code()),
                            false => 1,
                        };
                        (ix, bound)
                    })
                    .collect();
                Some(ModificationSites {
                    modification: m.clone(),
                    copies,
                    positions,
                })
            })
            .collect()
    }

    /// Candidate placements of this modification alone
    fn choices(&self, cap: usize) -> Result<Vec<Vec<(usize, u8)>>, ScoringError> {
        if self.modification.allows_multiple() {
            let bounds = self.positions.iter().map(|(_, b)| *b).collect();
            let choices = MultiCombinations::new(self.copies, bounds)
                .take(cap.saturating_mul(4).saturating_add(1))
                .map(|counts| {
                    self.positions
                        .iter()
                        .zip(counts)
                        .filter(|(_, n)| *n > 0)
                        .map(|((ix, _), n)| (*ix, n))
                        .collect::<Vec<_>>()
                })
                .collect::<Vec<_>>();
            if choices.is_empty() || choices.len() > cap.saturating_mul(4) {
                return Err(ScoringError::TooManyIsoforms);
            }
            Ok(choices)
        } else {
            Ok(
                Combinations::new(self.positions.len(), self.copies as usize)
                    .map(|ixs| ixs.into_iter().map(|ix| (self.positions[ix].0, 1)).collect())
                    .collect(),
            )
        }
    }
}

/// Result of [`enumerate`]
#[derive(Clone, Debug)]
pub struct Enumeration {
    pub placements: Vec<Placement>,
    /// For each modification (in input order), every distinct
    /// (position, copies) pair any of its candidate placements uses
    pub potential: Vec<Vec<(usize, u8)>>,
}

/// Enumerate every placement satisfying all modification counts, without
/// two modifications sharing a residue.
///
/// `max_isoforms` bounds the per-modification coefficient, the running
/// product of coefficients, and the final number of placements; 0 disables
/// the bound. No more than `max_isoforms` placements are materialized.
pub fn enumerate(
    sites: &[ModificationSites],
    max_isoforms: usize,
) -> Result<Enumeration, ScoringError> {
    let cap = match max_isoforms {
        0 => usize::MAX,
        n => n,
    };

    let mut largest: u128 = 0;
    let mut product: u128 = 1;
    for site in sites {
        let n = choose(site.positions.len() as u64, site.copies as u64);
        largest = largest.max(n);
        product = product.saturating_mul(n);
        if !site.modification.allows_multiple() && (largest > cap as u128 || product > cap as u128)
        {
            return Err(ScoringError::TooManyIsoforms);
        }
    }

    let mut placements = vec![Placement::new()];
    let mut potential = Vec::with_capacity(sites.len());
    for site in sites {
        let choices = site.choices(cap)?;
        let mut used = choices.iter().flatten().copied().collect::<Vec<_>>();
        used.sort_unstable();
        used.dedup();
        potential.push(used);

        let mut next = Vec::with_capacity(placements.len() * choices.len());
        for placement in &placements {
            for choice in &choices {
                if choice.iter().any(|(ix, _)| placement.contains_key(ix)) {
                    continue;
                }
                if next.len() == cap {
                    return Err(ScoringError::TooManyIsoforms);
                }
                let mut extended = placement.clone();
                for &(ix, n) in choice {
                    extended.insert(ix, (n, site.modification.clone()));
                }
                next.push(extended);
            }
        }
        placements = next;
    }

    if placements.is_empty() {
        return Err(ScoringError::TooManyIsoforms);
    }
    Ok(Enumeration {
        placements,
        potential,
    })
}

/// Materialize isoforms with ids `1..=n`, optionally shuffled.
///
/// `seed` of -2 keeps enumeration order, -1 shuffles non-deterministically,
/// any other value seeds the shuffle.
pub fn isoforms(stripped: &Peptide, placements: &[Placement], seed: i64) -> Vec<Peptide> {
    let mut isoforms = placements
        .iter()
        .enumerate()
        .map(|(ix, p)| stripped.place(ix + 1, p))
        .collect::<Vec<_>>();

    match seed {
        -2 => {}
        -1 => isoforms.shuffle(&mut rand::thread_rng()),
        seed => isoforms.shuffle(&mut StdRng::seed_from_u64(seed as u64)),
    }
    isoforms
}
