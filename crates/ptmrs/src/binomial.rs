//! Binomial match statistics, evaluated in log space with a shared, bounded
//! table of log factorials

use std::f64::consts::LN_10;
use std::sync::{OnceLock, PoisonError, RwLock};

/// Maximum number of memoized log factorials
pub const CACHE_CAPACITY: usize = 10_000;

/// `table[i] = ln(i!)`, grown on demand up to `CACHE_CAPACITY` entries
fn table() -> &'static RwLock<Vec<f64>> {
    static TABLE: OnceLock<RwLock<Vec<f64>>> = OnceLock::new();
    TABLE.get_or_init(|| RwLock::new(vec![0.0]))
}

/// Number of log factorials currently memoized
pub fn cached() -> usize {
    table().read().unwrap_or_else(PoisonError::into_inner).len()
}

/// `ln(n!)`. Values past the table are summed on from its last entry, so a
/// value is the same whether or not it was memoized.
pub fn ln_factorial(n: u32) -> f64 {
    let n = n as usize;
    if let Some(value) = table()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(n)
    {
        return *value;
    }

    let mut table = table().write().unwrap_or_else(PoisonError::into_inner);
    let limit = n.min(CACHE_CAPACITY - 1);
    while table.len() <= limit {
        let i = table.len();
        let next = table[i - 1] + (i as f64).ln();
        table.push(next);
    }
    let mut value = table[limit];
    for i in limit + 1..=n {
        value += (i as f64).ln();
    }
    value
}

/// `ln C(n, k)`, negative infinity when `k > n`
pub fn ln_coefficient(n: u32, k: u32) -> f64 {
    if k > n {
        return f64::NEG_INFINITY;
    }
    ln_factorial(n) - ln_factorial(k) - ln_factorial(n - k)
}

/// `ln(e^a + e^b)`, never smaller than either argument
fn ln_add(a: f64, b: f64) -> f64 {
    let (hi, lo) = if a >= b { (a, b) } else { (b, a) };
    if lo == f64::NEG_INFINITY {
        return hi;
    }
    hi + (lo - hi).exp().ln_1p()
}

/// `-10·log10 P(X >= matched)` for `X ~ Binomial(trials, p)`.
///
/// Returns 0 when nothing matched, when `p` is 0, or when `p >= 1` (every
/// trial matches by chance). `matched` is clamped to `trials`.
pub fn score(p: f64, trials: u32, matched: u32) -> f64 {
    if matched == 0 || trials == 0 || p <= 0.0 || p >= 1.0 || !p.is_finite() {
        return 0.0;
    }
    let matched = matched.min(trials);
    let ln_p = p.ln();
    let ln_q = (-p).ln_1p();
    let term = |i: u32| ln_coefficient(trials, i) + i as f64 * ln_p + (trials - i) as f64 * ln_q;

    // Both sums are extended one term at a time in a fixed order, so the
    // score never decreases with `matched`
    let ln_tail = if matched as f64 <= trials as f64 * p {
        // The upper tail is close to 1 here: take the complement of the
        // lower tail, accumulated from the bottom up
        let ln_lower = (0..matched).map(term).fold(f64::NEG_INFINITY, ln_add);
        (-ln_lower.exp()).ln_1p()
    } else {
        (matched..=trials)
            .rev()
            .map(term)
            .fold(f64::NEG_INFINITY, ln_add)
    };

    (-10.0 * ln_tail / LN_10).max(0.0)
}
