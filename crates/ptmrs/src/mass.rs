use serde::{Deserialize, Serialize};

pub const PROTON: f64 = 1.007276452;
pub const H: f64 = 1.007825032;
pub const O: f64 = 15.9949146196;

#[derive(Copy, Clone, Serialize, Deserialize, Debug, PartialEq, PartialOrd)]
#[serde(rename_all = "lowercase")]
pub enum Tolerance {
    Ppm(f64, f64),
    Da(f64, f64),
}

impl Default for Tolerance {
    fn default() -> Self {
        Tolerance::Da(-0.5, 0.5)
    }
}

impl Tolerance {
    /// Compute the (`lower`, `upper`) window (in Da) for for a monoisotopic
    /// mass and a given tolerance
    pub fn bounds(&self, center: f64) -> (f64, f64) {
        match self {
            Tolerance::Ppm(lo, hi) => {
                let delta_lo = center * lo / 1_000_000.0;
                let delta_hi = center * hi / 1_000_000.0;
                (center + delta_lo, center + delta_hi)
            }
            Tolerance::Da(lo, hi) => (center + lo, center + hi),
        }
    }

    pub fn contains(&self, center: f64, rhs: f64) -> bool {
        let (lo, hi) = self.bounds(center);
        rhs >= lo && rhs <= hi
    }

    /// Full width (in Da) of the tolerance window around `center`
    pub fn width(&self, center: f64) -> f64 {
        let (lo, hi) = self.bounds(center);
        (hi - lo).abs()
    }
}

pub trait Mass {
    fn monoisotopic(&self) -> f64;
}

pub const VALID_AA: [u8; 25] = [
    b'A', b'B', b'C', b'D', b'E', b'F', b'G', b'H', b'I', b'K', b'L', b'M', b'N', b'O', b'P', b'Q',
    b'R', b'S', b'T', b'U', b'V', b'W', b'X', b'Y', b'Z',
];

pub fn valid_residue(c: u8) -> bool {
    VALID_AA.contains(&c)
}

impl Mass for u8 {
    fn monoisotopic(&self) -> f64 {
        match self {
            b'A' => 71.037114,
            b'B' => 114.53494,
            b'C' => 103.009185,
            b'D' => 115.026943,
            b'E' => 129.042593,
            b'F' => 147.068414,
            b'G' => 57.021464,
            b'H' => 137.058912,
            b'I' => 113.084064,
            b'K' => 128.094963,
            b'L' => 113.084064,
            b'M' => 131.040485,
            b'N' => 114.042927,
            b'O' => 237.14772,
            b'P' => 97.052764,
            b'Q' => 128.058578,
            b'R' => 156.101111,
            b'S' => 87.032028,
            b'T' => 101.047679,
            b'U' => 150.95363,
            b'V' => 99.068414,
            b'W' => 186.079313,
            b'X' => 111.0,
            b'Y' => 163.06333,
            b'Z' => 128.55059,
            _ => unreachable!("BUG: invalid amino acid {}", *self as char),
        }
    }
}
