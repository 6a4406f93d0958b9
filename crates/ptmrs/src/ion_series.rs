use std::fmt::Write;

use serde::{Deserialize, Serialize};

use crate::mass::{Mass, H, PROTON};
use crate::modification::{format_losses, Modification, NeutralLoss};
use crate::peptide::Peptide;
use std::sync::Arc;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    B,
    C,
    Y,
    #[serde(rename = "zradical", alias = "z")]
    ZRadical,
    #[serde(rename = "zprime")]
    ZPrime,
}

impl Kind {
    pub const ALL: [Kind; 5] = [Kind::B, Kind::C, Kind::Y, Kind::ZRadical, Kind::ZPrime];

    /// Does this fragment contain the peptide N-terminus?
    pub fn is_nterm(self) -> bool {
        matches!(self, Kind::B | Kind::C)
    }

    pub fn is_z(self) -> bool {
        matches!(self, Kind::ZRadical | Kind::ZPrime)
    }

    /// Mass offset of the (neutral) fragment relative to terminus + residues
    pub fn shift(self) -> f64 {
        match self {
            Kind::B => -H,
            Kind::C => 16.018724069,
            Kind::Y => H,
            Kind::ZRadical => -15.010899037,
            Kind::ZPrime => -14.003074005,
        }
    }

    fn title(self) -> char {
        match self {
            Kind::B => 'b',
            Kind::C => 'c',
            Kind::Y => 'y',
            Kind::ZRadical | Kind::ZPrime => 'z',
        }
    }

    fn appendix(self) -> &'static str {
        match self {
            Kind::ZPrime => "+H",
            _ => "",
        }
    }

    fn bit(self) -> u8 {
        1 << self as u8
    }
}

/// Set of fragment ion families
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Vec<Kind>", into = "Vec<Kind>")]
pub struct Composition(u8);

impl Composition {
    pub const NONE: Composition = Composition(0);

    pub fn contains(&self, kind: Kind) -> bool {
        self.0 & kind.bit() != 0
    }

    pub fn insert(&mut self, kind: Kind) {
        self.0 |= kind.bit();
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn kinds(&self) -> impl Iterator<Item = Kind> + '_ {
        Kind::ALL.into_iter().filter(|k| self.contains(*k))
    }
}

impl FromIterator<Kind> for Composition {
    fn from_iter<T: IntoIterator<Item = Kind>>(iter: T) -> Self {
        let mut c = Composition::NONE;
        for kind in iter {
            c.insert(kind);
        }
        c
    }
}

impl From<Vec<Kind>> for Composition {
    fn from(value: Vec<Kind>) -> Self {
        value.into_iter().collect()
    }
}

impl From<Composition> for Vec<Kind> {
    fn from(value: Composition) -> Self {
        value.kinds().collect()
    }
}

impl std::fmt::Display for Composition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        for (ix, kind) in self.kinds().enumerate() {
            if ix > 0 {
                f.write_char(',')?;
            }
            f.write_char(kind.title())?;
            f.write_str(kind.appendix())?;
            if kind == Kind::ZRadical {
                f.write_char('.')?;
            }
        }
        Ok(())
    }
}

/// A parameterized family of theoretical fragments
#[derive(Clone, Debug)]
pub struct IonType {
    pub kind: Kind,
    pub charge: u8,
    /// Total mass offset, including neutral losses
    pub shift: f64,
    /// Only produce fragments that contain this (zero-based) residue
    pub expansion: Option<usize>,
    /// Neutral loss annotation, empty for base types
    pub loss: String,
    pub multi_loss: bool,
}

impl IonType {
    pub fn base(kind: Kind, charge: u8) -> Self {
        IonType {
            kind,
            charge,
            shift: kind.shift(),
            expansion: None,
            loss: String::new(),
            multi_loss: false,
        }
    }

    fn with_loss(&self, expansion: usize, delta: f64, loss: String, multi_loss: bool) -> Self {
        IonType {
            kind: self.kind,
            charge: self.charge,
            shift: self.shift - delta,
            expansion: Some(expansion),
            loss,
            multi_loss,
        }
    }

    pub fn is_neutral_loss(&self) -> bool {
        !self.loss.is_empty()
    }

    /// Same family, charge, and shift; annotation and coverage are ignored
    fn same_ions(&self, other: &IonType) -> bool {
        self.kind.is_nterm() == other.kind.is_nterm()
            && self.kind.title() == other.kind.title()
            && self.charge == other.charge
            && self.multi_loss == other.multi_loss
            && (self.shift - other.shift).abs() <= 1E-6
    }
}

impl std::fmt::Display for IonType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}{}+{}{}",
            self.kind.title(),
            self.charge,
            self.kind.appendix(),
            self.loss
        )
    }
}

/// Base fragment types for a composition: b/y at charges `1..=max_charge`,
/// c/z singly charged
pub fn base_types(composition: Composition, max_charge: u8) -> Vec<IonType> {
    let mut types = Vec::new();
    for charge in 1..=max_charge.max(1) {
        for kind in [Kind::B, Kind::Y] {
            if composition.contains(kind) {
                types.push(IonType::base(kind, charge));
            }
        }
    }
    for kind in [Kind::C, Kind::ZPrime, Kind::ZRadical] {
        if composition.contains(kind) {
            types.push(IonType::base(kind, 1));
        }
    }
    types
}

/// All fragment types to match for one isoform: neutral-loss variants for
/// every scored modification site that defines losses, followed by `base`
pub fn all_ion_types(
    peptide: &Peptide,
    scored: &[Arc<Modification>],
    base: &[IonType],
    nl_composition: Composition,
) -> Vec<IonType> {
    if nl_composition.is_empty() {
        return base.to_vec();
    }

    let nl_base = base
        .iter()
        .filter(|t| nl_composition.contains(t.kind))
        .collect::<Vec<_>>();

    let mut losses: Vec<(usize, &NeutralLoss)> = Vec::new();
    let mut types: Vec<IonType> = Vec::new();

    for (pos, residue) in peptide.residues().iter().enumerate() {
        let (m, count) = match residue.modification() {
            Some((m, count)) if scored.iter().any(|s| **s == **m) => (m, count),
            _ => continue,
        };
        for loss in m.neutral_losses(residue.code(), count) {
            losses.push((pos, loss));
            for ty in &nl_base {
                types.push(ty.with_loss(
                    pos,
                    loss.mass,
                    format_losses(&[loss.abbreviation.as_str()]),
                    false,
                ));
            }
        }
    }

    // Combinations of two or more simultaneous losses
    for k in 2..=losses.len() {
        for combination in crate::isoform::Combinations::new(losses.len(), k) {
            let delta = combination.iter().map(|&ix| losses[ix].1.mass).sum::<f64>();
            let lo = combination.iter().map(|&ix| losses[ix].0).min().unwrap_or(0);
            let hi = combination.iter().map(|&ix| losses[ix].0).max().unwrap_or(0);
            let abbreviations = combination
                .iter()
                .map(|&ix| losses[ix].1.abbreviation.as_str())
                .collect::<Vec<_>>();
            let label = format_losses(&abbreviations);
            for ty in &nl_base {
                let expansion = match ty.kind.is_nterm() {
                    true => hi,
                    false => lo,
                };
                types.push(ty.with_loss(expansion, delta, label.clone(), true));
            }
        }
    }

    // Collapse duplicates, keeping the variant that covers the most fragments
    let mut dedup: Vec<IonType> = Vec::with_capacity(types.len() + base.len());
    for ty in types {
        match dedup.iter_mut().find(|d| d.same_ions(&ty)) {
            Some(existing) => {
                let wider = match ty.kind.is_nterm() {
                    true => ty.expansion < existing.expansion,
                    false => ty.expansion > existing.expansion,
                };
                if wider {
                    *existing = ty;
                }
            }
            None => dedup.push(ty),
        }
    }
    dedup.extend(base.iter().cloned());
    dedup
}

/// Theoretical fragment ion
#[derive(Copy, Clone, Debug)]
pub struct Ion<'t> {
    pub ion_type: &'t IonType,
    /// Fragment m/z
    pub mz: f64,
    /// Number of residues in the fragment
    pub index: usize,
}

impl PartialEq for Ion<'_> {
    fn eq(&self, other: &Self) -> bool {
        (self.mz - other.mz).abs() <= 1E-4
            && self.index == other.index
            && self.ion_type.same_ions(other.ion_type)
            && self.ion_type.loss == other.ion_type.loss
    }
}

impl std::fmt::Display for Ion<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({}): {:.2}", self.ion_type, self.index, self.mz)
    }
}

/// Generate fragment ions of one type for a candidate peptide
pub struct IonSeries<'p> {
    ion_type: &'p IonType,
    peptide: &'p Peptide,
    cumulative_mass: f64,
    avoid_proline: bool,
    idx: usize,
}

impl<'p> IonSeries<'p> {
    /// Create a new [`IonSeries`] iterator. When `avoid_proline` is set (ETD),
    /// no N-terminal fragment is produced at a cleavage N-terminal to proline,
    /// and no z ion starts with proline.
    pub fn new(peptide: &'p Peptide, ion_type: &'p IonType, avoid_proline: bool) -> Self {
        let cumulative_mass = match ion_type.kind.is_nterm() {
            true => peptide.nterm.monoisotopic(),
            false => peptide.cterm.monoisotopic(),
        };
        Self {
            ion_type,
            peptide,
            cumulative_mass,
            avoid_proline,
            idx: 0,
        }
    }
}

impl<'p> Iterator for IonSeries<'p> {
    type Item = Ion<'p>;

    // Dynamic programming solution - memoize cumulative mass of
    // peptide fragment for fast fragment ion generation
    fn next(&mut self) -> Option<Self::Item> {
        let residues = self.peptide.residues();
        let len = residues.len();
        let ty = self.ion_type;
        loop {
            // fragments contain 1..len residues
            if self.idx + 1 >= len {
                return None;
            }
            self.idx += 1;
            let n = self.idx;

            // `cleavage` is the index of the first residue C-terminal to the cut
            let (cleavage, keep) = match ty.kind.is_nterm() {
                true => {
                    self.cumulative_mass += residues[n - 1].monoisotopic();
                    let keep = ty.expansion.map(|e| n > e).unwrap_or(true);
                    (n, keep)
                }
                false => {
                    self.cumulative_mass += residues[len - n].monoisotopic();
                    let cleavage = len - n;
                    let keep = ty.expansion.map(|e| cleavage <= e).unwrap_or(true);
                    (cleavage, keep)
                }
            };
            if !keep {
                continue;
            }
            if self.avoid_proline
                && (ty.kind.is_nterm() || ty.kind.is_z())
                && residues[cleavage].code() == b'P'
            {
                continue;
            }

            let charge = ty.charge as f64;
            return Some(Ion {
                ion_type: ty,
                mz: (self.cumulative_mass + ty.shift + PROTON * charge) / charge,
                index: n,
            });
        }
    }
}

/// Every theoretical fragment of `peptide` for the given types
pub fn fragments<'p>(peptide: &'p Peptide, types: &'p [IonType], avoid_proline: bool) -> Vec<Ion<'p>> {
    types
        .iter()
        .flat_map(|ty| IonSeries::new(peptide, ty, avoid_proline))
        .collect()
}
