use std::{collections::BTreeMap, fmt::Write, sync::Arc};

use crate::{
    mass::{valid_residue, Mass, H, O},
    modification::{Modification, ModificationRegistry},
    Error,
};

#[derive(Clone, Debug)]
pub enum Residue {
    // Standard amino acid residue
    Just(u8),
    // Amino acid residue carrying `n` copies of a modification
    Mod(u8, Arc<Modification>, u8),
}

impl Residue {
    pub fn code(&self) -> u8 {
        match self {
            Residue::Just(c) | Residue::Mod(c, _, _) => *c,
        }
    }

    pub fn modification(&self) -> Option<(&Arc<Modification>, u8)> {
        match self {
            Residue::Just(_) => None,
            Residue::Mod(_, m, n) => Some((m, *n)),
        }
    }

    pub fn is_modified(&self) -> bool {
        matches!(self, Residue::Mod(..))
    }

    /// Does this residue carry `m` on one of its target residues?
    fn carries(&self, m: &Modification) -> Option<u8> {
        match self {
            Residue::Mod(c, n, count) if **n == *m && m.targets_residue(*c) => Some(*count),
            _ => None,
        }
    }
}

impl Mass for Residue {
    fn monoisotopic(&self) -> f64 {
        match self {
            Residue::Just(c) => c.monoisotopic(),
            Residue::Mod(c, m, n) => c.monoisotopic() + m.mass * *n as f64,
        }
    }
}

impl PartialEq for Residue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Residue::Just(a), Residue::Just(b)) => a == b,
            (Residue::Mod(a, m, n), Residue::Mod(b, o, k)) => a == b && n == k && m == o,
            _ => false,
        }
    }
}

impl std::fmt::Display for Residue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Residue::Just(c) => f.write_char(*c as char),
            Residue::Mod(c, _, _) => f.write_char(c.to_ascii_lowercase() as char),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Side {
    N,
    C,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Terminus {
    pub side: Side,
    pub modification: Option<Arc<Modification>>,
}

impl Terminus {
    pub fn n() -> Self {
        Terminus {
            side: Side::N,
            modification: None,
        }
    }

    pub fn c() -> Self {
        Terminus {
            side: Side::C,
            modification: None,
        }
    }
}

impl Mass for Terminus {
    fn monoisotopic(&self) -> f64 {
        let base = match self.side {
            Side::N => H,
            Side::C => O + H,
        };
        base + self.modification.as_ref().map(|m| m.mass).unwrap_or_default()
    }
}

/// Zero-based residue index -> (copies, modification)
pub type Placement = BTreeMap<usize, (u8, Arc<Modification>)>;

#[derive(Clone, Debug)]
pub struct Peptide {
    /// Candidate peptide id, or isoform number for generated isoforms
    pub id: usize,
    /// Search engine rank of the candidate, used to order isoform groups
    pub rank: u32,
    residues: Vec<Residue>,
    pub nterm: Terminus,
    pub cterm: Terminus,
    /// Neutral (uncharged) monoisotopic mass
    pub monoisotopic: f64,
}

impl Peptide {
    pub fn new(id: usize, residues: Vec<Residue>, nterm: Terminus, cterm: Terminus) -> Self {
        let monoisotopic = nterm.monoisotopic()
            + residues.iter().map(Mass::monoisotopic).sum::<f64>()
            + cterm.monoisotopic();
        Peptide {
            id,
            rank: 0,
            residues,
            nterm,
            cterm,
            monoisotopic,
        }
    }

    pub fn with_rank(mut self, rank: u32) -> Self {
        self.rank = rank;
        self
    }

    /// Parse an unmodified peptide from one-letter codes
    pub fn unmodified(id: usize, sequence: &str) -> Result<Self, Error> {
        let residues = sequence
            .chars()
            .map(|c| {
                let c = c.to_ascii_uppercase();
                match c.is_ascii() && valid_residue(c as u8) {
                    true => Ok(Residue::Just(c as u8)),
                    false => Err(Error::InvalidResidue(c)),
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Peptide::new(id, residues, Terminus::n(), Terminus::c()))
    }

    /// Build a peptide from a sequence and a modification map of the form
    /// `pos,count,id;pos,count,id`. Positions are zero-based residue indices,
    /// or `N`/`C` for the termini.
    pub fn from_modification_map(
        id: usize,
        sequence: &str,
        map: &str,
        registry: &ModificationRegistry,
    ) -> Result<Self, Error> {
        let mut peptide = Peptide::unmodified(id, sequence)?;
        let invalid = || Error::InvalidModificationMap(map.into());

        for entry in map.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            let mut fields = entry.split(',').map(str::trim);
            let (pos, count, mod_id) = match (fields.next(), fields.next(), fields.next(), fields.next())
            {
                (Some(p), Some(c), Some(m), None) => (p, c, m),
                _ => return Err(invalid()),
            };
            let count = count.parse::<u8>().map_err(|_| invalid())?;
            let mod_id = mod_id.parse::<u32>().map_err(|_| invalid())?;
            let m = registry
                .get(mod_id)
                .ok_or(Error::UnknownModification(mod_id))?
                .clone();

            match pos {
                "N" | "n" => peptide.nterm.modification = Some(m),
                "C" | "c" => peptide.cterm.modification = Some(m),
                _ => {
                    let pos = pos.parse::<usize>().map_err(|_| invalid())?;
                    let residue = peptide.residues.get_mut(pos).ok_or_else(invalid)?;
                    if count == 0 {
                        return Err(invalid());
                    }
                    *residue = Residue::Mod(residue.code(), m, count);
                }
            }
        }
        Ok(peptide.recompute())
    }

    /// Build a peptide from a position string `N.RRRR.C`: one digit per
    /// residue, where the digit is the modification id and `0` means none
    pub fn from_position_string(
        id: usize,
        sequence: &str,
        positions: &str,
        registry: &ModificationRegistry,
    ) -> Result<Self, Error> {
        let mut peptide = Peptide::unmodified(id, sequence)?;
        let invalid = || Error::InvalidModificationMap(positions.into());

        let mut parts = positions.split('.');
        let (nterm, body, cterm) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(n), Some(b), Some(c), None) if n.len() == 1 && c.len() == 1 => (n, b, c),
            _ => return Err(invalid()),
        };
        if body.len() != peptide.residues.len() {
            return Err(invalid());
        }

        let lookup = |c: char| -> Result<Option<Arc<Modification>>, Error> {
            let digit = c.to_digit(10).ok_or_else(invalid)?;
            if digit == 0 {
                return Ok(None);
            }
            registry
                .get(digit)
                .cloned()
                .map(Some)
                .ok_or(Error::UnknownModification(digit))
        };

        for c in nterm.chars() {
            peptide.nterm.modification = lookup(c)?;
        }
        for c in cterm.chars() {
            peptide.cterm.modification = lookup(c)?;
        }
        for (residue, c) in peptide.residues.iter_mut().zip(body.chars()) {
            if let Some(m) = lookup(c)? {
                *residue = Residue::Mod(residue.code(), m, 1);
            }
        }
        Ok(peptide.recompute())
    }

    fn recompute(self) -> Self {
        let rank = self.rank;
        Peptide::new(self.id, self.residues, self.nterm, self.cterm).with_rank(rank)
    }

    pub fn residues(&self) -> &[Residue] {
        &self.residues
    }

    pub fn len(&self) -> usize {
        self.residues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.residues.is_empty()
    }

    /// One-letter code string, without modifications
    pub fn sequence(&self) -> String {
        self.residues.iter().map(|r| r.code() as char).collect()
    }

    /// Total number of copies of `m` carried on its target residues
    pub fn site_count(&self, m: &Modification) -> u32 {
        self.residues
            .iter()
            .filter_map(|r| r.carries(m))
            .map(u32::from)
            .sum()
    }

    /// Unmodified residue indices `m` could be placed on
    pub fn eligible_positions(&self, m: &Modification) -> Vec<usize> {
        self.residues
            .iter()
            .enumerate()
            .filter(|(_, r)| matches!(r, Residue::Just(c) if m.targets_residue(*c)))
            .map(|(ix, _)| ix)
            .collect()
    }

    /// (position, copies) for every residue carrying `m`
    pub fn positions_of(&self, m: &Modification) -> Vec<(usize, u8)> {
        self.residues
            .iter()
            .enumerate()
            .filter_map(|(ix, r)| r.carries(m).map(|n| (ix, n)))
            .collect()
    }

    /// Residue index -> (copies, index into `scored`) for every scored
    /// modification this peptide carries
    pub fn scored_positions(&self, scored: &[Arc<Modification>]) -> BTreeMap<usize, (u8, usize)> {
        self.residues
            .iter()
            .enumerate()
            .filter_map(|(ix, r)| {
                scored
                    .iter()
                    .enumerate()
                    .find_map(|(mx, m)| r.carries(m).map(|n| (ix, (n, mx))))
            })
            .collect()
    }

    /// Copy of this peptide with every scored modification removed
    pub fn strip(&self, scored: &[Arc<Modification>]) -> Peptide {
        let residues = self
            .residues
            .iter()
            .map(|r| match scored.iter().any(|m| r.carries(m).is_some()) {
                true => Residue::Just(r.code()),
                false => r.clone(),
            })
            .collect();
        Peptide::new(self.id, residues, self.nterm.clone(), self.cterm.clone()).with_rank(self.rank)
    }

    /// Copy of this peptide with `placement` applied on top
    pub fn place(&self, id: usize, placement: &Placement) -> Peptide {
        let residues = self
            .residues
            .iter()
            .enumerate()
            .map(|(ix, r)| match placement.get(&ix) {
                Some((n, m)) => Residue::Mod(r.code(), m.clone(), *n),
                None => r.clone(),
            })
            .collect();
        Peptide::new(id, residues, self.nterm.clone(), self.cterm.clone()).with_rank(self.rank)
    }

    /// Does residue `pos` carry exactly `n` copies of `m`?
    pub fn has_exactly(&self, pos: usize, n: u8, m: &Modification) -> bool {
        self.residues.get(pos).and_then(|r| r.carries(m)) == Some(n)
    }

    /// Does residue `pos` carry at least `n` copies of `m`?
    pub fn has_at_least(&self, pos: usize, n: u8, m: &Modification) -> bool {
        self.residues
            .get(pos)
            .and_then(|r| r.carries(m))
            .map(|k| k >= n)
            .unwrap_or(false)
    }
}

impl std::fmt::Display for Peptide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for r in &self.residues {
            write!(f, "{}", r)?;
        }
        Ok(())
    }
}
