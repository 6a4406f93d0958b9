use std::{
    fmt::{Display, Write},
    hash::Hasher,
    str::FromStr,
    sync::Arc,
};

use fnv::{FnvHashMap, FnvHasher};
use serde::{Deserialize, Serialize};

use crate::diagnostic::DiagnosticIon;
use crate::mass::valid_residue;

/// A residue a modification (or a neutral loss) applies to, with an optional
/// multiplicity.
///
/// For modification targets the count is the maximum number of copies the
/// residue can carry (default 1). For neutral losses it is the exact number of
/// copies that must be present for the loss to apply; `None` means any.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Target {
    pub residue: u8,
    pub count: Option<u8>,
}

impl Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_char(self.residue as char)?;
        if let Some(n) = self.count {
            write!(f, ":{}", n)?;
        }
        Ok(())
    }
}

impl Serialize for Target {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InvalidTarget {
    Empty,
    InvalidResidue(char),
    InvalidCount(String),
}

impl FromStr for Target {
    type Err = InvalidTarget;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (residue, count) = match s.split_once(':') {
            Some((residue, count)) => {
                let count = count
                    .trim()
                    .parse::<u8>()
                    .ok()
                    .filter(|&n| n > 0)
                    .ok_or_else(|| InvalidTarget::InvalidCount(s.into()))?;
                (residue, Some(count))
            }
            None => (s, None),
        };
        let mut chars = residue.trim().chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => {
                let c = c.to_ascii_uppercase();
                if c.is_ascii() && valid_residue(c as u8) {
                    Ok(Target {
                        residue: c as u8,
                        count,
                    })
                } else {
                    Err(InvalidTarget::InvalidResidue(c))
                }
            }
            (Some(c), Some(_)) => Err(InvalidTarget::InvalidResidue(c)),
            (None, _) => Err(InvalidTarget::Empty),
        }
    }
}

fn validate_targets(name: &str, input: &[String]) -> Vec<Target> {
    let mut output: Vec<Target> = Vec::with_capacity(input.len());
    for s in input {
        match Target::from_str(s) {
            Ok(t) if output.iter().any(|o| o.residue == t.residue && o.count == t.count) => {
                log::warn!("{}: duplicate target `{}`", name, s)
            }
            Ok(t) => output.push(t),
            Err(InvalidTarget::Empty) => {
                log::error!("Skipping invalid target for {}: empty", name)
            }
            Err(InvalidTarget::InvalidResidue(c)) => {
                log::error!(
                    "Skipping invalid target for {}: unrecognized residue ({})",
                    name,
                    c
                )
            }
            Err(InvalidTarget::InvalidCount(s)) => {
                log::error!("Skipping invalid target for {}: bad multiplicity in {}", name, s)
            }
        }
    }
    output
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NeutralLoss {
    #[serde(default)]
    pub abbreviation: String,
    /// Mass lost from the fragment (positive)
    pub mass: f64,
}

impl PartialEq for NeutralLoss {
    fn eq(&self, other: &Self) -> bool {
        (self.mass - other.mass).abs() <= 1E-6 && self.abbreviation == other.abbreviation
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NeutralLossDefinition {
    /// Residues (optionally with an exact multiplicity, e.g. `K:2`) the loss
    /// applies to. Empty means every target of the modification.
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(flatten)]
    pub loss: NeutralLoss,
}

/// User-facing modification definition, deserialized from JSON
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Definition {
    pub id: u32,
    pub name: Option<String>,
    pub abbreviation: Option<String>,
    pub mass: f64,
    /// Target residues. `K:3` allows up to three copies on a lysine
    pub targets: Vec<String>,
    /// Whether the localization of this modification is scored (default true)
    pub scored: Option<bool>,
    pub neutral_losses: Option<Vec<NeutralLossDefinition>>,
    pub diagnostic_ions: Option<Vec<DiagnosticIon>>,
}

#[derive(Clone, Debug)]
pub struct Modification {
    pub id: u32,
    pub name: String,
    pub abbreviation: String,
    pub mass: f64,
    pub scored: bool,
    targets: Vec<Target>,
    neutral_losses: Vec<(Target, Vec<NeutralLoss>)>,
    pub diagnostic_ions: Vec<DiagnosticIon>,
    identity: u64,
}

impl Modification {
    pub fn new(
        id: u32,
        name: &str,
        abbreviation: &str,
        mass: f64,
        targets: Vec<Target>,
        neutral_losses: Vec<(Target, Vec<NeutralLoss>)>,
    ) -> Self {
        let mut m = Modification {
            id,
            name: name.into(),
            abbreviation: abbreviation.into(),
            mass,
            scored: true,
            targets,
            neutral_losses: Vec::new(),
            diagnostic_ions: Vec::new(),
            identity: 0,
        };
        for (target, losses) in neutral_losses {
            for loss in losses {
                m.add_neutral_loss(target, loss);
            }
        }
        m.identity = m.compute_identity();
        m
    }

    pub fn with_diagnostic_ions(mut self, ions: Vec<DiagnosticIon>) -> Self {
        self.diagnostic_ions = ions;
        self
    }

    pub fn with_scored(mut self, scored: bool) -> Self {
        self.scored = scored;
        self
    }

    /// Add a neutral loss, ignoring losses whose mass is already registered
    /// for the same target
    fn add_neutral_loss(&mut self, target: Target, loss: NeutralLoss) {
        match self.neutral_losses.iter_mut().find(|(t, _)| *t == target) {
            Some((_, list)) => {
                if list.iter().all(|l| (l.mass - loss.mass).abs() > 1E-4) {
                    list.push(loss);
                }
            }
            None => self.neutral_losses.push((target, vec![loss])),
        }
    }

    fn compute_identity(&self) -> u64 {
        let mut hasher = FnvHasher::default();
        if !self.name.is_empty() {
            hasher.write(self.name.as_bytes());
        } else if !self.abbreviation.is_empty() {
            hasher.write(self.abbreviation.as_bytes());
        } else {
            hasher.write_u32(self.id);
        }
        hasher.write_u64(self.mass.to_bits());
        for (target, losses) in &self.neutral_losses {
            hasher.write_u8(target.residue);
            hasher.write_u8(target.count.unwrap_or(0));
            for loss in losses {
                hasher.write_u64(loss.mass.to_bits());
                hasher.write(loss.abbreviation.as_bytes());
            }
        }
        hasher.finish()
    }

    /// Cached identity of (name or abbreviation or id, mass, neutral losses)
    pub fn identity(&self) -> u64 {
        self.identity
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn targets_residue(&self, residue: u8) -> bool {
        self.targets.iter().any(|t| t.residue == residue)
    }

    /// Maximum number of copies `residue` can carry; 0 if not a target
    pub fn max_multiplicity(&self, residue: u8) -> u8 {
        self.targets
            .iter()
            .filter(|t| t.residue == residue)
            .map(|t| t.count.unwrap_or(1))
            .max()
            .unwrap_or(0)
    }

    /// Does any target residue accept more than one copy?
    pub fn allows_multiple(&self) -> bool {
        self.targets.iter().any(|t| t.count.unwrap_or(1) > 1)
    }

    /// Neutral losses for `count` copies on `residue`: the exact multiplicity
    /// entries followed by those registered for any multiplicity
    pub fn neutral_losses(&self, residue: u8, count: u8) -> Vec<&NeutralLoss> {
        let exact = self
            .neutral_losses
            .iter()
            .filter(move |(t, _)| t.residue == residue && t.count == Some(count));
        let any = self
            .neutral_losses
            .iter()
            .filter(move |(t, _)| t.residue == residue && t.count.is_none());
        exact.chain(any).flat_map(|(_, l)| l.iter()).collect()
    }

    /// Label used in localization strings
    pub fn label(&self) -> &str {
        if self.abbreviation.is_empty() {
            &self.name
        } else {
            &self.abbreviation
        }
    }
}

impl PartialEq for Modification {
    fn eq(&self, other: &Self) -> bool {
        if self.identity != other.identity {
            return false;
        }
        if self.targets.is_empty() && other.targets.is_empty() {
            return true;
        }
        self.targets
            .iter()
            .any(|t| other.targets.iter().any(|o| o.residue == t.residue))
    }
}

impl Display for Modification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({:+.4})", self.label(), self.mass)
    }
}

/// Joins neutral loss abbreviations, counting repeats: `["H3PO4", "H3PO4", "H2O"]`
/// becomes `-2H3PO4-H2O`
pub fn format_losses(abbreviations: &[&str]) -> String {
    let mut s = String::new();
    for (ix, abbr) in abbreviations.iter().enumerate() {
        if abbr.is_empty() || abbreviations[..ix].contains(abbr) {
            continue;
        }
        let n = abbreviations.iter().filter(|a| *a == abbr).count();
        s.push('-');
        if n > 1 {
            let _ = write!(s, "{}", n);
        }
        s.push_str(abbr);
    }
    s
}

/// Explicit registry of every configured modification, addressable by id
#[derive(Clone, Debug, Default)]
pub struct ModificationRegistry {
    modifications: Vec<Arc<Modification>>,
    index: FnvHashMap<u32, usize>,
}

impl ModificationRegistry {
    /// Validate definitions, logging and skipping those that cannot be used
    pub fn from_definitions(definitions: Vec<Definition>) -> Self {
        let mut registry = ModificationRegistry::default();
        for def in definitions {
            let name = def
                .name
                .clone()
                .or_else(|| def.abbreviation.clone())
                .unwrap_or_else(|| def.id.to_string());

            if def.id == 0 {
                log::error!("Skipping modification {}: id 0 is reserved", name);
                continue;
            }
            if registry.index.contains_key(&def.id) {
                log::error!("Skipping modification {}: duplicate id {}", name, def.id);
                continue;
            }
            let targets = validate_targets(&name, &def.targets);
            if targets.is_empty() {
                log::warn!("Modification {} has no valid target residues", name);
            }

            let mut losses = Vec::new();
            for nl in def.neutral_losses.unwrap_or_default() {
                let nl_targets = match nl.targets.is_empty() {
                    true => targets
                        .iter()
                        .map(|t| Target {
                            residue: t.residue,
                            count: None,
                        })
                        .collect(),
                    false => validate_targets(&name, &nl.targets),
                };
                for t in nl_targets {
                    if !targets.iter().any(|m| m.residue == t.residue) {
                        log::warn!(
                            "Neutral loss {} of {} targets a residue the modification does not: {}",
                            nl.loss.abbreviation,
                            name,
                            t
                        );
                        continue;
                    }
                    losses.push((t, vec![nl.loss.clone()]));
                }
            }

            let modification = Modification::new(
                def.id,
                def.name.as_deref().unwrap_or_default(),
                def.abbreviation.as_deref().unwrap_or_default(),
                def.mass,
                targets,
                losses,
            )
            .with_scored(def.scored.unwrap_or(true))
            .with_diagnostic_ions(def.diagnostic_ions.unwrap_or_default());

            registry.insert(modification);
        }
        registry
    }

    pub fn insert(&mut self, modification: Modification) -> Arc<Modification> {
        let modification = Arc::new(modification);
        match self.index.get(&modification.id) {
            Some(&ix) => self.modifications[ix] = modification.clone(),
            None => {
                self.index
                    .insert(modification.id, self.modifications.len());
                self.modifications.push(modification.clone());
            }
        }
        modification
    }

    pub fn get(&self, id: u32) -> Option<&Arc<Modification>> {
        self.index.get(&id).map(|&ix| &self.modifications[ix])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Modification>> {
        self.modifications.iter()
    }

    /// Modifications whose localization is scored
    pub fn scored(&self) -> impl Iterator<Item = &Arc<Modification>> {
        self.modifications.iter().filter(|m| m.scored)
    }

    pub fn len(&self) -> usize {
        self.modifications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modifications.is_empty()
    }
}
