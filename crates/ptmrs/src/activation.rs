use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ion_series::{Composition, Kind};

/// Fragmentation technique used to acquire a spectrum
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Activation {
    Cid,
    Etd,
    Hcd,
    Ethcd,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvalidActivation(pub String);

impl std::fmt::Display for InvalidActivation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unsupported activation type: `{}`", self.0)
    }
}

impl std::error::Error for InvalidActivation {}

impl FromStr for Activation {
    type Err = InvalidActivation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CID" | "CAD" => Ok(Activation::Cid),
            "ETD" | "ECD" => Ok(Activation::Etd),
            "HCD" => Ok(Activation::Hcd),
            "ETHCD" => Ok(Activation::Ethcd),
            _ => Err(InvalidActivation(s.into())),
        }
    }
}

impl TryFrom<String> for Activation {
    type Error = InvalidActivation;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Activation> for String {
    fn from(value: Activation) -> Self {
        value.to_string()
    }
}

impl std::fmt::Display for Activation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Activation::Cid => "CID",
            Activation::Etd => "ETD",
            Activation::Hcd => "HCD",
            Activation::Ethcd => "EThcD",
        })
    }
}

impl Activation {
    pub const ALL: [Activation; 4] = [
        Activation::Cid,
        Activation::Etd,
        Activation::Hcd,
        Activation::Ethcd,
    ];

    /// Fragment ion families matched when no override is configured
    pub fn default_composition(self) -> Composition {
        let kinds: &[Kind] = match self {
            Activation::Cid | Activation::Hcd => &[Kind::B, Kind::Y],
            Activation::Etd => &[Kind::C, Kind::ZRadical, Kind::ZPrime],
            Activation::Ethcd => &Kind::ALL,
        };
        kinds.iter().copied().collect()
    }

    /// Fragment families that receive neutral-loss variants.
    ///
    /// `neutral_losses` is the tri-state user setting: `Some(false)` disables
    /// losses, `Some(true)` forces them on, `None` lets the activation decide.
    /// A configured composition overrides the activation default.
    pub fn neutral_loss_composition(
        self,
        neutral_losses: Option<bool>,
        configured: Option<Composition>,
    ) -> Composition {
        if neutral_losses == Some(false) {
            return Composition::NONE;
        }
        if let Some(configured) = configured {
            return configured;
        }
        let by = [Kind::B, Kind::Y].into_iter().collect();
        match self {
            Activation::Cid if neutral_losses == Some(true) => by,
            Activation::Cid | Activation::Etd => Composition::NONE,
            Activation::Hcd | Activation::Ethcd => by,
        }
    }

    /// Whether neutral-loss peaks count towards the number of fragments
    /// expected per window
    pub fn consider_neutral_loss_peaks(self, neutral_losses: Option<bool>) -> bool {
        neutral_losses != Some(false)
            && (matches!(self, Activation::Hcd | Activation::Ethcd) || neutral_losses == Some(true))
    }

    /// Number of theoretical fragments expected per 100 m/z window
    pub fn theoretical_fragments(self, neutral_losses: Option<bool>) -> u32 {
        let factor = match self.consider_neutral_loss_peaks(neutral_losses) {
            true => 2,
            false => 1,
        };
        match self {
            Activation::Cid | Activation::Hcd => 8 * factor,
            Activation::Etd => 6,
            Activation::Ethcd => 4 + 8 * factor,
        }
    }

    /// Highest fragment charge state considered for a precursor charge
    pub fn max_fragment_charge(self, precursor_charge: u8) -> u8 {
        match self {
            Activation::Etd => 1,
            _ => precursor_charge.clamp(1, 2),
        }
    }

    /// ETD does not cleave N-terminal to proline
    pub fn avoids_proline(self) -> bool {
        self == Activation::Etd
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse() {
        assert_eq!("cad".parse::<Activation>(), Ok(Activation::Cid));
        assert_eq!("ECD".parse::<Activation>(), Ok(Activation::Etd));
        assert_eq!(" EThcD ".parse::<Activation>(), Ok(Activation::Ethcd));
        assert!("PQD".parse::<Activation>().is_err());

        let json: Vec<Activation> = serde_json::from_str(r#"["HCD", "etd"]"#).unwrap();
        assert_eq!(json, vec![Activation::Hcd, Activation::Etd]);
        assert_eq!(serde_json::to_string(&Activation::Ethcd).unwrap(), r#""EThcD""#);
    }

    #[test]
    fn neutral_loss_rules() {
        let by: Composition = [Kind::B, Kind::Y].into_iter().collect();
        assert_eq!(Activation::Cid.neutral_loss_composition(None, None), Composition::NONE);
        assert_eq!(Activation::Cid.neutral_loss_composition(Some(true), None), by);
        assert_eq!(Activation::Etd.neutral_loss_composition(Some(true), None), Composition::NONE);
        assert_eq!(Activation::Hcd.neutral_loss_composition(None, None), by);
        assert_eq!(
            Activation::Hcd.neutral_loss_composition(Some(false), Some(by)),
            Composition::NONE
        );
        let b: Composition = [Kind::B].into_iter().collect();
        assert_eq!(Activation::Etd.neutral_loss_composition(None, Some(b)), b);
    }

    #[test]
    fn expected_fragments() {
        assert_eq!(Activation::Cid.theoretical_fragments(None), 8);
        assert_eq!(Activation::Cid.theoretical_fragments(Some(true)), 16);
        assert_eq!(Activation::Hcd.theoretical_fragments(None), 16);
        assert_eq!(Activation::Hcd.theoretical_fragments(Some(false)), 8);
        assert_eq!(Activation::Etd.theoretical_fragments(Some(true)), 6);
        assert_eq!(Activation::Ethcd.theoretical_fragments(None), 20);
    }

    #[test]
    fn fragment_charges() {
        assert_eq!(Activation::Hcd.max_fragment_charge(4), 2);
        assert_eq!(Activation::Cid.max_fragment_charge(1), 1);
        assert_eq!(Activation::Etd.max_fragment_charge(3), 1);
        assert!(Activation::Etd.avoids_proline());
        assert!(!Activation::Ethcd.avoids_proline());
    }
}
