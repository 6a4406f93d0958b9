pub mod activation;
pub mod binomial;
pub mod diagnostic;
pub mod ion_series;
pub mod isoform;
pub mod mass;
pub mod modification;
pub mod peptide;
pub mod pipeline;
pub mod probability;
pub mod psm;
pub mod record;
pub mod scoring;
pub mod settings;
pub mod spectrum;

#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    Json(serde_json::Error),
    /// A modification map or position string could not be parsed
    InvalidModificationMap(String),
    /// A residue outside of the residue mass table
    InvalidResidue(char),
    /// A modification id that is not present in the registry
    UnknownModification(u32),
    /// The data source did not provide a progress channel
    MissingProgressSink,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => e.fmt(f),
            Self::Json(e) => e.fmt(f),
            Self::InvalidModificationMap(s) => write!(f, "invalid modification map: `{}`", s),
            Self::InvalidResidue(c) => write!(f, "invalid amino acid residue: `{}`", c),
            Self::UnknownModification(id) => write!(f, "unknown modification id: {}", id),
            Self::MissingProgressSink => f.write_str("data source provides no progress sink"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

pub fn read_json<S, T>(path: S) -> Result<T, Error>
where
    S: AsRef<std::path::Path>,
    T: for<'de> serde::Deserialize<'de>,
{
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents).map_err(Error::Json)
}
