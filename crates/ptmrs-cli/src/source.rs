use std::collections::VecDeque;
use std::sync::mpsc::SyncSender;

use fnv::FnvHashSet;
use ptmrs_core::activation::Activation;
use ptmrs_core::modification::ModificationRegistry;
use ptmrs_core::peptide::Peptide;
use ptmrs_core::pipeline::{DataSource, Fetched, Progress};
use ptmrs_core::psm::{self, Item, Package};
use ptmrs_core::spectrum::Peak;
use serde::Deserialize;

#[derive(Deserialize, Clone, Debug)]
/// Candidate peptide identified by the search engine
pub struct CandidateEntry {
    pub peptide_id: usize,
    pub sequence: String,
    /// Modification map: `pos,count,modId;pos,count,modId`, zero-based
    /// positions or `N`/`C` for the termini
    #[serde(default)]
    pub modifications: String,
    #[serde(default)]
    pub rank: u32,
}

#[derive(Deserialize, Clone, Debug)]
/// One fragmentation spectrum together with its candidate peptides
pub struct SpectrumEntry {
    pub spectrum_id: usize,
    pub activation: Activation,
    pub charge: u8,
    pub precursor_mz: f64,
    pub peaks: Vec<Peak>,
    pub candidates: Vec<CandidateEntry>,
}

impl SpectrumEntry {
    /// Turn the entry into package items, one per isoform group. A candidate
    /// that cannot be parsed turns the whole spectrum into an error item.
    pub fn into_items(self, registry: &ModificationRegistry) -> Vec<Item> {
        let peptides = self
            .candidates
            .iter()
            .map(|c| {
                Peptide::from_modification_map(c.peptide_id, &c.sequence, &c.modifications, registry)
                    .map(|p| p.with_rank(c.rank))
            })
            .collect::<Result<Vec<_>, _>>();

        match peptides {
            Ok(peptides) => psm::items(
                self.spectrum_id,
                self.activation,
                self.charge,
                self.precursor_mz,
                self.peaks,
                peptides,
            ),
            Err(e) => {
                log::warn!("spectrum {}: {}", self.spectrum_id, e);
                vec![Item::Error {
                    sequence_id: self.candidates.first().map(|c| c.peptide_id).unwrap_or(0),
                    spectrum_id: self.spectrum_id,
                    message: e.to_string(),
                    peptide_ids: self.candidates.iter().map(|c| c.peptide_id).collect(),
                }]
            }
        }
    }
}

/// Serves spectra loaded from PSM files to the pipeline. Every spectrum
/// becomes its own package.
pub struct JsonSource<'a> {
    spectra: VecDeque<SpectrumEntry>,
    total: usize,
    registry: &'a ModificationRegistry,
    progress: SyncSender<Progress>,
}

impl<'a> JsonSource<'a> {
    pub fn new(
        spectra: Vec<SpectrumEntry>,
        registry: &'a ModificationRegistry,
        progress: SyncSender<Progress>,
    ) -> Self {
        let mut seen = FnvHashSet::default();
        let duplicates = spectra
            .iter()
            .filter(|s| !seen.insert(s.spectrum_id))
            .count();
        if duplicates > 0 {
            log::warn!(
                "{} spectra share their spectrum_id with an earlier entry",
                duplicates
            );
        }

        JsonSource {
            total: spectra.len(),
            spectra: spectra.into(),
            registry,
            progress,
        }
    }
}

impl<'a> DataSource for JsonSource<'a> {
    fn total_spectra(&self) -> usize {
        self.total
    }

    fn fetch(&mut self, desired: usize) -> Result<Option<Fetched>, String> {
        let registry = self.registry;
        let mut fetched = Fetched::default();
        // an empty batch means exhaustion to the pipeline, so keep draining
        // until some spectrum yields a package
        while fetched.packages.is_empty() && !self.spectra.is_empty() {
            let take = desired.max(1).min(self.spectra.len());
            fetched.spectra += take;
            fetched.packages.extend(
                self.spectra
                    .drain(..take)
                    .map(|entry| entry.into_items(registry))
                    .filter(|items: &Package| !items.is_empty()),
            );
        }
        if fetched.packages.is_empty() {
            return Ok(None);
        }
        fetched.peptides = fetched.packages.iter().flatten().map(Item::peptides).sum();
        Ok(Some(fetched))
    }

    fn progress(&self) -> Option<SyncSender<Progress>> {
        Some(self.progress.clone())
    }
}
