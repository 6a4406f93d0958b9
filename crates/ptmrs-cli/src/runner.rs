use std::path::PathBuf;
use std::sync::mpsc::sync_channel;
use std::time::Instant;

use anyhow::{anyhow, ensure, Context};
use log::info;
use ptmrs_core::modification::ModificationRegistry;
use ptmrs_core::pipeline::{Pipeline, Progress, Summary};
use ptmrs_core::record::Record;
use rayon::prelude::*;

use crate::input::Search;
use crate::source::{JsonSource, SpectrumEntry};

const PROGRESS_CAPACITY: usize = 256;
const RESULT_CAPACITY: usize = 4096;

pub struct Runner {
    pub parameters: Search,
    registry: ModificationRegistry,
    start: Instant,
}

impl Runner {
    pub fn new(parameters: Search) -> anyhow::Result<Self> {
        let start = Instant::now();
        let registry = parameters.registry();
        info!(
            "using {} modifications, {} of them scored",
            registry.len(),
            registry.scored().count()
        );
        Ok(Self {
            parameters,
            registry,
            start,
        })
    }

    pub fn make_path<S: AsRef<str>>(&self, file_name: S) -> PathBuf {
        self.parameters.output_directory.join(file_name.as_ref())
    }

    pub fn read_psms(&self) -> anyhow::Result<Vec<SpectrumEntry>> {
        let start = Instant::now();
        let spectra = self
            .parameters
            .psm_paths
            .par_iter()
            .map(|path| {
                ptmrs_core::read_json::<_, Vec<SpectrumEntry>>(path)
                    .with_context(|| format!("Failed to read PSMs from `{path}`"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?
            .into_iter()
            .flatten()
            .collect::<Vec<_>>();

        info!(
            "- read {} spectra from {} files in {}ms",
            spectra.len(),
            self.parameters.psm_paths.len(),
            start.elapsed().as_millis()
        );
        Ok(spectra)
    }

    /// Run the pipeline over `spectra`. Records are drained on the calling
    /// thread while the workers score.
    pub fn localize(&self, spectra: Vec<SpectrumEntry>) -> anyhow::Result<(Summary, Vec<Record>)> {
        let (progress_tx, progress_rx) = sync_channel(PROGRESS_CAPACITY);
        let source = JsonSource::new(spectra, &self.registry, progress_tx);
        let pipeline = Pipeline::new(&self.parameters.settings, &self.registry, source)?;

        let (tx, rx) = sync_channel(RESULT_CAPACITY);
        std::thread::scope(|s| -> anyhow::Result<(Summary, Vec<Record>)> {
            s.spawn(move || {
                for message in progress_rx {
                    match message {
                        Progress::Status(status) => info!("{}", status),
                        Progress::Counter { spectra, peptides } => {
                            log::trace!("- {} spectra, {} peptides handed out", spectra, peptides)
                        }
                    }
                }
            });
            let handle = s.spawn(move || pipeline.run(tx));
            let records = rx.iter().collect::<Vec<Record>>();
            let summary = handle
                .join()
                .map_err(|_| anyhow!("localization pipeline panicked"))??;
            Ok((summary, records))
        })
    }

    pub fn run(mut self) -> anyhow::Result<Summary> {
        let spectra = self.read_psms()?;
        let (summary, mut records) = self.localize(spectra)?;
        records.par_sort_unstable_by_key(|r| (r.spectrum_id(), r.sequence_id()));

        let errors = records.iter().filter(|r| r.is_error()).count();
        info!(
            "localized {} PSMs of {} spectra ({} peptides), {} could not be scored",
            records.len() - errors,
            summary.spectra,
            summary.peptides,
            errors
        );

        log::trace!("writing outputs");
        let path = self.write_localizations(&records)?;
        self.parameters.output_paths.push(path);
        let path = self.write_errors(&records)?;
        self.parameters.output_paths.push(path);

        let path = self.make_path("results.json");
        self.parameters.output_paths.push(path.display().to_string());
        println!("{}", serde_json::to_string_pretty(&self.parameters)?);

        let bytes = serde_json::to_vec_pretty(&self.parameters)?;
        std::fs::write(&path, bytes)?;

        ensure!(
            !summary.error_happened,
            "localization did not complete: {}",
            summary.messages.join("; ")
        );

        let run_time = (Instant::now() - self.start).as_secs();
        info!("finished in {}s", run_time);
        Ok(summary)
    }
}
