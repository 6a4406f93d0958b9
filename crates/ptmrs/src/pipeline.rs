//! Streams packages of PSMs from a data source through a pool of scoring
//! workers, with bounded memory and a single result channel

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::activation::Activation;
use crate::modification::ModificationRegistry;
use crate::psm::{Item, Package};
use crate::record::Record;
use crate::scoring::Scorer;
use crate::settings::Settings;
use crate::Error;

/// Capacity of the channel between the workers and the result forwarder
const RESULT_CAPACITY: usize = 1024;

/// Messages posted to the data source's progress sink
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Progress {
    Status(String),
    /// Cumulative number of spectra and peptides handed to workers
    Counter { spectra: usize, peptides: usize },
}

/// One batch of packages delivered by a data source
#[derive(Clone, Debug, Default)]
pub struct Fetched {
    pub packages: Vec<Package>,
    pub spectra: usize,
    pub peptides: usize,
}

/// Supplier of PSM packages
pub trait DataSource: Send {
    /// Total number of spectra that will be delivered, used for sizing
    fn total_spectra(&self) -> usize;

    /// Fetch packages holding about `desired` spectra. `Ok(None)` signals
    /// that the source is exhausted.
    fn fetch(&mut self, desired: usize) -> Result<Option<Fetched>, String>;

    /// Bounded channel receiving status messages and counters
    fn progress(&self) -> Option<SyncSender<Progress>>;
}

/// Shared cancellation signal, checked by workers at every PSM
#[derive(Clone, Debug, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PipelineError {
    /// Processing was cancelled by the caller
    Cancelled,
    /// The worker pool could not be started
    Workers(String),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::Cancelled => f.write_str("processing was cancelled"),
            PipelineError::Workers(e) => write!(f, "failed to start worker pool: {}", e),
        }
    }
}

impl std::error::Error for PipelineError {}

/// Outcome of a pipeline run
#[derive(Clone, Debug, Default)]
pub struct Summary {
    /// A worker or the data source failed; `messages` says why
    pub error_happened: bool,
    pub messages: Vec<String>,
    pub spectra: usize,
    pub peptides: usize,
    /// Number of records forwarded to the sink
    pub records: usize,
}

/// Package size, refill threshold and worker count of a run
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Sizing {
    /// Number of spectra requested per fetch
    pub desired: usize,
    /// A refill is triggered once the queue holds this many items or fewer
    pub low_water: usize,
    pub workers: usize,
}

impl Sizing {
    /// Spectra per core and fetch
    pub const BOUNDARY: usize = match usize::BITS {
        64 => 3000,
        _ => 1500,
    };
    pub const MIN_DESIRED: usize = 40_000;
    pub const MIN_LOW_WATER: usize = 200;

    pub fn new(total: usize, cores: usize, max_tasks: Option<usize>) -> Self {
        let cores = cores.max(1);
        let desired = (Self::BOUNDARY * cores).min(total).max(Self::MIN_DESIRED);
        let low_water = ((desired as f64 * 0.3) as usize).max(Self::MIN_LOW_WATER);
        let workers = match max_tasks {
            Some(n) if n > 0 => n.min(cores),
            _ => cores,
        };
        Sizing {
            desired,
            low_water,
            workers,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}

/// State shared by every worker of a run
struct Shared<S> {
    source: Mutex<S>,
    queue: Mutex<VecDeque<Package>>,
    /// Number of items waiting in `queue`
    queued: AtomicUsize,
    exhausted: AtomicBool,
    failed: AtomicBool,
    messages: Mutex<Vec<String>>,
    cancellation: Cancellation,
    spectra: AtomicUsize,
    peptides: AtomicUsize,
    progress: SyncSender<Progress>,
    sizing: Sizing,
}

impl<S: DataSource> Shared<S> {
    /// Progress messages are dropped when the sink is full or gone
    fn post(&self, message: Progress) {
        let _ = self.progress.try_send(message);
    }

    fn fail(&self, message: String) {
        log::error!("{}", message);
        self.failed.store(true, Ordering::SeqCst);
        lock(&self.messages).push(message);
        self.cancellation.cancel();
    }

    /// Fetch more packages when the queue runs low. Only one refill is in
    /// flight at a time; concurrent callers wait and then re-check.
    fn refill(&self) {
        if self.exhausted.load(Ordering::Acquire) || self.cancellation.is_cancelled() {
            return;
        }
        let mut source = lock(&self.source);
        if self.exhausted.load(Ordering::Acquire)
            || self.queued.load(Ordering::Acquire) > self.sizing.low_water
        {
            return;
        }

        // A panicking source is caught here so the lock is released unpoisoned
        let fetched = catch_unwind(AssertUnwindSafe(|| source.fetch(self.sizing.desired)));
        match fetched {
            Ok(Ok(Some(fetched))) if !fetched.packages.is_empty() => {
                log::trace!(
                    "- fetched {} packages: {} spectra, {} peptides",
                    fetched.packages.len(),
                    fetched.spectra,
                    fetched.peptides
                );
                let items = fetched.packages.iter().map(Vec::len).sum::<usize>();
                let mut queue = lock(&self.queue);
                queue.extend(fetched.packages);
                self.queued.fetch_add(items, Ordering::AcqRel);
            }
            Ok(Ok(_)) => {
                self.exhausted.store(true, Ordering::Release);
                self.post(Progress::Status("Finished collecting spectra".into()));
            }
            Ok(Err(e)) => {
                self.exhausted.store(true, Ordering::Release);
                self.fail(format!("failed to fetch spectra: {}", e));
            }
            Err(panic) => {
                self.exhausted.store(true, Ordering::Release);
                self.fail(format!(
                    "data source panicked: {}",
                    panic_message(panic.as_ref())
                ));
            }
        }
    }

    fn next_package(&self) -> Option<Package> {
        let mut queue = lock(&self.queue);
        let package = queue.pop_front()?;
        self.queued.fetch_sub(package.len(), Ordering::AcqRel);
        Some(package)
    }

    /// Score one item. A panic is turned into an error record for that item
    /// and flagged in the summary, without stopping the run.
    fn localize<F>(&self, scorer: &Scorer<'_>, score: &F, item: Item) -> Option<Record>
    where
        F: Fn(&Scorer<'_>, &Item) -> Option<Record>,
    {
        match catch_unwind(AssertUnwindSafe(|| score(scorer, &item))) {
            Ok(record) => record,
            Err(panic) => {
                let message = format!(
                    "scoring spectrum {} failed: {}",
                    item.spectrum_id(),
                    panic_message(panic.as_ref())
                );
                log::error!("{}", message);
                self.failed.store(true, Ordering::SeqCst);
                lock(&self.messages).push(message.clone());
                Some(Record::interrupted(&item, message)).filter(|r| r.peptides() > 0)
            }
        }
    }

    /// Worker loop: runs until the source is exhausted and the queue drained,
    /// or until cancellation
    fn work<F>(&self, scorer: &Scorer<'_>, score: &F, results: SyncSender<Record>)
    where
        F: Fn(&Scorer<'_>, &Item) -> Option<Record>,
    {
        loop {
            if self.cancellation.is_cancelled() {
                return;
            }
            let package = match self.next_package() {
                Some(package) => package,
                None => {
                    if self.exhausted.load(Ordering::Acquire) && lock(&self.queue).is_empty() {
                        return;
                    }
                    self.refill();
                    continue;
                }
            };
            if self.queued.load(Ordering::Acquire) <= self.sizing.low_water {
                self.refill();
            }

            let mut ids = package.iter().map(Item::spectrum_id).collect::<Vec<_>>();
            ids.sort_unstable();
            ids.dedup();
            let peptides = package.iter().map(Item::peptides).sum::<usize>();
            let spectra = self.spectra.fetch_add(ids.len(), Ordering::AcqRel) + ids.len();
            let peptides = self.peptides.fetch_add(peptides, Ordering::AcqRel) + peptides;
            self.post(Progress::Counter { spectra, peptides });

            for item in package {
                if self.cancellation.is_cancelled() {
                    return;
                }
                if let Some(record) = self.localize(scorer, score, item) {
                    if results.send(record).is_err() {
                        self.fail("result channel closed before processing finished".into());
                        return;
                    }
                }
            }
        }
    }
}

/// Forward records to the external sink as they arrive
fn forward(results: Receiver<Record>, sink: SyncSender<Record>) -> usize {
    let mut forwarded = 0;
    for record in results {
        if sink.send(record).is_err() {
            log::warn!("result sink closed, discarding remaining records");
            break;
        }
        forwarded += 1;
    }
    forwarded
}

/// Concurrent localization of every PSM a data source delivers
pub struct Pipeline<'a, S> {
    settings: &'a Settings,
    registry: &'a ModificationRegistry,
    total: usize,
    shared: Shared<S>,
}

impl<'a, S: DataSource> Pipeline<'a, S> {
    /// Fails when the data source provides no progress sink
    pub fn new(
        settings: &'a Settings,
        registry: &'a ModificationRegistry,
        source: S,
    ) -> Result<Self, Error> {
        let progress = source.progress().ok_or(Error::MissingProgressSink)?;
        let total = source.total_spectra();
        let sizing = Sizing::new(total, rayon::current_num_threads(), settings.max_tasks);
        Ok(Pipeline {
            settings,
            registry,
            total,
            shared: Shared {
                source: Mutex::new(source),
                queue: Mutex::new(VecDeque::new()),
                queued: AtomicUsize::new(0),
                exhausted: AtomicBool::new(false),
                failed: AtomicBool::new(false),
                messages: Mutex::new(Vec::new()),
                cancellation: Cancellation::default(),
                spectra: AtomicUsize::new(0),
                peptides: AtomicUsize::new(0),
                progress,
                sizing,
            },
        })
    }

    /// Use an externally controlled cancellation signal
    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.shared.cancellation = cancellation;
        self
    }

    pub fn cancellation(&self) -> Cancellation {
        self.shared.cancellation.clone()
    }

    pub fn sizing(&self) -> Sizing {
        self.shared.sizing
    }

    fn announce(&self) {
        let sizing = self.shared.sizing;
        log::info!(
            "localizing {} spectra: {} spectra per package, {} workers",
            self.total,
            sizing.desired,
            sizing.workers
        );
        let post = |s: String| self.shared.post(Progress::Status(s));
        post(format!("Workload level: #spectra: {}", self.total));
        post(format!("#spectra per package: {}", sizing.desired));
        post(format!("#parallel tasks: {}", sizing.workers));
        for activation in Activation::ALL {
            post(format!(
                "FITs for {}: {}; FITs with NLs: {}",
                activation,
                self.settings.composition(activation),
                self.settings.neutral_loss_composition(activation)
            ));
        }
        self.shared.post(Progress::Counter {
            spectra: 0,
            peptides: 0,
        });
    }

    /// Score every PSM of the data source. Records are sent to `sink` as they
    /// complete; the sink is dropped (closing the channel) once all workers
    /// have finished.
    pub fn run(self, sink: SyncSender<Record>) -> Result<Summary, PipelineError> {
        self.run_with(sink, Record::from_item)
    }

    fn run_with<F>(self, sink: SyncSender<Record>, score: F) -> Result<Summary, PipelineError>
    where
        F: Fn(&Scorer<'_>, &Item) -> Option<Record> + Sync,
    {
        let start = Instant::now();
        let workers = self.shared.sizing.workers;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("ptmrs-worker-{}", i))
            .build()
            .map_err(|e| PipelineError::Workers(e.to_string()))?;

        self.announce();
        let scorer = Scorer::new(self.settings, self.registry);
        let shared = &self.shared;
        let (tx, rx) = sync_channel::<Record>(RESULT_CAPACITY);

        let forwarded = std::thread::scope(|scope| {
            let consumer = scope.spawn(move || forward(rx, sink));
            pool.scope(|s| {
                for _ in 0..workers {
                    let tx = tx.clone();
                    let (scorer, score) = (&scorer, &score);
                    s.spawn(move |_| shared.work(scorer, score, tx));
                }
            });
            drop(tx);
            consumer.join()
        });
        let records = match forwarded {
            Ok(n) => n,
            Err(panic) => {
                shared.fail(format!(
                    "result forwarding failed: {}",
                    panic_message(panic.as_ref())
                ));
                0
            }
        };

        let spectra = shared.spectra.load(Ordering::Acquire);
        let elapsed = start.elapsed().as_millis().max(1) as usize;
        log::info!(
            "localized {} spectra in {}ms ({} spectra/s)",
            spectra,
            elapsed,
            spectra * 1000 / elapsed
        );

        let failed = shared.failed.load(Ordering::Acquire);
        if shared.cancellation.is_cancelled() && !failed {
            return Err(PipelineError::Cancelled);
        }
        Ok(Summary {
            error_happened: failed,
            messages: std::mem::take(&mut *lock(&shared.messages)),
            spectra,
            peptides: shared.peptides.load(Ordering::Acquire),
            records,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::modification::Definition;
    use crate::peptide::Peptide;
    use crate::psm::{Candidate, Psm};

    struct Batches {
        batches: VecDeque<Vec<Package>>,
        total: usize,
        progress: Option<SyncSender<Progress>>,
        fail: bool,
        panics: bool,
    }

    impl DataSource for Batches {
        fn total_spectra(&self) -> usize {
            self.total
        }

        fn fetch(&mut self, _: usize) -> Result<Option<Fetched>, String> {
            if self.fail {
                return Err("disk on fire".into());
            }
            if self.panics {
                panic!("truncated record");
            }
            Ok(self.batches.pop_front().map(|packages| Fetched {
                spectra: packages.iter().map(Vec::len).sum(),
                peptides: packages.iter().map(Vec::len).sum(),
                packages,
            }))
        }

        fn progress(&self) -> Option<SyncSender<Progress>> {
            self.progress.clone()
        }
    }

    fn registry() -> ModificationRegistry {
        ModificationRegistry::from_definitions(vec![Definition {
            id: 1,
            name: Some("Phospho".into()),
            mass: 79.966331,
            targets: vec!["S".into()],
            ..Default::default()
        }])
    }

    fn package(registry: &ModificationRegistry, first: usize, n: usize) -> Package {
        (first..first + n)
            .map(|id| {
                let peptide = Peptide::from_modification_map(id, "SAS", "0,1,1", registry).unwrap();
                Item::Psm {
                    psm: Psm {
                        spectrum_id: id,
                        peptide: peptide.clone(),
                        activation: Activation::Hcd,
                        charge: 2,
                        precursor_mz: 200.0,
                        peaks: vec![],
                    },
                    candidates: vec![Candidate {
                        peptide_id: id,
                        peptide,
                    }],
                }
            })
            .collect()
    }

    #[test]
    fn sizing() {
        let sizing = Sizing::new(100, 4, None);
        assert_eq!(sizing.desired, Sizing::MIN_DESIRED);
        assert_eq!(sizing.low_water, 12_000);
        assert_eq!(sizing.workers, 4);

        let sizing = Sizing::new(10_000_000, 32, Some(2));
        assert_eq!(sizing.desired, Sizing::BOUNDARY * 32);
        assert_eq!(sizing.workers, 2);
        assert_eq!(Sizing::new(10, 2, Some(8)).workers, 2);
        assert_eq!(Sizing::new(10, 0, Some(0)).workers, 1);
    }

    #[test]
    fn missing_progress_sink() {
        let registry = registry();
        let settings = Settings::default();
        let source = Batches {
            batches: VecDeque::new(),
            total: 0,
            progress: None,
            fail: false,
            panics: false,
        };
        assert!(matches!(
            Pipeline::new(&settings, &registry, source),
            Err(Error::MissingProgressSink)
        ));
    }

    #[test]
    fn every_psm_scored_once() {
        let registry = registry();
        let settings = Settings::default();
        let (ptx, prx) = sync_channel(1024);
        let source = Batches {
            batches: vec![
                vec![package(&registry, 0, 5), package(&registry, 5, 3)],
                vec![package(&registry, 8, 4)],
            ]
            .into(),
            total: 12,
            progress: Some(ptx),
            fail: false,
            panics: false,
        };
        let (tx, rx) = sync_channel(64);
        let pipeline = Pipeline::new(&settings, &registry, source).unwrap();
        let summary = pipeline.run(tx).unwrap();

        let mut ids = rx.iter().map(|r| r.spectrum_id()).collect::<Vec<_>>();
        ids.sort_unstable();
        assert_eq!(ids, (0..12).collect::<Vec<_>>());
        assert!(!summary.error_happened);
        assert_eq!(summary.spectra, 12);
        assert_eq!(summary.records, 12);

        let messages = prx.try_iter().collect::<Vec<_>>();
        assert_eq!(
            messages[0],
            Progress::Status("Workload level: #spectra: 12".into())
        );
        assert!(messages.contains(&Progress::Status("Finished collecting spectra".into())));
        // counters are cumulative; the last package dequeued reports the total
        assert!(messages
            .iter()
            .any(|m| matches!(m, Progress::Counter { spectra: 12, .. })));
    }

    #[test]
    fn cancelled_before_start() {
        let registry = registry();
        let settings = Settings::default();
        let (ptx, _prx) = sync_channel(1024);
        let source = Batches {
            batches: vec![vec![package(&registry, 0, 5)]].into(),
            total: 5,
            progress: Some(ptx),
            fail: false,
            panics: false,
        };
        let cancellation = Cancellation::default();
        cancellation.cancel();
        let (tx, rx) = sync_channel(64);
        let pipeline = Pipeline::new(&settings, &registry, source)
            .unwrap()
            .with_cancellation(cancellation);
        assert_eq!(pipeline.run(tx).unwrap_err(), PipelineError::Cancelled);
        assert_eq!(rx.iter().count(), 0);
    }

    #[test]
    fn source_failure() {
        let registry = registry();
        let settings = Settings::default();
        let (ptx, _prx) = sync_channel(1024);
        let source = Batches {
            batches: VecDeque::new(),
            total: 5,
            progress: Some(ptx),
            fail: true,
            panics: false,
        };
        let (tx, rx) = sync_channel(64);
        let summary = Pipeline::new(&settings, &registry, source)
            .unwrap()
            .run(tx)
            .unwrap();
        assert!(summary.error_happened);
        assert_eq!(summary.messages, vec!["failed to fetch spectra: disk on fire".to_string()]);
        assert_eq!(rx.iter().count(), 0);
    }

    #[test]
    fn source_panic() {
        let registry = registry();
        let settings = Settings::default();
        let (ptx, _prx) = sync_channel(1024);
        let source = Batches {
            batches: vec![vec![package(&registry, 0, 5)]].into(),
            total: 5,
            progress: Some(ptx),
            fail: false,
            panics: true,
        };
        let (tx, rx) = sync_channel(64);
        let summary = Pipeline::new(&settings, &registry, source)
            .unwrap()
            .run(tx)
            .unwrap();
        assert!(summary.error_happened);
        assert_eq!(summary.messages, vec!["data source panicked: truncated record".to_string()]);
        assert_eq!(summary.spectra, 0);
        assert_eq!(rx.iter().count(), 0);
    }

    #[test]
    fn scoring_panic_becomes_error_record() {
        let registry = registry();
        let settings = Settings::default();
        let (ptx, _prx) = sync_channel(1024);
        let source = Batches {
            batches: vec![vec![package(&registry, 0, 4), package(&registry, 4, 2)]].into(),
            total: 6,
            progress: Some(ptx),
            fail: false,
            panics: false,
        };
        let (tx, rx) = sync_channel(64);
        let summary = Pipeline::new(&settings, &registry, source)
            .unwrap()
            .run_with(tx, |scorer, item| {
                if item.spectrum_id() == 2 {
                    panic!("no peaks to rank");
                }
                Record::from_item(scorer, item)
            })
            .unwrap();

        let mut records = rx.iter().collect::<Vec<_>>();
        records.sort_by_key(Record::spectrum_id);
        assert_eq!(records.len(), 6);
        assert_eq!(summary.records, 6);
        assert!(summary.error_happened);

        let message = "scoring spectrum 2 failed: no peaks to rank".to_string();
        assert_eq!(summary.messages, vec![message.clone()]);
        assert_eq!(
            records[2],
            Record::Error {
                sequence_id: 2,
                spectrum_id: 2,
                message,
                peptide_ids: vec![2],
            }
        );
        assert_eq!(records.iter().filter(|r| r.is_error()).count(), 1);
    }

    #[test]
    fn cancelled_mid_run() {
        let registry = registry();
        let settings = Settings::default();
        let (ptx, _prx) = sync_channel(1024);
        let total = 4000;
        let source = Batches {
            batches: (0..total / 100)
                .map(|i| vec![package(&registry, i * 100, 100)])
                .collect(),
            total,
            progress: Some(ptx),
            fail: false,
            panics: false,
        };
        let pipeline = Pipeline::new(&settings, &registry, source).unwrap();
        let cancellation = pipeline.cancellation();
        let workers = pipeline.sizing().workers;
        let (tx, rx) = sync_channel(1);

        let (result, received) = std::thread::scope(|s| {
            // cancel as soon as the first record arrives, then keep draining
            // until the pipeline closes the sink
            let consumer = s.spawn(move || {
                let mut received = 0;
                for _ in rx.iter() {
                    received += 1;
                    cancellation.cancel();
                }
                received
            });
            let result = pipeline.run(tx);
            (result, consumer.join().unwrap())
        });
        assert_eq!(result.unwrap_err(), PipelineError::Cancelled);
        assert!(received >= 1);
        // workers stall once the result buffers fill, so most packages are
        // still queued when cancellation lands
        assert!(received <= RESULT_CAPACITY + workers + 2, "{} records", received);
        assert!(received < total);
    }
}
