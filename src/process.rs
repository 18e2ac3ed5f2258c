use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use rand::{rngs::StdRng, SeedableRng};
use tokio::{sync::mpsc, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::identity::IdentityPool;
use crate::request::Fetcher;
use crate::sink::{results_to_file, skipped_path, skipped_to_file};
use crate::tasks::{SourceReport, TaskSource};
use crate::worker::{Worker, WorkerLinks, WorkerReport};
use crate::{
    bundled_user_agents, info_time, Error, Result, DEFAULT_ENDPOINT, FETCH_TIMEOUT,
    POLITE_INTERVAL, RETRY_COOL_OFF, STATUS_COOL_OFF, WORKERS,
};

/// Every pause the pipeline takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Total time allowed for one upstream call, body included.
    pub fetch_timeout: Duration,
    /// Forced pause inside the fetcher after a non-success status.
    pub status_cool_off: Duration,
    /// Pause a worker takes after a rate-limited, unexpected or malformed response.
    pub retry_cool_off: Duration,
    /// Pause after every successful batch.
    pub polite_interval: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            fetch_timeout: FETCH_TIMEOUT,
            status_cool_off: STATUS_COOL_OFF,
            retry_cool_off: RETRY_COOL_OFF,
            polite_interval: POLITE_INTERVAL,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HarvestConfig {
    /// First batch offset, usually the decoded starting id.
    pub base_offset: i64,
    /// Proxy urls to route through. Empty means direct connections.
    pub proxies: Vec<String>,
    pub user_agents: Vec<String>,
    /// Results file. Skipped offsets go to `<stem>_skipped.json` beside it.
    pub output: PathBuf,
    pub endpoint: String,
    pub workers: usize,
    /// Number of fresh batches to issue before winding down. `None` runs until cancelled.
    pub batch_limit: Option<u64>,
    pub timing: Timing,
    /// Seeds the identity draws. Worker `n` uses `seed + n`. `None` draws from entropy.
    pub seed: Option<u64>,
}

impl HarvestConfig {
    pub fn new(base_offset: i64, output: impl Into<PathBuf>) -> Self {
        Self {
            base_offset,
            proxies: Vec::new(),
            user_agents: bundled_user_agents(),
            output: output.into(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            workers: WORKERS,
            batch_limit: None,
            timing: Timing::default(),
            seed: None,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HarvestSummary {
    pub fresh_batches: u64,
    pub retried_batches: u64,
    pub successes: u64,
    pub failures: u64,
    pub rerolls: u64,
    pub results_written: u64,
    pub skipped_written: u64,
}

impl HarvestSummary {
    fn add_worker(&mut self, report: WorkerReport) {
        self.successes += report.successes;
        self.failures += report.failures;
        self.rerolls += report.rerolls;
    }

    fn add_source(&mut self, report: SourceReport) {
        self.fresh_batches = report.fresh;
        self.retried_batches = report.retried;
    }
}

/// Awaits a sink and winds the run down the moment it fails, whether or not a worker
/// ever tries to send to it again.
async fn cancel_on_error<F>(sink: F, run_token: CancellationToken) -> Result<u64>
where
    F: Future<Output = Result<u64>>,
{
    let res = sink.await;
    if let Err(e) = &res {
        error!(error = %e, "sink failed, shutting down");
        run_token.cancel();
    }
    res
}

/// Runs the whole pipeline until `token` is cancelled or the batch limit is used up,
/// then waits for in-flight batches and both sinks to finish.
///
/// A failing sink is fatal: the run is wound down and its error returned.
pub async fn harvest(config: HarvestConfig, token: CancellationToken) -> Result<HarvestSummary> {
    let start_time = Local::now();
    info_time!(
        "Started harvesting at offset {} with {} workers",
        config.base_offset,
        config.workers
    );

    let workers = config.workers.max(1);
    let timing = config.timing;
    let pool = Arc::new(IdentityPool::new(
        config.proxies,
        config.user_agents,
        timing.fetch_timeout,
    )?);
    let fetcher = Arc::new(Fetcher::new(config.endpoint, timing.status_cool_off));

    let (results_tx, results_rx) = mpsc::channel(workers);
    let (skipped_tx, skipped_rx) = mpsc::channel(workers * 2);

    // Cancelled on fatal errors too, without touching the caller's token.
    let run_token = token.child_token();
    let results_handle = tokio::spawn(cancel_on_error(
        results_to_file(results_rx, config.output.clone()),
        run_token.clone(),
    ));
    let skipped_handle = tokio::spawn(cancel_on_error(
        skipped_to_file(skipped_rx, skipped_path(&config.output)),
        run_token.clone(),
    ));

    let source = TaskSource::new(config.base_offset, workers).with_batch_limit(config.batch_limit);
    let (tasks_tx, tasks_rx) = async_channel::bounded(workers);

    let mut worker_set = JoinSet::new();
    for id in 0..workers {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(id as u64)),
            None => StdRng::from_entropy(),
        };
        let worker = Worker::new(id, pool.clone(), rng, fetcher.clone(), timing)?;
        let links = WorkerLinks {
            tasks: tasks_rx.clone(),
            results: results_tx.clone(),
            skipped: skipped_tx.clone(),
            retry: source.retry_handle(),
        };
        worker_set.spawn(worker.run(links));
    }
    drop((tasks_rx, results_tx, skipped_tx));

    let source_handle = tokio::spawn(source.run(tasks_tx, run_token.clone()));

    let mut summary = HarvestSummary::default();
    let mut first_error: Option<Error> = None;
    while let Some(joined) = worker_set.join_next().await {
        match joined.map_err(Error::from).and_then(|res| res) {
            Ok(report) => summary.add_worker(report),
            Err(e) => {
                error!(error = %e, "worker failed, shutting down");
                run_token.cancel();
                first_error.get_or_insert(e);
            }
        }
    }
    summary.add_source(source_handle.await??);

    // Sink errors name the real cause, so they win over the send errors workers saw.
    summary.results_written = results_handle.await??;
    summary.skipped_written = skipped_handle.await??;
    if let Some(e) = first_error {
        return Err(e);
    }

    info_time!(
        start_time,
        "Harvest finished: {} ok, {} skipped, {} re-rolls",
        summary.successes,
        summary.failures,
        summary.rerolls
    );
    Ok(summary)
}
