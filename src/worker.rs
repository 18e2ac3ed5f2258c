use std::sync::Arc;

use async_channel::Receiver;
use rand::rngs::StdRng;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::identity::{Identity, IdentityPool};
use crate::request::Fetcher;
use crate::tasks::{RetryHandle, Task};
use crate::{FailureKind, Payload, Result, Timing, RATE_LIMIT_REROLL_THRESHOLD};

/// Channels a worker reads from and writes to.
pub(crate) struct WorkerLinks {
    pub tasks: Receiver<Task>,
    pub results: mpsc::Sender<Payload>,
    pub skipped: mpsc::Sender<i64>,
    pub retry: RetryHandle,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WorkerReport {
    pub successes: u64,
    pub failures: u64,
    pub rerolls: u64,
}

/// What a worker does with its identity after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FailureAction {
    pub reroll: bool,
    pub cool_off: bool,
}

/// Updates the consecutive soft failure count for `kind` and decides what happens next.
///
/// Transport errors and hard blocks reroll straight away. Rate limiting rerolls once
/// `RATE_LIMIT_REROLL_THRESHOLD` responses in a row have been throttled. Anything else
/// isn't held against the identity.
pub(crate) fn failure_action(soft_failures: &mut u32, kind: &FailureKind) -> FailureAction {
    if matches!(kind, FailureKind::Transport(_)) || kind.is_hard_block() {
        *soft_failures = 0;
        return FailureAction {
            reroll: true,
            cool_off: false,
        };
    }

    if kind.is_rate_limited() {
        *soft_failures += 1;
        let reroll = *soft_failures >= RATE_LIMIT_REROLL_THRESHOLD;
        if reroll {
            *soft_failures = 0;
        }
        return FailureAction {
            reroll,
            cool_off: true,
        };
    }

    *soft_failures = 0;
    FailureAction {
        reroll: false,
        cool_off: true,
    }
}

pub(crate) struct Worker {
    id: usize,
    identity: Identity,
    pool: Arc<IdentityPool>,
    rng: StdRng,
    fetcher: Arc<Fetcher>,
    timing: Timing,
    soft_failures: u32,
    report: WorkerReport,
}

impl Worker {
    pub(crate) fn new(
        id: usize,
        pool: Arc<IdentityPool>,
        mut rng: StdRng,
        fetcher: Arc<Fetcher>,
        timing: Timing,
    ) -> Result<Self> {
        let identity = pool.draw(&mut rng)?;
        debug!(worker = id, route = ?identity.route(), "worker identity drawn");
        Ok(Self {
            id,
            identity,
            pool,
            rng,
            fetcher,
            timing,
            soft_failures: 0,
            report: WorkerReport::default(),
        })
    }

    /// Works through tasks until the task stream is closed and drained.
    /// Errors only if one of the sinks has gone away.
    pub(crate) async fn run(mut self, links: WorkerLinks) -> Result<WorkerReport> {
        while let Ok(task) = links.tasks.recv().await {
            let offset = task.offset();

            match self.fetcher.fetch(&self.identity, offset).await {
                Ok(payload) => {
                    self.soft_failures = 0;
                    task.release();
                    links.results.send(payload).await?;
                    self.report.successes += 1;
                    info!(worker = self.id, offset, "batch scraped");
                    sleep(self.timing.polite_interval).await;
                }
                Err(kind) => {
                    warn!(worker = self.id, offset, error = %kind, "batch skipped, will retry");
                    links.skipped.send(offset).await?;
                    if !links.retry.offer(offset) {
                        debug!(worker = self.id, offset, "task source gone, not re-queued");
                    }
                    task.release();
                    self.report.failures += 1;

                    let action = failure_action(&mut self.soft_failures, &kind);
                    if action.reroll {
                        self.reroll();
                    }
                    if action.cool_off {
                        sleep(self.timing.retry_cool_off).await;
                    }
                }
            }
        }

        debug!(worker = self.id, report = ?self.report, "worker done");
        Ok(self.report)
    }

    /// Swaps in a freshly drawn, different identity.
    /// Keeps the current one if the new client can't be built.
    fn reroll(&mut self) {
        match self.pool.redraw(&self.identity, &mut self.rng) {
            Ok(identity) => {
                info!(worker = self.id, route = ?identity.route(), "re-rolled worker identity");
                self.identity = identity;
                self.report.rerolls += 1;
            }
            Err(e) => warn!(worker = self.id, error = %e, "couldn't re-roll identity, keeping current"),
        }
    }
}
