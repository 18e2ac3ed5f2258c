//! Batch offset admission: failed batches first, fresh territory second, never more
//! outstanding batches than there are admission slots.

use std::collections::VecDeque;
use std::sync::Arc;

use async_channel::Sender;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{Result, STEP_SIZE};

/// One admitted batch. Holds its admission slot until released or dropped.
#[derive(Debug)]
pub struct Task {
    offset: i64,
    _slot: OwnedSemaphorePermit,
}

impl Task {
    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Gives the admission slot back to the source.
    pub fn release(self) {}
}

/// Lets workers hand failed offsets back for re-delivery.
#[derive(Debug, Clone)]
pub struct RetryHandle(mpsc::UnboundedSender<i64>);

impl RetryHandle {
    /// Returns `false` once the source is gone and nothing will re-deliver the offset.
    pub fn offer(&self, offset: i64) -> bool {
        self.0.send(offset).is_ok()
    }
}

/// What the source handed out before it closed the task stream.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SourceReport {
    pub fresh: u64,
    pub retried: u64,
}

enum Drain {
    Finished,
    Retry(i64),
}

pub struct TaskSource {
    next_fresh: Option<i64>,
    fresh_left: Option<u64>,
    slots: Arc<Semaphore>,
    capacity: u32,
    retry_tx: mpsc::UnboundedSender<i64>,
    retry_rx: mpsc::UnboundedReceiver<i64>,
    pending: VecDeque<i64>,
}

impl TaskSource {
    /// A source issuing `base`, `base + STEP_SIZE`, ... with `slots` admission slots.
    pub fn new(base: i64, slots: usize) -> Self {
        let capacity = u32::try_from(slots.max(1)).unwrap_or(u32::MAX);
        let (retry_tx, retry_rx) = mpsc::unbounded_channel();
        Self {
            next_fresh: Some(base),
            fresh_left: None,
            slots: Arc::new(Semaphore::new(capacity as usize)),
            capacity,
            retry_tx,
            retry_rx,
            pending: VecDeque::new(),
        }
    }

    /// Stops issuing fresh offsets after `limit` of them. Retries are still served.
    pub fn with_batch_limit(mut self, limit: Option<u64>) -> Self {
        self.fresh_left = limit;
        self
    }

    pub fn retry_handle(&self) -> RetryHandle {
        RetryHandle(self.retry_tx.clone())
    }

    pub fn slots(&self) -> Arc<Semaphore> {
        self.slots.clone()
    }

    /// Feeds `tasks` until `token` is cancelled, every consumer is gone, or the fresh
    /// offsets run out with no batch in flight and nothing left to retry.
    /// The task stream is closed on return.
    pub async fn run(mut self, tasks: Sender<Task>, token: CancellationToken) -> Result<SourceReport> {
        let mut report = SourceReport::default();

        loop {
            let slot = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                slot = self.slots.clone().acquire_owned() => slot?,
            };
            if token.is_cancelled() {
                break;
            }

            let offset = match self.next_retry() {
                Some(offset) => {
                    report.retried += 1;
                    offset
                }
                None => match self.next_fresh() {
                    Some(offset) => {
                        report.fresh += 1;
                        offset
                    }
                    None => {
                        drop(slot);
                        match self.drain(&token).await? {
                            Drain::Finished => break,
                            Drain::Retry(offset) => self.pending.push_back(offset),
                        }
                        continue;
                    }
                },
            };

            debug!(offset, "admitting batch");
            if tasks.send(Task { offset, _slot: slot }).await.is_err() {
                break;
            }
        }

        tasks.close();
        info!(fresh = report.fresh, retried = report.retried, "task source closed");
        Ok(report)
    }

    fn next_retry(&mut self) -> Option<i64> {
        self.pending
            .pop_front()
            .or_else(|| self.retry_rx.try_recv().ok())
    }

    fn next_fresh(&mut self) -> Option<i64> {
        if self.fresh_left == Some(0) {
            return None;
        }
        let offset = self.next_fresh?;
        self.next_fresh = offset.checked_add(STEP_SIZE);
        if let Some(left) = self.fresh_left.as_mut() {
            *left -= 1;
        }
        Some(offset)
    }

    /// Waits, with fresh offsets exhausted, for either a retry or an idle pool.
    async fn drain(&mut self, token: &CancellationToken) -> Result<Drain> {
        let all_slots = self.slots.clone().acquire_many_owned(self.capacity);
        tokio::select! {
            biased;
            _ = token.cancelled() => Ok(Drain::Finished),
            Some(offset) = self.retry_rx.recv() => Ok(Drain::Retry(offset)),
            idle = all_slots => {
                drop(idle?);
                // Workers offer retries before releasing their slot, so with every slot
                // back in hand the retry queue is final.
                match self.retry_rx.try_recv() {
                    Ok(offset) => Ok(Drain::Retry(offset)),
                    Err(_) => Ok(Drain::Finished),
                }
            }
        }
    }
}
