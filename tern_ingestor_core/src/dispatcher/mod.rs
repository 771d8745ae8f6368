//! Submission of sealed batches to the ingestion target.
//!
//! The [`Dispatcher`] runs as a background task. It receives batches from a
//! bounded queue, keeps at most `concurrency_budget` of them in flight, feeds
//! the observed load back to the flow controller and attributes the target's
//! response to individual records.
use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use futures::{StreamExt, stream::FuturesUnordered};
use tokio::{
    sync::{mpsc, oneshot},
    time::Instant,
};
use tracing::{debug, warn};

use crate::{
    batch::{Batch, BatchId},
    collector::{OutcomeTotals, ResultCollector},
    config::SessionConfig,
    error::{DispatchError, Result, SessionClosedSnafu},
    flow::{FlowController, LoadSample},
    metrics::IngestionMetrics,
    record::{FailureReason, Outcome},
    target::{IngestionTarget, RecordStatus, SubmitResponse},
};

pub use self::retry::RetryPolicy;

mod retry;

pub struct Dispatcher {
    tx: mpsc::Sender<BatchWithReply>,
    rx: mpsc::Receiver<BatchWithReply>,
    target: Arc<dyn IngestionTarget>,
    flow: FlowController,
    collector: ResultCollector,
    retry: RetryPolicy,
    counters: Arc<DispatchCounters>,
    metrics: Arc<IngestionMetrics>,
}

/// Handle used to hand batches to a running [`Dispatcher`].
#[derive(Clone)]
pub struct DispatcherClient {
    tx: mpsc::Sender<BatchWithReply>,
}

pub struct BatchWithReply {
    pub batch: Batch,
    pub reply: Option<oneshot::Sender<BatchResult>>,
}

/// Summary of a resolved batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchResult {
    pub batch_id: BatchId,
    pub accepted: usize,
    pub failed: usize,
    pub attempts: u32,
    pub retries: u32,
}

/// Dispatcher instrumentation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Batches admitted for dispatch.
    pub batches: u64,
    /// Attempts beyond the first one, over all batches.
    pub retries: u64,
    /// Highest number of batches in flight at once.
    pub max_in_flight: usize,
    /// Times the batches in flight outnumbered the published budget, checked
    /// after every admission and every budget update.
    pub budget_violations: u64,
}

#[derive(Debug, Default)]
pub struct DispatchCounters {
    batches: AtomicU64,
    retries: AtomicU64,
    max_in_flight: AtomicUsize,
    budget_violations: AtomicU64,
}

struct CompletedBatch {
    batch: Batch,
    reply: Option<oneshot::Sender<BatchResult>>,
    attempts: u32,
    result: std::result::Result<SubmitResponse, DispatchError>,
    /// Duration of the last attempt.
    latency: Duration,
    /// Time since the first attempt started, including backoff.
    elapsed: Duration,
}

impl Dispatcher {
    /// Creates a new dispatcher.
    ///
    /// The records of every batch sent to the dispatcher must be registered
    /// with `collector`.
    pub fn new(
        config: &SessionConfig,
        target: Arc<dyn IngestionTarget>,
        flow: FlowController,
        collector: ResultCollector,
        metrics: Arc<IngestionMetrics>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.batch_queue_capacity);

        Self {
            tx,
            rx,
            target,
            flow,
            collector,
            retry: RetryPolicy::from_config(config),
            counters: Arc::default(),
            metrics,
        }
    }

    pub fn client(&self) -> DispatcherClient {
        DispatcherClient {
            tx: self.tx.clone(),
        }
    }

    pub fn counters(&self) -> Arc<DispatchCounters> {
        self.counters.clone()
    }

    /// Runs until every client is dropped and all in-flight batches resolve.
    pub async fn run(self) {
        let Self {
            tx,
            mut rx,
            target,
            mut flow,
            collector,
            retry,
            counters,
            metrics,
        } = self;

        // Only clients keep the queue open.
        drop(tx);

        let mut in_flight = FuturesUnordered::new();
        let mut closed = false;

        metrics.record_flow_target(flow.current_target());

        loop {
            let budget = flow.current_target().concurrency_budget;

            tokio::select! {
                batch_with_reply = rx.recv(), if !closed && in_flight.len() < budget => {
                    let Some(BatchWithReply { batch, reply }) = batch_with_reply else {
                        closed = true;
                        continue;
                    };

                    let admitted = in_flight.len() + 1;
                    counters.admit(admitted);
                    counters.check_budget(admitted, budget);
                    collector.mark_dispatched(batch.sequence_numbers());

                    debug!(
                        batch_id = batch.id(),
                        records = batch.len(),
                        in_flight = admitted,
                        budget,
                        "dispatching batch"
                    );

                    in_flight.push(dispatch_batch(target.clone(), retry, batch, reply));
                }
                completed = in_flight.next(), if !in_flight.is_empty() => {
                    let Some(completed) = completed else {
                        continue;
                    };

                    complete_batch(
                        completed,
                        in_flight.len(),
                        &mut flow,
                        &collector,
                        &counters,
                        &metrics,
                    );
                }
                else => break,
            }
        }

        debug!("dispatcher stopped");
    }
}

impl DispatcherClient {
    /// Submits a batch and waits for it to resolve.
    ///
    /// Suspends while the batch queue is full.
    pub async fn submit(&self, batch: Batch) -> Result<BatchResult> {
        let (tx, rx) = oneshot::channel();

        self.tx
            .send(BatchWithReply {
                batch,
                reply: Some(tx),
            })
            .await
            .or_else(|_| SessionClosedSnafu {}.fail())?;

        rx.await.or_else(|_| SessionClosedSnafu {}.fail())
    }

    /// Queues a batch without waiting for it to resolve.
    ///
    /// Returns the batch if the dispatcher is gone.
    pub async fn enqueue(&self, batch: Batch) -> std::result::Result<(), Batch> {
        self.tx
            .send(BatchWithReply { batch, reply: None })
            .await
            .map_err(|err| err.0.batch)
    }
}

impl DispatchCounters {
    fn admit(&self, in_flight: usize) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.max_in_flight.fetch_max(in_flight, Ordering::Relaxed);
    }

    fn check_budget(&self, in_flight: usize, budget: usize) {
        if in_flight > budget {
            warn!(in_flight, budget, "batches in flight exceed the concurrency budget");
            self.budget_violations.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn add_retries(&self, retries: u32) {
        self.retries.fetch_add(retries as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            batches: self.batches.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            max_in_flight: self.max_in_flight.load(Ordering::Relaxed),
            budget_violations: self.budget_violations.load(Ordering::Relaxed),
        }
    }
}

async fn dispatch_batch(
    target: Arc<dyn IngestionTarget>,
    retry: RetryPolicy,
    batch: Batch,
    reply: Option<oneshot::Sender<BatchResult>>,
) -> CompletedBatch {
    let started = Instant::now();
    let mut attempts = 0;

    loop {
        if attempts > 0 {
            tokio::time::sleep(retry.backoff(attempts)).await;
        }

        attempts += 1;
        let attempt_started = Instant::now();

        let result =
            match tokio::time::timeout(retry.per_attempt_timeout, target.submit_batch(&batch))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(DispatchError::Timeout {
                    timeout: retry.per_attempt_timeout,
                }),
            };

        let latency = attempt_started.elapsed();

        match result {
            Err(err) if err.is_retryable() && retry.should_retry(attempts) => {
                warn!(
                    batch_id = batch.id(),
                    attempt = attempts,
                    backoff_ms = retry.backoff(attempts).as_millis() as u64,
                    err = %err,
                    "batch dispatch failed, retrying"
                );
            }
            result => {
                return CompletedBatch {
                    batch,
                    reply,
                    attempts,
                    result,
                    latency,
                    elapsed: started.elapsed(),
                };
            }
        }
    }
}

fn complete_batch(
    completed: CompletedBatch,
    in_flight: usize,
    flow: &mut FlowController,
    collector: &ResultCollector,
    counters: &DispatchCounters,
    metrics: &IngestionMetrics,
) {
    let CompletedBatch {
        batch,
        reply,
        attempts,
        result,
        latency,
        elapsed,
    } = completed;

    let sample = match &result {
        Ok(SubmitResponse {
            queue_depth_hint: Some(depth),
            ..
        }) => LoadSample::from_queue_depth(*depth),
        _ => LoadSample::from_latency(latency),
    };
    flow.observe(sample, in_flight);
    let target = flow.current_target();
    counters.check_budget(in_flight, target.concurrency_budget);
    metrics.record_flow_target(target);

    if let Err(err) = &result {
        warn!(batch_id = batch.id(), attempts, err = %err, "batch dispatch failed");
    }

    let mut delta = OutcomeTotals::default();
    for outcome in attribute_outcomes(&batch, attempts, result) {
        let accepted = outcome.is_accepted();
        if collector.record(outcome) {
            if accepted {
                delta.accepted += 1;
            } else {
                delta.failed += 1;
            }
        }
    }

    let retries = attempts.saturating_sub(1);
    counters.add_retries(retries);
    metrics.batches.add(1, &[]);
    if retries > 0 {
        metrics.retries.add(retries as u64, &[]);
    }
    metrics
        .batch_latency
        .record(elapsed.as_secs_f64() * 1_000.0, &[]);
    metrics.record_outcomes(delta);

    debug!(
        batch_id = batch.id(),
        accepted = delta.accepted,
        failed = delta.failed,
        attempts,
        elapsed_ms = elapsed.as_millis() as u64,
        "batch resolved"
    );

    if let Some(reply) = reply {
        let _ = reply.send(BatchResult {
            batch_id: batch.id(),
            accepted: delta.accepted as usize,
            failed: delta.failed as usize,
            attempts,
            retries,
        });
    }
}

/// Turns the final result of a batch into one outcome per record, in batch
/// order.
pub fn attribute_outcomes(
    batch: &Batch,
    attempts: u32,
    result: std::result::Result<SubmitResponse, DispatchError>,
) -> Vec<Outcome> {
    let failure = match result {
        Ok(response) if response.statuses.len() == batch.len() => {
            return batch
                .sequence_numbers()
                .zip(response.statuses)
                .map(|(seq, status)| match status {
                    RecordStatus::Accepted => Outcome::accepted(seq),
                    RecordStatus::Rejected { message } => {
                        Outcome::failed(seq, FailureReason::RejectedByTarget { message })
                    }
                })
                .collect();
        }
        Ok(response) => FailureReason::Permanent {
            message: format!(
                "target returned {} statuses for a batch of {} records",
                response.statuses.len(),
                batch.len()
            ),
        },
        Err(err) if err.is_retryable() => FailureReason::RetriesExhausted {
            attempts,
            message: err.to_string(),
        },
        Err(err) => FailureReason::Permanent {
            message: err.to_string(),
        },
    };

    batch
        .sequence_numbers()
        .map(|seq| Outcome::failed(seq, failure.clone()))
        .collect()
}
