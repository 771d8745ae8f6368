//! The caller-facing ingestion session.
//!
//! ```text
//!  push() ──validate──> record queue ──> assembler ──> batch queue ──> dispatcher ──> target
//!     │                                                                   │
//!     └── rejections ──────────> ResultCollector <──────── outcomes ──────┘
//! ```
//!
//! Both queues are bounded, so a slow target eventually suspends `push`.
use std::sync::Arc;

use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::{
    assembler::BatchAssembler,
    batch::Batch,
    collector::{OutcomeTotals, ResultCollector},
    config::SessionConfig,
    dispatcher::{DispatchCounters, DispatchStats, Dispatcher, DispatcherClient},
    error::{IngestError, Result, SessionClosedSnafu, TaskJoinSnafu},
    flow::{FlowController, FlowPolicy, FlowReader, FlowState, InverseLoadPolicy},
    metrics::IngestionMetrics,
    record::{FailureReason, Outcome, Record, RejectReason, ValidRecord},
    schema::SchemaRef,
    target::IngestionTarget,
    validator::RecordValidator,
};

/// What happened to a pushed record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The record is queued and will get an outcome once dispatched.
    Admitted,
    /// The record was refused. The same reason is reported as its outcome.
    Rejected(RejectReason),
}

pub struct Session {
    id: Ulid,
    records_tx: mpsc::Sender<ValidRecord>,
    validator: RecordValidator,
    collector: ResultCollector,
    flow: FlowReader,
    counters: Arc<DispatchCounters>,
    metrics: Arc<IngestionMetrics>,
    ct: CancellationToken,
    assembler_task: JoinHandle<()>,
    dispatcher_task: JoinHandle<()>,
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted)
    }
}

impl Session {
    /// Opens a session with the default flow policy.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(
        config: SessionConfig,
        schema: SchemaRef,
        target: Arc<dyn IngestionTarget>,
    ) -> Result<Self> {
        let policy = Arc::new(InverseLoadPolicy::new(config.reference_load));
        Self::open_with_policy(config, schema, target, policy)
    }

    pub fn open_with_policy(
        config: SessionConfig,
        schema: SchemaRef,
        target: Arc<dyn IngestionTarget>,
        policy: Arc<dyn FlowPolicy>,
    ) -> Result<Self> {
        config.validate()?;

        let id = Ulid::new();
        let ct = CancellationToken::new();
        let collector = ResultCollector::new();
        let metrics = Arc::new(IngestionMetrics::default());

        let flow = FlowController::with_policy(&config, policy);
        let reader = flow.reader();
        let assembler = BatchAssembler::new(&config, reader.clone());

        let dispatcher = Dispatcher::new(
            &config,
            target,
            flow,
            collector.clone(),
            metrics.clone(),
        );
        let counters = dispatcher.counters();
        let client = dispatcher.client();

        let (records_tx, records_rx) = mpsc::channel(config.record_queue_capacity);

        let dispatcher_task = tokio::spawn(dispatcher.run());
        let assembler_task = tokio::spawn(run_assembler(
            id,
            assembler,
            records_rx,
            client,
            collector.clone(),
            metrics.clone(),
            ct.clone(),
        ));

        info!(
            session_id = %id,
            max_batch_size = config.max_batch_size,
            max_concurrency = config.max_concurrency,
            "session opened"
        );

        Ok(Self {
            id,
            records_tx,
            validator: RecordValidator::new(schema),
            collector,
            flow: reader,
            counters,
            metrics,
            ct,
            assembler_task,
            dispatcher_task,
        })
    }

    pub fn id(&self) -> Ulid {
        self.id
    }

    /// Validates a record and queues it for dispatch.
    ///
    /// Suspends while the record queue is full. Returns an error if the
    /// sequence number is not greater than the previous one, in which case
    /// the record gets no outcome.
    pub async fn push(&self, record: Record) -> Result<Admission> {
        let seq = record.seq;
        self.collector.register(seq)?;

        if self.ct.is_cancelled() {
            return Ok(self.reject(seq, RejectReason::SessionCancelled));
        }

        let record = match self.validator.validate(record) {
            Ok(record) => record,
            Err(error) => {
                debug!(session_id = %self.id, seq, error = %error, "record rejected");
                return Ok(self.reject(seq, error.into()));
            }
        };

        if self.records_tx.send(record).await.is_err() {
            if self.ct.is_cancelled() {
                return Ok(self.reject(seq, RejectReason::SessionCancelled));
            }

            self.collector
                .record(Outcome::failed(seq, FailureReason::SessionClosed));
            self.metrics.failed_records.add(1, &[]);
            return SessionClosedSnafu {}.fail();
        }

        Ok(Admission::Admitted)
    }

    /// Stops admitting records.
    ///
    /// Records already admitted are still dispatched.
    pub fn cancel(&self) {
        if !self.ct.is_cancelled() {
            info!(session_id = %self.id, "session cancelled");
        }
        self.ct.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.ct.is_cancelled()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.ct.clone()
    }

    /// Takes the outcomes recorded since the last drain.
    pub fn drain(&self) -> Vec<Outcome> {
        self.collector.drain()
    }

    /// Returns a channel receiving every outcome recorded from now on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Outcome> {
        self.collector.subscribe()
    }

    /// Waits until every record pushed so far has an outcome.
    pub async fn wait_complete(&self) {
        self.collector.wait_complete().await
    }

    pub fn flow(&self) -> FlowState {
        self.flow.state()
    }

    pub fn stats(&self) -> DispatchStats {
        self.counters.snapshot()
    }

    pub fn totals(&self) -> OutcomeTotals {
        self.collector.totals()
    }

    /// Flushes the last batch, waits for every batch to resolve and returns
    /// the outcomes not taken by [`Self::drain`].
    pub async fn finish(self) -> Result<Vec<Outcome>> {
        let Self {
            id,
            records_tx,
            collector,
            counters,
            metrics,
            assembler_task,
            dispatcher_task,
            ..
        } = self;

        drop(records_tx);

        let assembler = assembler_task.await;
        let dispatcher = dispatcher_task.await;

        let orphaned = fail_orphans(&collector, &metrics);
        if orphaned > 0 {
            warn!(session_id = %id, orphaned, "records left without an outcome");
        }

        assembler.map_err(join_error)?;
        dispatcher.map_err(join_error)?;

        let totals = collector.totals();
        let stats = counters.snapshot();
        info!(
            session_id = %id,
            accepted = totals.accepted,
            rejected = totals.rejected,
            failed = totals.failed,
            batches = stats.batches,
            retries = stats.retries,
            "session finished"
        );

        Ok(collector.drain())
    }

    fn reject(&self, seq: u64, reason: RejectReason) -> Admission {
        self.collector.record(Outcome::rejected(seq, reason.clone()));
        self.metrics.rejected_records.add(1, &[]);
        Admission::Rejected(reason)
    }
}

/// Fails every record still without an outcome once the pipeline stopped.
fn fail_orphans(collector: &ResultCollector, metrics: &IngestionMetrics) -> usize {
    let orphaned = collector.fail_pending(FailureReason::SessionClosed);
    metrics.record_outcomes(OutcomeTotals {
        failed: orphaned as u64,
        ..Default::default()
    });
    orphaned
}

fn join_error(err: tokio::task::JoinError) -> IngestError {
    TaskJoinSnafu {
        message: err.to_string(),
    }
    .build()
}

async fn run_assembler(
    session_id: Ulid,
    mut assembler: BatchAssembler,
    mut rx: mpsc::Receiver<ValidRecord>,
    dispatcher: DispatcherClient,
    collector: ResultCollector,
    metrics: Arc<IngestionMetrics>,
    ct: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = ct.cancelled() => {
                // Admitted records are still dispatched.
                rx.close();
                while let Some(record) = rx.recv().await {
                    if let Some(batch) = assembler.push(record) {
                        forward(&dispatcher, &collector, &metrics, batch).await;
                    }
                }
                break;
            }
            expired = assembler.expired(), if assembler.has_pending_timer() => {
                let Some(batch) = expired else {
                    continue;
                };

                debug!(
                    session_id = %session_id,
                    batch_id = batch.id(),
                    records = batch.len(),
                    "batch expired"
                );
                forward(&dispatcher, &collector, &metrics, batch).await;
            }
            record = rx.recv() => {
                let Some(record) = record else {
                    break;
                };

                if let Some(batch) = assembler.push(record) {
                    forward(&dispatcher, &collector, &metrics, batch).await;
                }
            }
        }
    }

    if let Some(batch) = assembler.finish() {
        forward(&dispatcher, &collector, &metrics, batch).await;
    }

    debug!(session_id = %session_id, "assembler stopped");
}

async fn forward(
    dispatcher: &DispatcherClient,
    collector: &ResultCollector,
    metrics: &IngestionMetrics,
    batch: Batch,
) {
    let Err(batch) = dispatcher.enqueue(batch).await else {
        return;
    };

    warn!(batch_id = batch.id(), records = batch.len(), "dispatcher is gone, failing batch");

    for seq in batch.sequence_numbers() {
        if collector.record(Outcome::failed(seq, FailureReason::SessionClosed)) {
            metrics.failed_records.add(1, &[]);
        }
    }
}
