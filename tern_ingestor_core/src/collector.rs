//! Per-record outcome bookkeeping.
//!
//! The collector is the single authority on sequence numbers: every record is
//! registered before it enters the pipeline, and every registered record must
//! eventually receive exactly one terminal outcome.
use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use snafu::ensure;
use tokio::sync::{mpsc, watch};
use tracing::warn;

use crate::{
    error::{Result, SequenceNotMonotonicSnafu},
    record::{FailureReason, Outcome, OutcomeStatus},
};

/// Where a record is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    Submitted,
    Dispatched,
    Rejected,
    Accepted,
    Failed,
}

/// Outcome counts since the session started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeTotals {
    pub accepted: u64,
    pub rejected: u64,
    pub failed: u64,
}

#[derive(Clone)]
pub struct ResultCollector {
    inner: Arc<CollectorInner>,
}

struct CollectorInner {
    state: Mutex<CollectorState>,
    pending: watch::Sender<usize>,
}

#[derive(Default)]
struct CollectorState {
    records: HashMap<u64, RecordState>,
    last_registered: Option<u64>,
    pending: usize,
    buffer: Vec<Outcome>,
    subscribers: Vec<mpsc::UnboundedSender<Outcome>>,
    totals: OutcomeTotals,
}

impl RecordState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Accepted | Self::Failed)
    }

    fn accepts(self, status: &OutcomeStatus) -> bool {
        match (self, status) {
            (Self::Submitted, OutcomeStatus::Rejected(_)) => true,
            (Self::Dispatched, OutcomeStatus::Accepted) => true,
            (Self::Submitted | Self::Dispatched, OutcomeStatus::Failed(_)) => true,
            _ => false,
        }
    }
}

impl OutcomeTotals {
    pub fn total(&self) -> u64 {
        self.accepted + self.rejected + self.failed
    }
}

impl Default for ResultCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultCollector {
    pub fn new() -> Self {
        let (pending, _) = watch::channel(0);
        Self {
            inner: Arc::new(CollectorInner {
                state: Mutex::new(CollectorState::default()),
                pending,
            }),
        }
    }

    /// Registers a new record.
    ///
    /// Sequence numbers must be strictly increasing. A refused sequence
    /// number is not registered and does not need an outcome.
    pub fn register(&self, seq: u64) -> Result<()> {
        let mut state = self.inner.state.lock();

        if let Some(last) = state.last_registered {
            ensure!(seq > last, SequenceNotMonotonicSnafu { seq, last });
        }

        state.last_registered = Some(seq);
        state.records.insert(seq, RecordState::Submitted);
        state.pending += 1;
        self.inner.pending.send_replace(state.pending);

        Ok(())
    }

    /// Marks records as handed to the target.
    pub fn mark_dispatched(&self, sequences: impl IntoIterator<Item = u64>) {
        let mut state = self.inner.state.lock();
        for seq in sequences {
            if let Some(record @ RecordState::Submitted) = state.records.get_mut(&seq) {
                *record = RecordState::Dispatched;
            }
        }
    }

    /// Records a terminal outcome.
    ///
    /// Returns `false` and drops the outcome if the record is unknown or
    /// already has an outcome.
    pub fn record(&self, outcome: Outcome) -> bool {
        let mut state = self.inner.state.lock();

        let Some(current) = state.records.get(&outcome.seq).copied() else {
            warn!(seq = outcome.seq, outcome = %outcome, "dropping outcome for unknown record");
            return false;
        };

        if !current.accepts(&outcome.status) {
            warn!(
                seq = outcome.seq,
                state = ?current,
                outcome = %outcome,
                "dropping outcome for record in incompatible state"
            );
            return false;
        }

        let next = match outcome.status {
            OutcomeStatus::Accepted => {
                state.totals.accepted += 1;
                RecordState::Accepted
            }
            OutcomeStatus::Rejected(_) => {
                state.totals.rejected += 1;
                RecordState::Rejected
            }
            OutcomeStatus::Failed(_) => {
                state.totals.failed += 1;
                RecordState::Failed
            }
        };

        state.records.insert(outcome.seq, next);
        state.pending -= 1;
        self.inner.pending.send_replace(state.pending);

        state
            .subscribers
            .retain(|subscriber| subscriber.send(outcome.clone()).is_ok());
        state.buffer.push(outcome);

        true
    }

    /// Fails every record that has no outcome yet, returning how many.
    pub fn fail_pending(&self, reason: FailureReason) -> usize {
        let mut pending = {
            let state = self.inner.state.lock();
            state
                .records
                .iter()
                .filter(|(_, record)| !record.is_terminal())
                .map(|(seq, _)| *seq)
                .collect::<Vec<_>>()
        };
        pending.sort_unstable();

        pending
            .into_iter()
            .filter(|seq| self.record(Outcome::failed(*seq, reason.clone())))
            .count()
    }

    /// Takes every outcome recorded since the last drain.
    pub fn drain(&self) -> Vec<Outcome> {
        std::mem::take(&mut self.inner.state.lock().buffer)
    }

    /// Returns a channel receiving every outcome recorded from now on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Outcome> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.state.lock().subscribers.push(tx);
        rx
    }

    /// Number of registered records without an outcome.
    pub fn pending(&self) -> usize {
        self.inner.state.lock().pending
    }

    pub fn totals(&self) -> OutcomeTotals {
        self.inner.state.lock().totals
    }

    pub fn state(&self, seq: u64) -> Option<RecordState> {
        self.inner.state.lock().records.get(&seq).copied()
    }

    /// Waits until every registered record has an outcome.
    pub async fn wait_complete(&self) {
        let mut rx = self.inner.pending.subscribe();
        // The sender lives in `self`, so this cannot fail.
        let _ = rx.wait_for(|pending| *pending == 0).await;
    }
}
