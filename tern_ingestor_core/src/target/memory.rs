//! In-memory implementation of the ingestion target.
//!
//! Records are stored in a map keyed by sequence number, which makes the
//! target idempotent. Faults, rejections and latency can be scripted, and the
//! target keeps track of how it was called. It is suitable for testing and
//! for the stress tool.
use std::{
    collections::{BTreeMap, HashSet, VecDeque},
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::trace;

use crate::{
    batch::Batch,
    error::DispatchError,
    record::Record,
    target::{IngestionTarget, RecordStatus, SubmitResponse},
};

/// A scripted failure for a single call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Fail with a transient error without storing anything.
    Transient,
    /// Store the batch, then fail with a transient error as if the response
    /// was lost.
    TransientAfterWrite,
    /// Fail with a permanent error.
    Permanent,
    /// Never respond.
    Hang,
    /// Respond with one status less than the number of records.
    ShortResponse,
}

#[derive(Debug, Default)]
pub struct InMemoryTarget {
    min_latency: Duration,
    max_latency: Duration,
    transient_every: Option<usize>,
    reject_every: Option<u64>,
    queue_depth_hint: Option<f64>,
    store: Mutex<TargetStore>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

#[derive(Debug, Default)]
struct TargetStore {
    records: BTreeMap<u64, Record>,
    faults: VecDeque<Fault>,
    rejected: HashSet<u64>,
    batch_sizes: Vec<usize>,
    duplicates: usize,
}

struct InFlightGuard<'a> {
    in_flight: &'a AtomicUsize,
}

impl InMemoryTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep for `latency` on every call.
    pub fn with_latency(self, latency: Duration) -> Self {
        self.with_latency_range(latency, latency)
    }

    /// Sleep between `min` and `max` on every call.
    ///
    /// The latency of a call only depends on its call number, so runs are
    /// reproducible.
    pub fn with_latency_range(mut self, min: Duration, max: Duration) -> Self {
        self.min_latency = min;
        self.max_latency = max.max(min);
        self
    }

    /// Fail every `n`-th call with a transient error.
    pub fn with_transient_every(mut self, n: usize) -> Self {
        self.transient_every = (n > 0).then_some(n);
        self
    }

    /// Reject every record whose sequence number is `n - 1` modulo `n`.
    pub fn with_reject_every(mut self, n: u64) -> Self {
        self.reject_every = (n > 0).then_some(n);
        self
    }

    /// Report a constant queue depth with every response.
    pub fn with_queue_depth_hint(mut self, hint: f64) -> Self {
        self.queue_depth_hint = Some(hint);
        self
    }

    /// Reject the records with the given sequence numbers.
    pub fn reject_sequences(&self, sequences: impl IntoIterator<Item = u64>) {
        self.store.lock().rejected.extend(sequences);
    }

    /// Fail the next call that has no earlier fault queued.
    pub fn push_fault(&self, fault: Fault) {
        self.store.lock().faults.push_back(fault);
    }

    /// Number of `submit_batch` calls, including failed ones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of calls running right now.
    pub fn concurrent_calls(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of calls that were running at the same time.
    pub fn max_concurrent_calls(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Size of every batch received, in call order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.store.lock().batch_sizes.clone()
    }

    pub fn stored_len(&self) -> usize {
        self.store.lock().records.len()
    }

    pub fn contains(&self, seq: u64) -> bool {
        self.store.lock().records.contains_key(&seq)
    }

    pub fn stored_sequences(&self) -> Vec<u64> {
        self.store.lock().records.keys().copied().collect()
    }

    /// Number of records that were submitted again after being stored.
    pub fn duplicates(&self) -> usize {
        self.store.lock().duplicates
    }

    fn latency_for(&self, call: usize) -> Duration {
        let spread = self.max_latency - self.min_latency;
        if spread.is_zero() {
            return self.min_latency;
        }

        let step = (call.wrapping_mul(37) % 100) as f64 / 99.0;
        self.min_latency + spread.mul_f64(step)
    }

    fn next_fault(&self, call: usize) -> Option<Fault> {
        if let Some(fault) = self.store.lock().faults.pop_front() {
            return Some(fault);
        }

        match self.transient_every {
            Some(n) if call % n == 0 => Some(Fault::Transient),
            _ => None,
        }
    }

    fn is_rejected(&self, store: &TargetStore, seq: u64) -> bool {
        if store.rejected.contains(&seq) {
            return true;
        }

        matches!(self.reject_every, Some(n) if seq % n == n - 1)
    }

    fn write(&self, batch: &Batch) -> Vec<RecordStatus> {
        let mut store = self.store.lock();
        let mut statuses = Vec::with_capacity(batch.len());

        for record in batch.records() {
            let seq = record.seq();

            if self.is_rejected(&store, seq) {
                statuses.push(RecordStatus::Rejected {
                    message: format!("record {seq} refused by in-memory target"),
                });
                continue;
            }

            if store.records.insert(seq, record.as_record().clone()).is_some() {
                store.duplicates += 1;
            }
            statuses.push(RecordStatus::Accepted);
        }

        statuses
    }
}

#[async_trait]
impl IngestionTarget for InMemoryTarget {
    async fn submit_batch(&self, batch: &Batch) -> Result<SubmitResponse, DispatchError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlightGuard::enter(&self.in_flight, &self.max_in_flight);

        self.store.lock().batch_sizes.push(batch.len());
        trace!(call, batch_id = batch.id(), records = batch.len(), "in-memory target call");

        let latency = self.latency_for(call);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let statuses = match self.next_fault(call) {
            None => self.write(batch),
            Some(Fault::Transient) => {
                return Err(DispatchError::Transient {
                    message: format!("in-memory target unavailable (call {call})"),
                });
            }
            Some(Fault::TransientAfterWrite) => {
                self.write(batch);
                return Err(DispatchError::Transient {
                    message: format!("in-memory target response lost (call {call})"),
                });
            }
            Some(Fault::Permanent) => {
                return Err(DispatchError::Permanent {
                    message: "in-memory target refused the batch".to_string(),
                });
            }
            Some(Fault::Hang) => std::future::pending().await,
            Some(Fault::ShortResponse) => {
                vec![RecordStatus::Accepted; batch.len().saturating_sub(1)]
            }
        };

        Ok(SubmitResponse {
            statuses,
            queue_depth_hint: self.queue_depth_hint,
        })
    }
}

impl<'a> InFlightGuard<'a> {
    fn enter(in_flight: &'a AtomicUsize, max_in_flight: &AtomicUsize) -> Self {
        let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        max_in_flight.fetch_max(current, Ordering::SeqCst);
        Self { in_flight }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        test_utils::{test_batch, vector_schema},
        validator::RecordValidator,
    };

    fn batch(range: std::ops::Range<u64>) -> Batch {
        let validator = RecordValidator::new(Arc::new(vector_schema(2)));
        test_batch(&validator, 0, range, 2)
    }

    #[tokio::test]
    async fn test_store_is_idempotent() {
        let target = InMemoryTarget::new();
        let batch = batch(0..4);

        let first = target.submit_batch(&batch).await.expect("first submit");
        let second = target.submit_batch(&batch).await.expect("second submit");

        assert_eq!(first, second);
        assert_eq!(target.stored_len(), 4);
        assert_eq!(target.duplicates(), 4);
        assert_eq!(target.calls(), 2);
        assert_eq!(target.batch_sizes(), vec![4, 4]);
    }

    #[tokio::test]
    async fn test_scripted_faults() {
        let target = InMemoryTarget::new().with_queue_depth_hint(3.0);
        target.push_fault(Fault::Transient);
        target.push_fault(Fault::Permanent);
        target.push_fault(Fault::ShortResponse);
        let batch = batch(0..3);

        let err = target.submit_batch(&batch).await.unwrap_err();
        assert!(err.is_retryable());

        let err = target.submit_batch(&batch).await.unwrap_err();
        assert!(!err.is_retryable());

        let response = target.submit_batch(&batch).await.expect("short response");
        assert_eq!(response.statuses.len(), 2);
        assert_eq!(response.queue_depth_hint, Some(3.0));
        assert_eq!(target.stored_len(), 0);

        let response = target.submit_batch(&batch).await.expect("response");
        assert_eq!(response.statuses, vec![RecordStatus::Accepted; 3]);
        assert_eq!(target.stored_len(), 3);
    }

    #[tokio::test]
    async fn test_rejections() {
        let target = InMemoryTarget::new().with_reject_every(4);
        target.reject_sequences([1]);

        let response = target.submit_batch(&batch(0..8)).await.expect("response");
        let rejected = response
            .statuses
            .iter()
            .enumerate()
            .filter(|(_, status)| matches!(status, RecordStatus::Rejected { .. }))
            .map(|(i, _)| i)
            .collect::<Vec<_>>();

        assert_eq!(rejected, vec![1, 3, 7]);
        assert_eq!(target.stored_sequences(), vec![0, 2, 4, 5, 6]);
    }

    #[tokio::test]
    async fn test_transient_every() {
        let target = InMemoryTarget::new().with_transient_every(2);
        let batch = batch(0..1);

        assert!(target.submit_batch(&batch).await.is_ok());
        assert!(target.submit_batch(&batch).await.is_err());
        assert!(target.submit_batch(&batch).await.is_ok());
        assert!(target.submit_batch(&batch).await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_calls_are_tracked() {
        tokio::time::pause();

        let target = Arc::new(InMemoryTarget::new().with_latency(Duration::from_millis(10)));
        let tasks = (0..3)
            .map(|i| {
                let target = target.clone();
                tokio::spawn(async move {
                    let batch = batch(i * 10..i * 10 + 2);
                    target.submit_batch(&batch).await
                })
            })
            .collect::<Vec<_>>();

        for task in tasks {
            task.await.expect("join").expect("submit");
        }

        assert_eq!(target.max_concurrent_calls(), 3);
        assert_eq!(target.in_flight.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_latency_range_is_deterministic() {
        let target = InMemoryTarget::new()
            .with_latency_range(Duration::from_millis(10), Duration::from_millis(20));

        for call in 1..200 {
            let latency = target.latency_for(call);
            assert!(latency >= Duration::from_millis(10));
            assert!(latency <= Duration::from_millis(20));
            assert_eq!(latency, target.latency_for(call));
        }
    }
}
