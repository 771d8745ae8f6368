//! The ingestion target batches are submitted to.
use async_trait::async_trait;

use crate::{batch::Batch, error::DispatchError};

pub use self::memory::{Fault, InMemoryTarget};

pub mod memory;

/// The status of a single record in a submitted batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordStatus {
    Accepted,
    Rejected { message: String },
}

/// The target's response to a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitResponse {
    /// One status per record, in batch order.
    pub statuses: Vec<RecordStatus>,
    /// The target's own estimate of its queue depth, if it has one.
    ///
    /// When present it is used as the load sample instead of latency.
    pub queue_depth_hint: Option<f64>,
}

/// A sink for batches of validated records.
///
/// Batches that fail with a transient error are submitted again, so the
/// target must be idempotent: a record it has already stored (identified by
/// its sequence number) must be accepted again without being duplicated.
#[async_trait]
pub trait IngestionTarget: Send + Sync + 'static {
    async fn submit_batch(&self, batch: &Batch) -> Result<SubmitResponse, DispatchError>;
}

impl SubmitResponse {
    pub fn all_accepted(len: usize) -> Self {
        Self {
            statuses: vec![RecordStatus::Accepted; len],
            queue_depth_hint: None,
        }
    }

    pub fn with_queue_depth_hint(mut self, hint: f64) -> Self {
        self.queue_depth_hint = Some(hint);
        self
    }
}
