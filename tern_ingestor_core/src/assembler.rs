use std::time::Duration;

use futures::StreamExt;
use tokio::time::Instant;
use tokio_util::time::{DelayQueue, delay_queue};

use crate::{
    batch::{Batch, BatchId},
    config::SessionConfig,
    flow::FlowReader,
    record::ValidRecord,
};

/// Groups validated records into batches.
///
/// A batch is sealed when it reaches the size decided when it was opened,
/// when it gets older than `max_batch_age`, or when the stream ends.
pub struct BatchAssembler {
    flow: FlowReader,
    max_batch_size: usize,
    max_batch_age: Duration,
    next_batch_id: BatchId,
    open: Option<OpenBatch>,
    timer: DelayQueue<BatchId>,
}

struct OpenBatch {
    id: BatchId,
    target_size: usize,
    created_at: Instant,
    records: Vec<ValidRecord>,
    timer_key: delay_queue::Key,
}

impl BatchAssembler {
    pub fn new(config: &SessionConfig, flow: FlowReader) -> Self {
        Self {
            flow,
            max_batch_size: config.max_batch_size,
            max_batch_age: config.max_batch_age,
            next_batch_id: 0,
            open: None,
            timer: DelayQueue::new(),
        }
    }

    /// Adds a record to the open batch, returning the batch if it is full.
    pub fn push(&mut self, record: ValidRecord) -> Option<Batch> {
        let mut open = match self.open.take() {
            Some(open) => open,
            None => self.open_batch(),
        };

        open.records.push(record);

        if open.records.len() >= open.target_size {
            self.timer.try_remove(&open.timer_key);
            return Some(open.seal());
        }

        self.open = Some(open);
        None
    }

    /// Waits for the open batch to expire.
    ///
    /// Returns `None` if the expired timer belongs to a batch that was
    /// already sealed. Must only be polled while [`Self::has_pending_timer`]
    /// is true.
    pub async fn expired(&mut self) -> Option<Batch> {
        let expired = self.timer.next().await?;
        let batch_id = expired.into_inner();

        match self.open.take() {
            Some(open) if open.id == batch_id => Some(open.seal()),
            other => {
                self.open = other;
                None
            }
        }
    }

    pub fn has_pending_timer(&self) -> bool {
        !self.timer.is_empty()
    }

    /// Seals the open batch, if any.
    pub fn finish(&mut self) -> Option<Batch> {
        let open = self.open.take()?;
        self.timer.try_remove(&open.timer_key);
        Some(open.seal())
    }

    /// Number of records in the open batch.
    pub fn open_len(&self) -> usize {
        self.open.as_ref().map(|open| open.records.len()).unwrap_or(0)
    }

    fn open_batch(&mut self) -> OpenBatch {
        let target_size = self
            .flow
            .current_target()
            .batch_size
            .min(self.max_batch_size)
            .max(1);

        let id = self.next_batch_id;
        self.next_batch_id += 1;

        let timer_key = self.timer.insert(id, self.max_batch_age);

        OpenBatch {
            id,
            target_size,
            created_at: Instant::now(),
            records: Vec::with_capacity(target_size),
            timer_key,
        }
    }
}

impl OpenBatch {
    fn seal(self) -> Batch {
        Batch::new(self.id, self.target_size, self.created_at, self.records)
    }
}
