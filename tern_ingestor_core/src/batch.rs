use tokio::time::Instant;

use crate::record::ValidRecord;

pub type BatchId = u64;

/// Records grouped for a single submission.
///
/// A batch is sealed: once assembled its records cannot change.
#[derive(Debug)]
pub struct Batch {
    id: BatchId,
    target_size: usize,
    created_at: Instant,
    records: Vec<ValidRecord>,
}

impl Batch {
    pub(crate) fn new(
        id: BatchId,
        target_size: usize,
        created_at: Instant,
        records: Vec<ValidRecord>,
    ) -> Self {
        Self {
            id,
            target_size,
            created_at,
            records,
        }
    }

    pub fn id(&self) -> BatchId {
        self.id
    }

    /// The size chosen when the batch was opened.
    ///
    /// A batch flushed because of its age or end of stream can be smaller.
    pub fn target_size(&self) -> usize {
        self.target_size
    }

    /// When the first record was added.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn records(&self) -> &[ValidRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn sequence_numbers(&self) -> impl Iterator<Item = u64> + '_ {
        self.records.iter().map(ValidRecord::seq)
    }
}
