use std::{ops::Range, sync::Arc, time::Duration};

use serde_json::json;
use tern_ingestor_core::{
    DataType, Field, Outcome, Record, Result, Schema, SchemaRef, Session, SessionConfig,
    target::InMemoryTarget,
};

pub const DIMENSION: usize = 4;

pub fn vector_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64),
        Field::new("vector", DataType::Vector(DIMENSION)),
        Field::optional("title", DataType::Utf8),
    ]))
}

pub fn vector_record(seq: u64) -> Record {
    let vector = (0..DIMENSION)
        .map(|i| ((seq as usize + i) % 17) as f64 / 17.0)
        .collect::<Vec<_>>();
    Record::from_value(seq, json!({ "id": seq, "vector": vector })).expect("object record")
}

/// A record without its vector.
pub fn invalid_record(seq: u64) -> Record {
    Record::from_value(seq, json!({ "id": seq })).expect("object record")
}

/// Config with a long batch age so that only size and end of stream flush.
pub fn default_config() -> SessionConfig {
    SessionConfig::new()
        .with_max_batch_age(Duration::from_secs(60))
        .with_retry_backoff(Duration::from_millis(10), Duration::from_millis(100))
}

pub fn open_session(config: SessionConfig) -> (Session, Arc<InMemoryTarget>) {
    open_session_with_target(config, InMemoryTarget::new())
}

pub fn open_session_with_target(
    config: SessionConfig,
    target: InMemoryTarget,
) -> (Session, Arc<InMemoryTarget>) {
    let target = Arc::new(target);
    let session =
        Session::open(config, vector_schema(), target.clone()).expect("open session");
    (session, target)
}

pub async fn push_valid(session: &Session, range: Range<u64>) -> Result<()> {
    for seq in range {
        let admission = session.push(vector_record(seq)).await?;
        assert!(admission.is_admitted(), "record {seq} was not admitted");
    }
    Ok(())
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct OutcomeCounts {
    pub accepted: usize,
    pub rejected: usize,
    pub failed: usize,
}

pub fn count(outcomes: &[Outcome]) -> OutcomeCounts {
    let mut counts = OutcomeCounts::default();
    for outcome in outcomes {
        if outcome.is_accepted() {
            counts.accepted += 1;
        } else if outcome.is_rejected() {
            counts.rejected += 1;
        } else {
            counts.failed += 1;
        }
    }
    counts
}

/// Asserts that every sequence number appears exactly once.
pub fn assert_unique(outcomes: &[Outcome]) {
    let mut sequences = outcomes.iter().map(|outcome| outcome.seq).collect::<Vec<_>>();
    sequences.sort_unstable();
    let len = sequences.len();
    sequences.dedup();
    assert_eq!(len, sequences.len(), "duplicate outcomes");
}
