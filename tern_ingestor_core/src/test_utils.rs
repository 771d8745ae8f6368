use std::ops::Range;

use serde_json::json;
use tokio::time::Instant;

use crate::{
    batch::{Batch, BatchId},
    record::{Record, ValidRecord},
    schema::{DataType, Field, Schema},
    validator::RecordValidator,
};

/// Returns a schema with a required `id` and a required `vector` of `dim`
/// dimensions.
pub fn vector_schema(dim: usize) -> Schema {
    Schema::new(vec![
        Field::new("id", DataType::Int64),
        Field::new("vector", DataType::Vector(dim)),
    ])
}

/// Generate a record matching [`vector_schema`].
pub fn vector_record(seq: u64, dim: usize) -> Record {
    let vector = (0..dim)
        .map(|i| (seq as f64 + i as f64) / 10.0)
        .collect::<Vec<_>>();

    Record::from_value(seq, json!({ "id": seq, "vector": vector })).expect("object record")
}

pub fn valid_record(validator: &RecordValidator, seq: u64, dim: usize) -> ValidRecord {
    validator
        .validate(vector_record(seq, dim))
        .expect("valid record")
}

/// Generate a batch with one record per sequence number in `range`.
pub fn test_batch(
    validator: &RecordValidator,
    id: BatchId,
    range: Range<u64>,
    dim: usize,
) -> Batch {
    let records = range
        .map(|seq| valid_record(validator, seq, dim))
        .collect::<Vec<_>>();
    Batch::new(id, records.len(), Instant::now(), records)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_generate_test_batch() {
        let validator = RecordValidator::new(Arc::new(vector_schema(3)));
        let batch = test_batch(&validator, 7, 5..10, 3);
        assert_eq!(batch.id(), 7);
        assert_eq!(batch.len(), 5);
        assert_eq!(batch.sequence_numbers().collect::<Vec<_>>(), vec![5, 6, 7, 8, 9]);
        assert_eq!(batch.records()[0].get("vector"), Some(&json!([0.5, 0.6, 0.7])));
    }
}
