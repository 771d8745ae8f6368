//! Synthetic vector records.
use std::sync::Arc;

use serde_json::{Map, Value, json};
use tern_ingestor_core::{Constraint, DataType, Field, Record, Schema, SchemaRef};

const MAX_LABEL_LENGTH: usize = 32;

/// Produces the same records for the same sequence numbers.
pub struct RecordGenerator {
    dimension: usize,
    invalid_every: Option<u64>,
}

impl RecordGenerator {
    pub fn new(dimension: usize, invalid_every: Option<u64>) -> Self {
        Self {
            dimension,
            invalid_every: invalid_every.filter(|n| *n > 0),
        }
    }

    pub fn schema(&self) -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64),
            Field::new("vector", DataType::Vector(self.dimension)),
            Field::optional("label", DataType::Utf8)
                .with_constraint(Constraint::MaxLength(MAX_LABEL_LENGTH)),
        ]))
    }

    pub fn is_invalid(&self, seq: u64) -> bool {
        match self.invalid_every {
            Some(n) => seq % n == n - 1,
            None => false,
        }
    }

    pub fn record(&self, seq: u64) -> Record {
        let mut fields = Map::new();
        fields.insert("id".to_string(), json!(seq));
        fields.insert("label".to_string(), json!(format!("item-{seq}")));
        fields.insert("vector".to_string(), self.vector(seq, self.dimension));

        if self.is_invalid(seq) {
            // Cycle through the ways a record can fail validation.
            match seq % 3 {
                0 => {
                    fields.remove("vector");
                }
                1 => {
                    fields.insert("vector".to_string(), self.vector(seq, self.dimension + 1));
                }
                _ => {
                    fields.insert("label".to_string(), json!("x".repeat(MAX_LABEL_LENGTH + 1)));
                }
            }
        }

        Record::new(seq, fields)
    }

    fn vector(&self, seq: u64, dimension: usize) -> Value {
        let components = (0..dimension as u64)
            .map(|i| {
                let bits = splitmix64(seq.wrapping_mul(0x9e37_79b9).wrapping_add(i));
                // Map to [-1, 1] with 24 bits of precision so the value fits an f32.
                let unit = (bits >> 40) as f64 / (1u64 << 24) as f64;
                json!(unit * 2.0 - 1.0)
            })
            .collect();

        Value::Array(components)
    }
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}
