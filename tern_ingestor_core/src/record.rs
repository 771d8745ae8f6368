//! Records and their outcomes.
//!
//! ## Record lifecycle
//!
//! ```text
//! Submitted ──> Rejected
//!     │
//!     └──────> Dispatched ──> Accepted | Failed
//! ```
//!
//! A submitted record may also go straight to `Failed` if the session closes
//! before it is dispatched. `Rejected`, `Accepted` and `Failed` are terminal.
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ValidationError;

/// An object to ingest, identified by a caller-assigned sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Monotonic and unique within a session.
    pub seq: u64,
    /// The object's properties.
    pub fields: Map<String, Value>,
}

/// A record that passed validation.
///
/// Can only be created by the validator and cannot be modified.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidRecord(Record);

/// Why a record was refused before dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// The record does not conform to the schema.
    Validation(ValidationError),
    /// The record was pushed after the session was cancelled.
    SessionCancelled,
}

/// Why a dispatched record was not ingested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The target accepted the batch but refused this record.
    RejectedByTarget { message: String },
    /// The whole batch failed with a non-retryable error.
    Permanent { message: String },
    /// The batch kept failing with transient errors.
    RetriesExhausted { attempts: u32, message: String },
    /// The pipeline shut down before the record could be dispatched.
    SessionClosed,
}

/// The terminal status of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeStatus {
    Accepted,
    Rejected(RejectReason),
    Failed(FailureReason),
}

/// The terminal result for one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub seq: u64,
    pub status: OutcomeStatus,
}

impl Record {
    pub fn new(seq: u64, fields: Map<String, Value>) -> Self {
        Self { seq, fields }
    }

    /// Creates a record from a JSON value.
    ///
    /// Returns `None` if the value is not an object.
    pub fn from_value(seq: u64, value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self { seq, fields }),
            _ => None,
        }
    }
}

impl ValidRecord {
    pub(crate) fn new(record: Record) -> Self {
        Self(record)
    }

    pub fn seq(&self) -> u64 {
        self.0.seq
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0.fields
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.fields.get(name)
    }

    pub fn as_record(&self) -> &Record {
        &self.0
    }

    pub fn into_record(self) -> Record {
        self.0
    }
}

impl Outcome {
    pub fn accepted(seq: u64) -> Self {
        Self {
            seq,
            status: OutcomeStatus::Accepted,
        }
    }

    pub fn rejected(seq: u64, reason: RejectReason) -> Self {
        Self {
            seq,
            status: OutcomeStatus::Rejected(reason),
        }
    }

    pub fn failed(seq: u64, reason: FailureReason) -> Self {
        Self {
            seq,
            status: OutcomeStatus::Failed(reason),
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self.status, OutcomeStatus::Accepted)
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self.status, OutcomeStatus::Rejected(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, OutcomeStatus::Failed(_))
    }

    pub fn as_rejection(&self) -> Option<&RejectReason> {
        match &self.status {
            OutcomeStatus::Rejected(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn as_failure(&self) -> Option<&FailureReason> {
        match &self.status {
            OutcomeStatus::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

impl From<ValidationError> for RejectReason {
    fn from(error: ValidationError) -> Self {
        Self::Validation(error)
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation(error) => write!(f, "{error}"),
            Self::SessionCancelled => write!(f, "session cancelled"),
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RejectedByTarget { message } => write!(f, "rejected by target: {message}"),
            Self::Permanent { message } => write!(f, "{message}"),
            Self::RetriesExhausted { attempts, message } => {
                write!(f, "gave up after {attempts} attempts: {message}")
            }
            Self::SessionClosed => write!(f, "session closed before dispatch"),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.status {
            OutcomeStatus::Accepted => write!(f, "{}: accepted", self.seq),
            OutcomeStatus::Rejected(reason) => write!(f, "{}: rejected ({reason})", self.seq),
            OutcomeStatus::Failed(reason) => write!(f, "{}: failed ({reason})", self.seq),
        }
    }
}
