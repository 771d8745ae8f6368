//! Adaptive batch ingestion.
//!
//! Records pushed into a [`Session`] are validated, grouped into batches sized
//! by the [`flow::FlowController`] and submitted to an
//! [`target::IngestionTarget`] with bounded concurrency. Every record that is
//! pushed ends with exactly one [`Outcome`].
pub mod assembler;
pub mod batch;
pub mod collector;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod flow;
pub mod metrics;
pub mod record;
pub mod schema;
pub mod session;
pub mod target;
pub mod validator;

#[cfg(test)]
pub mod test_utils;

pub use batch::{Batch, BatchId};
pub use collector::{OutcomeTotals, RecordState, ResultCollector};
pub use config::SessionConfig;
pub use dispatcher::{BatchResult, DispatchStats};
pub use error::{DispatchError, ErrorKind, IngestError, Result, ValidationError};
pub use flow::{FlowState, FlowTarget, LoadSample};
pub use record::{FailureReason, Outcome, OutcomeStatus, Record, RejectReason, ValidRecord};
pub use schema::{Constraint, DataType, Field, Schema, SchemaRef};
pub use session::{Admission, Session};
pub use target::{IngestionTarget, RecordStatus, SubmitResponse};
