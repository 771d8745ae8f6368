use snafu::Snafu;
use tern_ingestor_core::IngestError;
use tern_observability::ObservabilityError;

use crate::helpers::RangeParserError;

/// CLI error types.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CliError {
    #[snafu(display("Invalid latency range"))]
    InvalidLatency { source: RangeParserError },
    #[snafu(display("Failed to initialize observability"))]
    Observability { source: ObservabilityError },
    #[snafu(display("Ingestion session failed"))]
    Ingest { source: IngestError },
}

pub type Result<T, E = CliError> = std::result::Result<T, E>;
