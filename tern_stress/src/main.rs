use std::{sync::Arc, time::Duration};

use clap::{Args, Parser, ValueEnum};
use snafu::ResultExt;
use tern_ingestor_core::{
    FlowState, Outcome, OutcomeTotals, Session, SessionConfig,
    flow::{FlowPolicy, InverseLoadPolicy, SteppedLoadPolicy},
    target::InMemoryTarget,
};
use tokio::{sync::mpsc, time::Instant};
use tracing::info;

use crate::{
    error::{IngestSnafu, InvalidLatencySnafu, ObservabilitySnafu, Result},
    generators::RecordGenerator,
    helpers::parse_latency_range,
};

mod error;
mod generators;
mod helpers;

#[derive(Parser)]
#[command(name = "tern-stress")]
#[command(about = "Drive an ingestion session against an in-memory target")]
#[command(version)]
struct Cli {
    /// Number of records to push.
    #[arg(long, default_value = "100000")]
    records: u64,
    /// Dimension of the generated vectors.
    #[arg(long, default_value = "128")]
    dimension: usize,
    /// Make every n-th record fail validation.
    #[arg(long)]
    invalid_every: Option<u64>,
    /// Cancel the session after pushing this many records.
    #[arg(long)]
    cancel_after: Option<u64>,
    #[clap(flatten)]
    session: SessionArgs,
    #[clap(flatten)]
    target: TargetArgs,
}

/// Bounds of the ingestion session.
#[derive(Args, Debug, Clone)]
struct SessionArgs {
    #[arg(long, default_value = "10")]
    min_batch_size: usize,
    #[arg(long, default_value = "500")]
    max_batch_size: usize,
    /// Flush a partial batch after this many milliseconds.
    #[arg(long, default_value = "1000")]
    max_batch_age_ms: u64,
    #[arg(long, default_value = "1")]
    min_concurrency: usize,
    #[arg(long, default_value = "8")]
    max_concurrency: usize,
    #[arg(long, default_value = "3")]
    retry_limit: u32,
    /// Latency in milliseconds at which the flow policy backs off.
    #[arg(long, default_value = "100")]
    reference_load: f64,
    #[arg(long, default_value = "0.2")]
    ema_alpha: f64,
    #[arg(long, value_enum, default_value = "inverse")]
    policy: PolicyType,
}

/// Behavior of the in-memory target.
#[derive(Args, Debug, Clone)]
struct TargetArgs {
    /// Latency of each call in milliseconds.
    ///
    /// Either provide a number (e.g. 20) or a range (e.g. 10-80).
    #[arg(long, default_value = "20")]
    latency_ms: String,
    /// Fail every n-th call with a transient error.
    #[arg(long)]
    transient_every: Option<usize>,
    /// Reject every n-th record inside otherwise successful batches.
    #[arg(long)]
    reject_every: Option<u64>,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
enum PolicyType {
    /// Scale smoothly with the inverse of the observed load.
    Inverse,
    /// Jump between four pressure levels.
    Stepped,
}

#[tokio::main]
#[snafu::report]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tern_observability::init_observability(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
        .context(ObservabilitySnafu {})?;

    let latency = parse_latency_range(&cli.target.latency_ms).context(InvalidLatencySnafu {})?;

    let mut target = InMemoryTarget::new().with_latency_range(latency.min, latency.max);
    if let Some(n) = cli.target.transient_every {
        target = target.with_transient_every(n);
    }
    if let Some(n) = cli.target.reject_every {
        target = target.with_reject_every(n);
    }
    let target = Arc::new(target);

    let config = cli.session.config();
    let generator = RecordGenerator::new(cli.dimension, cli.invalid_every);

    println!("Running stress test");
    println!("  Records: {}", cli.records);
    println!("  Dimension: {}", cli.dimension);
    println!(
        "  Batch size: {}-{}",
        config.min_batch_size, config.max_batch_size
    );
    println!(
        "  Concurrency: {}-{}",
        config.min_concurrency, config.max_concurrency
    );
    println!("  Latency: {}", latency);
    println!("  Policy: {:?}", cli.session.policy);

    let session = Session::open_with_policy(
        config,
        generator.schema(),
        target.clone(),
        cli.session.policy(),
    )
    .context(IngestSnafu {})?;

    tokio::spawn({
        let ct = session.cancellation_token();
        async move {
            let _ = tokio::signal::ctrl_c().await;
            ct.cancel();
        }
    });

    let reporter = tokio::spawn(report_progress(session.subscribe()));
    let started = Instant::now();

    for seq in 0..cli.records {
        if cli.cancel_after == Some(seq) {
            session.cancel();
        }

        session
            .push(generator.record(seq))
            .await
            .context(IngestSnafu {})?;
    }

    session.wait_complete().await;

    let stats = session.stats();
    let flow = session.flow();
    let session_id = session.id();
    session.finish().await.context(IngestSnafu {})?;

    let totals = reporter.await.unwrap_or_default();
    let elapsed = started.elapsed();

    println!();
    println!("Session {session_id} finished in {:.2}s", elapsed.as_secs_f64());
    println!("  Accepted: {}", totals.accepted);
    println!("  Rejected: {}", totals.rejected);
    println!("  Failed: {}", totals.failed);
    println!("  Batches: {}", stats.batches);
    println!("  Retries: {}", stats.retries);
    println!("  Max in flight: {}", stats.max_in_flight);
    println!("  Target calls: {}", target.calls());
    println!("  Records stored: {}", target.stored_len());
    println!("  Throughput: {:.0} records/s", throughput(totals.accepted, elapsed));
    print_flow(&flow);

    Ok(())
}

impl SessionArgs {
    fn config(&self) -> SessionConfig {
        SessionConfig::new()
            .with_batch_size(self.min_batch_size, self.max_batch_size)
            .with_max_batch_age(Duration::from_millis(self.max_batch_age_ms))
            .with_concurrency(self.min_concurrency, self.max_concurrency)
            .with_retry_limit(self.retry_limit)
            .with_reference_load(self.reference_load)
            .with_ema_alpha(self.ema_alpha)
    }

    fn policy(&self) -> Arc<dyn FlowPolicy> {
        match self.policy {
            PolicyType::Inverse => Arc::new(InverseLoadPolicy::new(self.reference_load)),
            PolicyType::Stepped => Arc::new(SteppedLoadPolicy::new(self.reference_load)),
        }
    }
}

/// Counts outcomes as they arrive and logs progress every second.
async fn report_progress(mut rx: mpsc::UnboundedReceiver<Outcome>) -> OutcomeTotals {
    let mut totals = OutcomeTotals::default();
    let mut ticker = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            outcome = rx.recv() => {
                let Some(outcome) = outcome else {
                    break;
                };

                if outcome.is_accepted() {
                    totals.accepted += 1;
                } else if outcome.is_rejected() {
                    totals.rejected += 1;
                } else {
                    totals.failed += 1;
                }
            }
            _ = ticker.tick() => {
                info!(
                    accepted = totals.accepted,
                    rejected = totals.rejected,
                    failed = totals.failed,
                    "progress"
                );
            }
        }
    }

    totals
}

fn throughput(records: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 { records as f64 / secs } else { 0.0 }
}

fn print_flow(flow: &FlowState) {
    match flow.ema {
        Some(ema) => println!("  Load EMA: {ema:.2}"),
        None => println!("  Load EMA: -"),
    }
    println!("  Final batch size: {}", flow.batch_size);
    println!("  Final concurrency: {}", flow.concurrency_budget);
    println!("  Load samples: {}", flow.samples);
}
