use tern_observability::{Counter, Gauge, Histogram};

use crate::{collector::OutcomeTotals, flow::FlowTarget};

pub struct IngestionMetrics {
    pub accepted_records: Counter<u64>,
    pub rejected_records: Counter<u64>,
    pub failed_records: Counter<u64>,
    pub batches: Counter<u64>,
    pub retries: Counter<u64>,
    pub batch_latency: Histogram<f64>,
    pub target_batch_size: Gauge<u64>,
    pub concurrency_budget: Gauge<u64>,
}

impl Default for IngestionMetrics {
    fn default() -> Self {
        let meter = tern_observability::meter("ingestion");
        Self {
            accepted_records: meter
                .u64_counter("ingestion.records.accepted")
                .with_unit("{record}")
                .with_description("records accepted by the target")
                .build(),
            rejected_records: meter
                .u64_counter("ingestion.records.rejected")
                .with_unit("{record}")
                .with_description("records rejected before dispatch")
                .build(),
            failed_records: meter
                .u64_counter("ingestion.records.failed")
                .with_unit("{record}")
                .with_description("dispatched records that were not ingested")
                .build(),
            batches: meter
                .u64_counter("ingestion.batches")
                .with_unit("{batch}")
                .with_description("batches dispatched to the target")
                .build(),
            retries: meter
                .u64_counter("ingestion.retries")
                .with_unit("{attempt}")
                .with_description("batch submissions retried after a transient error")
                .build(),
            batch_latency: meter
                .f64_histogram("ingestion.batch.latency")
                .with_unit("ms")
                .with_description("time to resolve a batch, including retries")
                .build(),
            target_batch_size: meter
                .u64_gauge("ingestion.flow.batch_size")
                .with_unit("{record}")
                .with_description("target size of the next batch")
                .build(),
            concurrency_budget: meter
                .u64_gauge("ingestion.flow.concurrency")
                .with_unit("{batch}")
                .with_description("maximum number of batches in flight")
                .build(),
        }
    }
}

impl IngestionMetrics {
    pub fn record_outcomes(&self, delta: OutcomeTotals) {
        if delta.accepted > 0 {
            self.accepted_records.add(delta.accepted, &[]);
        }
        if delta.rejected > 0 {
            self.rejected_records.add(delta.rejected, &[]);
        }
        if delta.failed > 0 {
            self.failed_records.add(delta.failed, &[]);
        }
    }

    pub fn record_flow_target(&self, target: FlowTarget) {
        self.target_batch_size.record(target.batch_size as u64, &[]);
        self.concurrency_budget
            .record(target.concurrency_budget as u64, &[]);
    }
}
