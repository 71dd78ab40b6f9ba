//! Metrics for blob store operations.

use std::time::Instant;

use opentelemetry::{
    metrics::{Counter, Histogram, Meter},
    KeyValue,
};

#[derive(Clone)]
pub struct BlobMetrics {
    operations: Histogram<f64>,
    errors: Counter<u64>,
}

impl BlobMetrics {
    pub fn new(meter: &Meter) -> Self {
        let operations = meter
            .f64_histogram("dataset_blob_operation_duration_seconds")
            .with_description("Duration of blob storage operations in seconds")
            .build();

        let errors = meter
            .u64_counter("dataset_blob_errors_total")
            .with_description("Total number of failed blob storage operations")
            .build();

        Self { operations, errors }
    }

    pub(crate) fn start(&self, op: &'static str) -> OpTimer {
        OpTimer {
            metrics: self.clone(),
            op,
            start: Instant::now(),
            failed: false,
        }
    }
}

/// Records the operation's duration on drop, and an error when marked failed.
pub(crate) struct OpTimer {
    metrics: BlobMetrics,
    op: &'static str,
    start: Instant,
    failed: bool,
}

impl OpTimer {
    pub(crate) fn observe<T, E>(&mut self, result: &Result<T, E>) {
        self.failed = result.is_err();
    }
}

impl Drop for OpTimer {
    fn drop(&mut self) {
        let labels = [KeyValue::new("op", self.op)];
        self.metrics
            .operations
            .record(self.start.elapsed().as_secs_f64(), &labels);
        if self.failed {
            self.metrics.errors.add(1, &labels);
        }
    }
}
