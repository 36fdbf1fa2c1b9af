use std::sync::Arc;
use std::sync::Once;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use metrics::{Unit, counter, describe_counter, describe_gauge, gauge};

use crate::types::{BatchStats, JobId};

static REGISTER_METRICS: Once = Once::new();

pub const LDR_ROWS_APPLIED_TOTAL: &str = "ldr_rows_applied_total";
pub const LDR_ROWS_IGNORED_TOTAL: &str = "ldr_rows_ignored_total";
pub const LDR_BYTES_APPLIED_TOTAL: &str = "ldr_bytes_applied_total";
pub const LDR_KV_WRITES_TOTAL: &str = "ldr_kv_writes_total";
pub const LDR_OPTIMISTIC_INSERTS_TOTAL: &str = "ldr_optimistic_inserts_total";
pub const LDR_PURGATORY_BYTES: &str = "ldr_purgatory_bytes";
pub const LDR_PURGATORY_EVENTS: &str = "ldr_purgatory_events";
pub const LDR_DLQ_EVENTS_TOTAL: &str = "ldr_dlq_events_total";
pub const LDR_FLOW_RESTARTS_TOTAL: &str = "ldr_flow_restarts_total";
pub const JOB_ID: &str = "job_id";
pub const WRITE_KIND: &str = "write_kind";
pub const PUT: &str = "put";
pub const CPUT: &str = "cput";

/// Register metrics emitted by the ingestion core. This should be called before starting a job.
/// It is safe to call this method multiple times, the metrics are registered only once.
pub(crate) fn register_metrics() {
    REGISTER_METRICS.call_once(|| {
        describe_counter!(
            LDR_ROWS_APPLIED_TOTAL,
            Unit::Count,
            "Total number of replicated rows written to the local store"
        );

        describe_counter!(
            LDR_ROWS_IGNORED_TOTAL,
            Unit::Count,
            "Total number of replicated rows that lost conflict resolution"
        );

        describe_counter!(
            LDR_BYTES_APPLIED_TOTAL,
            Unit::Bytes,
            "Total number of bytes of applied change events"
        );

        describe_counter!(
            LDR_KV_WRITES_TOTAL,
            Unit::Count,
            "Total number of write requests issued to the key-value layer, by kind"
        );

        describe_counter!(
            LDR_OPTIMISTIC_INSERTS_TOTAL,
            Unit::Count,
            "Total number of rows inserted without reading the local row first"
        );

        describe_gauge!(
            LDR_PURGATORY_BYTES,
            Unit::Bytes,
            "Number of bytes of change events buffered in purgatory"
        );

        describe_gauge!(
            LDR_PURGATORY_EVENTS,
            Unit::Count,
            "Number of change events buffered in purgatory"
        );

        describe_counter!(
            LDR_DLQ_EVENTS_TOTAL,
            Unit::Count,
            "Total number of change events recorded in the dead letter queue"
        );

        describe_counter!(
            LDR_FLOW_RESTARTS_TOTAL,
            Unit::Count,
            "Total number of replication flow restarts"
        );
    });
}

#[derive(Debug, Default)]
struct Counters {
    rows_applied: AtomicU64,
    rows_ignored: AtomicU64,
    bytes_applied: AtomicU64,
    puts: AtomicU64,
    cputs: AtomicU64,
    optimistic_inserts: AtomicU64,
    purgatory_bytes: AtomicI64,
    purgatory_events: AtomicI64,
    dlq_events: AtomicU64,
    flow_restarts: AtomicU64,
}

/// Point in time copy of [`IngestionMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub rows_applied: u64,
    pub rows_ignored: u64,
    pub bytes_applied: u64,
    pub puts: u64,
    pub cputs: u64,
    pub optimistic_inserts: u64,
    pub purgatory_bytes: i64,
    pub purgatory_events: i64,
    pub dlq_events: u64,
    pub flow_restarts: u64,
}

/// Metrics of one ingestion job.
///
/// Values are kept in atomics, always consistent with the state they describe, and mirrored to the
/// global `metrics` recorder labelled with the job id.
#[derive(Debug, Clone)]
pub struct IngestionMetrics {
    job_id: JobId,
    counters: Arc<Counters>,
}

impl IngestionMetrics {
    pub fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            counters: Arc::new(Counters::default()),
        }
    }

    fn job_label(&self) -> String {
        self.job_id.to_string()
    }

    pub fn record_batch(&self, stats: &BatchStats) {
        let c = &self.counters;
        c.rows_applied.fetch_add(stats.rows_applied, Ordering::Relaxed);
        c.rows_ignored.fetch_add(stats.rows_ignored, Ordering::Relaxed);
        c.bytes_applied.fetch_add(stats.bytes_applied, Ordering::Relaxed);
        c.puts.fetch_add(stats.blind_puts, Ordering::Relaxed);
        c.cputs.fetch_add(stats.conditional_puts, Ordering::Relaxed);
        c.optimistic_inserts
            .fetch_add(stats.optimistic_inserts, Ordering::Relaxed);

        let job_id = self.job_label();
        counter!(LDR_ROWS_APPLIED_TOTAL, JOB_ID => job_id.clone()).increment(stats.rows_applied);
        counter!(LDR_ROWS_IGNORED_TOTAL, JOB_ID => job_id.clone()).increment(stats.rows_ignored);
        counter!(LDR_BYTES_APPLIED_TOTAL, JOB_ID => job_id.clone()).increment(stats.bytes_applied);
        counter!(LDR_KV_WRITES_TOTAL, JOB_ID => job_id.clone(), WRITE_KIND => PUT)
            .increment(stats.blind_puts);
        counter!(LDR_KV_WRITES_TOTAL, JOB_ID => job_id.clone(), WRITE_KIND => CPUT)
            .increment(stats.conditional_puts);
        counter!(LDR_OPTIMISTIC_INSERTS_TOTAL, JOB_ID => job_id)
            .increment(stats.optimistic_inserts);
    }

    /// Applies a change of the purgatory contents.
    pub fn adjust_purgatory(&self, bytes_delta: i64, events_delta: i64) {
        let bytes = self
            .counters
            .purgatory_bytes
            .fetch_add(bytes_delta, Ordering::Relaxed)
            + bytes_delta;
        let events = self
            .counters
            .purgatory_events
            .fetch_add(events_delta, Ordering::Relaxed)
            + events_delta;

        let job_id = self.job_label();
        gauge!(LDR_PURGATORY_BYTES, JOB_ID => job_id.clone()).set(bytes as f64);
        gauge!(LDR_PURGATORY_EVENTS, JOB_ID => job_id).set(events as f64);
    }

    pub fn record_dead_letter(&self) {
        self.counters.dlq_events.fetch_add(1, Ordering::Relaxed);
        counter!(LDR_DLQ_EVENTS_TOTAL, JOB_ID => self.job_label()).increment(1);
    }

    pub fn record_flow_restart(&self) {
        self.counters.flow_restarts.fetch_add(1, Ordering::Relaxed);
        counter!(LDR_FLOW_RESTARTS_TOTAL, JOB_ID => self.job_label()).increment(1);
    }

    pub fn purgatory_bytes(&self) -> i64 {
        self.counters.purgatory_bytes.load(Ordering::Relaxed)
    }

    pub fn purgatory_events(&self) -> i64 {
        self.counters.purgatory_events.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let c = &self.counters;
        MetricsSnapshot {
            rows_applied: c.rows_applied.load(Ordering::Relaxed),
            rows_ignored: c.rows_ignored.load(Ordering::Relaxed),
            bytes_applied: c.bytes_applied.load(Ordering::Relaxed),
            puts: c.puts.load(Ordering::Relaxed),
            cputs: c.cputs.load(Ordering::Relaxed),
            optimistic_inserts: c.optimistic_inserts.load(Ordering::Relaxed),
            purgatory_bytes: c.purgatory_bytes.load(Ordering::Relaxed),
            purgatory_events: c.purgatory_events.load(Ordering::Relaxed),
            dlq_events: c.dlq_events.load(Ordering::Relaxed),
            flow_restarts: c.flow_restarts.load(Ordering::Relaxed),
        }
    }
}
