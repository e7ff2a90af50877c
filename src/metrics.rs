use std::fmt::Write as _;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub struct Metrics {
    // Queries
    pub queries_executed_total: AtomicU64,
    pub query_failures_total: AtomicU64,
    pub stale_results_total: AtomicU64,
    pub query_duration_ms_total: AtomicU64,

    // Materialization
    pub documents_fetched_total: AtomicU64,
    pub includes_fetched_total: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            queries_executed_total: AtomicU64::new(0),
            query_failures_total: AtomicU64::new(0),
            stale_results_total: AtomicU64::new(0),
            query_duration_ms_total: AtomicU64::new(0),
            documents_fetched_total: AtomicU64::new(0),
            includes_fetched_total: AtomicU64::new(0),
        }
    }
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

pub fn metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::default)
}

/// Counts one submission to the executor, whatever its outcome.
pub(crate) fn record_query_executed(elapsed: Duration) {
    let m = metrics();
    m.queries_executed_total.fetch_add(1, Ordering::Relaxed);
    m.query_duration_ms_total
        .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
}

pub(crate) fn record_query_failure() {
    metrics().query_failures_total.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_stale_result() {
    metrics().stale_results_total.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_documents_fetched(count: u64) {
    metrics()
        .documents_fetched_total
        .fetch_add(count, Ordering::Relaxed);
}

pub(crate) fn record_includes_fetched(count: u64) {
    metrics()
        .includes_fetched_total
        .fetch_add(count, Ordering::Relaxed);
}

pub fn render_prometheus() -> String {
    let m = metrics();
    let mut s = String::new();
    // queries
    let _ = writeln!(
        s,
        "# TYPE queries_executed_total counter\nqueries_executed_total {}",
        m.queries_executed_total.load(Ordering::Relaxed)
    );
    let _ = writeln!(
        s,
        "# TYPE query_failures_total counter\nquery_failures_total {}",
        m.query_failures_total.load(Ordering::Relaxed)
    );
    let _ = writeln!(
        s,
        "# TYPE stale_results_total counter\nstale_results_total {}",
        m.stale_results_total.load(Ordering::Relaxed)
    );
    let _ = writeln!(
        s,
        "# TYPE query_duration_ms_total counter\nquery_duration_ms_total {}",
        m.query_duration_ms_total.load(Ordering::Relaxed)
    );
    // materialization
    let _ = writeln!(
        s,
        "# TYPE documents_fetched_total counter\ndocuments_fetched_total {}",
        m.documents_fetched_total.load(Ordering::Relaxed)
    );
    let _ = writeln!(
        s,
        "# TYPE includes_fetched_total counter\nincludes_fetched_total {}",
        m.includes_fetched_total.load(Ordering::Relaxed)
    );
    s
}
