//! Prometheus metrics for search traffic.

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram, register_int_counter_vec, Histogram, IntCounterVec,
};

pub static SEARCH_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "search_requests_total",
        "Total search requests",
        &["strategy", "status"]
    )
    .expect("register search_requests_total")
});

pub static SEARCH_DURATION_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!("search_duration_seconds", "Search request duration")
        .expect("register search_duration_seconds")
});

/// Record one completed search request.
pub fn observe_search(strategy: &str, success: bool, duration_ms: f64) {
    let status = if success { "success" } else { "error" };
    SEARCH_REQUESTS_TOTAL
        .with_label_values(&[strategy, status])
        .inc();
    SEARCH_DURATION_SECONDS.observe(duration_ms / 1000.0);
}
