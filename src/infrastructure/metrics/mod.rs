//! Prometheus Metrics Module
//!
//! Hub-wide metrics collected with Prometheus.
//!
//! # Metrics Collected
//! - Active connection gauge
//! - Frames enqueued by broadcasts, by scope
//! - Evictions of unresponsive connections
//! - Inbound frames dropped, by reason
//! - Chat messages lost to persistence failures

use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

/// Live connections currently registered with the hub
pub static CONNECTIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::with_opts(
        Opts::new("connections_active", "Number of live hub connections").namespace("chat_hub"),
    )
    .expect("Failed to create CONNECTIONS_ACTIVE metric")
});

/// Frames placed on outbound queues, labelled by broadcast scope ("all", "room")
pub static FRAMES_ENQUEUED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("frames_enqueued_total", "Frames enqueued onto outbound queues")
            .namespace("chat_hub"),
        &["scope"],
    )
    .expect("Failed to create FRAMES_ENQUEUED_TOTAL metric")
});

/// Connections evicted because their outbound queue was full or closed
pub static EVICTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::with_opts(
        Opts::new("evictions_total", "Connections evicted as unresponsive").namespace("chat_hub"),
    )
    .expect("Failed to create EVICTIONS_TOTAL metric")
});

/// Inbound frames that were not acted on ("decode", "unknown_type", "server_only", ...)
pub static INBOUND_DROPPED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("inbound_dropped_total", "Inbound frames skipped").namespace("chat_hub"),
        &["reason"],
    )
    .expect("Failed to create INBOUND_DROPPED_TOTAL metric")
});

/// Chat messages dropped because the chat service rejected them
pub static PERSISTENCE_FAILURES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::with_opts(
        Opts::new(
            "persistence_failures_total",
            "Chat messages dropped after a persistence failure",
        )
        .namespace("chat_hub"),
    )
    .expect("Failed to create PERSISTENCE_FAILURES_TOTAL metric")
});

/// Register all metrics with the registry
fn register_metrics(registry: &Registry) {
    registry
        .register(Box::new(CONNECTIONS_ACTIVE.clone()))
        .expect("Failed to register CONNECTIONS_ACTIVE");
    registry
        .register(Box::new(FRAMES_ENQUEUED_TOTAL.clone()))
        .expect("Failed to register FRAMES_ENQUEUED_TOTAL");
    registry
        .register(Box::new(EVICTIONS_TOTAL.clone()))
        .expect("Failed to register EVICTIONS_TOTAL");
    registry
        .register(Box::new(INBOUND_DROPPED_TOTAL.clone()))
        .expect("Failed to register INBOUND_DROPPED_TOTAL");
    registry
        .register(Box::new(PERSISTENCE_FAILURES_TOTAL.clone()))
        .expect("Failed to register PERSISTENCE_FAILURES_TOTAL");
}

/// Collect and encode all metrics as Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Helper to update the live connection gauge
pub fn set_active_connections(count: usize) {
    CONNECTIONS_ACTIVE.set(count as i64);
}

/// Helper to count frames enqueued by one broadcast
pub fn record_enqueued(scope: &str, delivered: usize) {
    FRAMES_ENQUEUED_TOTAL
        .with_label_values(&[scope])
        .inc_by(delivered as u64);
}

pub fn record_eviction() {
    EVICTIONS_TOTAL.inc();
}

pub fn record_inbound_dropped(reason: &str) {
    INBOUND_DROPPED_TOTAL.with_label_values(&[reason]).inc();
}

pub fn record_persistence_failure() {
    PERSISTENCE_FAILURES_TOTAL.inc();
}
