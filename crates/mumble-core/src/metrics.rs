//! Prometheus metrics shared by both the Hub and Edge binaries, following
//! the teacher's `lazy_static! { static ref X: ... }` convention against
//! the default global registry. Each binary's own `metrics.rs` adds
//! process-specific gauges on top of these.

use lazy_static::lazy_static;
use prometheus::{HistogramVec, IntCounterVec, Opts};

lazy_static! {
    pub static ref MESSAGES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("mumble_messages_total", "Number of Mumble protocol messages processed"),
        &["transport", "direction", "kind"]
    )
    .expect("metric can be created");
    pub static ref MESSAGES_BYTES: IntCounterVec = IntCounterVec::new(
        Opts::new("mumble_message_bytes_total", "Bytes of Mumble protocol messages processed"),
        &["transport", "direction", "kind"]
    )
    .expect("metric can be created");
    pub static ref RPC_LATENCY_SECONDS: HistogramVec = HistogramVec::new(
        prometheus::HistogramOpts::new("mumble_rpc_latency_seconds", "Edge<->Hub RPC round-trip latency"),
        &["method"]
    )
    .expect("metric can be created");
}

/// Registers the shared metrics into the process-wide default registry.
/// Safe to call once per process at startup; binaries call this before
/// registering their own additional metrics.
pub fn register_shared() {
    let registry = prometheus::default_registry();
    let _ = registry.register(Box::new(MESSAGES_TOTAL.clone()));
    let _ = registry.register(Box::new(MESSAGES_BYTES.clone()));
    let _ = registry.register(Box::new(RPC_LATENCY_SECONDS.clone()));
}

/// Renders the default registry in the Prometheus text exposition format,
/// for the admin HTTP `/metrics` handler.
pub fn gather_text() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let families = prometheus::gather();
    let mut buf = Vec::new();
    encoder.encode(&families, &mut buf).unwrap_or_default();
    String::from_utf8(buf).unwrap_or_default()
}
