//! Edge-specific prometheus gauges, layered on top of
//! [`mumble_core::metrics`]'s shared message/RPC-latency metrics.

use lazy_static::lazy_static;
use prometheus::{IntCounterVec, IntGauge, Opts};

lazy_static! {
    pub static ref CLIENTS_ONLINE: IntGauge = IntGauge::new("mumble_edge_clients_online", "Clients currently connected to this Edge").expect("metric can be created");
    pub static ref VOICE_PACKETS_TOTAL: IntCounterVec =
        IntCounterVec::new(Opts::new("mumble_edge_voice_packets_total", "Voice packets routed"), &["path"]).expect("metric can be created");
    pub static ref CRYPT_DROPS_TOTAL: IntCounterVec =
        IntCounterVec::new(Opts::new("mumble_edge_crypt_drops_total", "Voice packets dropped on decrypt failure"), &["reason"]).expect("metric can be created");
    pub static ref HUB_RECONNECTS_TOTAL: IntGauge = IntGauge::new("mumble_edge_hub_reconnects_total", "Edge<->Hub reconnect attempts since startup").expect("metric can be created");
}

/// Registers this binary's own metrics plus the shared ones from
/// [`mumble_core::metrics::register_shared`].
pub fn register_all() {
    mumble_core::metrics::register_shared();
    let registry = prometheus::default_registry();
    let _ = registry.register(Box::new(CLIENTS_ONLINE.clone()));
    let _ = registry.register(Box::new(VOICE_PACKETS_TOTAL.clone()));
    let _ = registry.register(Box::new(CRYPT_DROPS_TOTAL.clone()));
    let _ = registry.register(Box::new(HUB_RECONNECTS_TOTAL.clone()));
}
