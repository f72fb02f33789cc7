use prometheus::{IntCounterVec, IntGaugeVec, Opts, Registry};

lazy_static::lazy_static! {
    pub static ref EDGES_ONLINE: IntGaugeVec = IntGaugeVec::new(
        Opts::new("mumble_hub_edges_online", "Number of Edges currently marked online"),
        &["region"]
    ).unwrap();

    pub static ref SESSIONS_TOTAL: IntGaugeVec = IntGaugeVec::new(
        Opts::new("mumble_hub_sessions_total", "Sessions currently tracked by the Hub"),
        &["edge_id"]
    ).unwrap();

    pub static ref RPC_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("mumble_hub_rpc_requests_total", "RPC requests handled by method"),
        &["method"]
    ).unwrap();

    pub static ref PERMISSION_DENIALS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("mumble_hub_permission_denials_total", "Permission checks that resulted in denial"),
        &["reason"]
    ).unwrap();
}

pub fn register_all(registry: &Registry) -> prometheus::Result<()> {
    registry.register(Box::new(EDGES_ONLINE.clone()))?;
    registry.register(Box::new(SESSIONS_TOTAL.clone()))?;
    registry.register(Box::new(RPC_REQUESTS_TOTAL.clone()))?;
    registry.register(Box::new(PERMISSION_DENIALS_TOTAL.clone()))?;
    Ok(())
}
