//! Edge→Hub RPC client (spec §4.6 "Edge side"): owns the single long-lived
//! control stream to the Hub, multiplexing typed request/response calls
//! over it alongside fire-and-forget notifications, and applying every
//! inbound [`HubNotification`] to the local [`EdgeState`]/[`BanCache`]
//! mirror before handing it off for delivery to connected clients.
//!
//! Mirrors the Hub's own `control_connection::handle` loop in
//! `mumble-hub/src/main.rs` from the other side of the wire: one
//! `tokio::select!` over inbound envelopes and outbound writes, except
//! here the Edge is the one dialing out and reconnecting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use mumble_core::channel::ChannelTree;
use mumble_rpc::envelope::{read_envelope, write_envelope, CallId, Envelope, EnvelopeError};
use mumble_rpc::methods::{EdgeInfo, EdgeNotification, HubNotification, RpcError, RpcRequest, RpcResponse};
use tokio::io::{split, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Notify};

use crate::ban_cache::BanCache;
use crate::config::HubConnectionConfig;
use crate::metrics;
use crate::state::EdgeState;

type Pending = DashMap<CallId, oneshot::Sender<Result<RpcResponse, RpcError>>>;

/// Handle shared across every client-handling task on this Edge. Cloning
/// is cheap (it's just an `Arc` inside); `call`/`notify` work whether or
/// not the underlying stream is currently connected, queuing or failing
/// fast per method.
#[derive(Clone)]
pub struct HubClient {
    inner: Arc<Inner>,
}

struct Inner {
    info: EdgeInfo,
    config: HubConnectionConfig,
    pending: Pending,
    next_call_id: AtomicU64,
    outbound: mpsc::UnboundedSender<Envelope>,
    connected: Notify,
    is_connected: std::sync::atomic::AtomicBool,
}

impl HubClient {
    /// Dials the Hub, performs `EdgeRegister` + `EdgeFullSync`, and spawns
    /// the background connection-management task. Returns once the first
    /// connection attempt either succeeds or has been handed off to the
    /// reconnect loop, along with a receiver of every [`HubNotification`]
    /// for `handler.rs` to relay to locally connected clients.
    pub fn start(info: EdgeInfo, config: HubConnectionConfig, state: Arc<EdgeState>, ban_cache: Arc<BanCache>) -> (Self, mpsc::UnboundedReceiver<HubNotification>) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();

        let client = HubClient {
            inner: Arc::new(Inner {
                info,
                config,
                pending: DashMap::new(),
                next_call_id: AtomicU64::new(1),
                outbound: outbound_tx,
                connected: Notify::new(),
                is_connected: std::sync::atomic::AtomicBool::new(false),
            }),
        };

        tokio::spawn(run_reconnect_loop(client.clone(), state, ban_cache, notify_tx, outbound_rx));

        (client, notify_rx)
    }

    /// Issues a request and awaits its matching response, bounded by
    /// `hub.call_timeout_secs` (spec §4.6 "calls that outlive the
    /// timeout fail with `Timeout`").
    pub async fn call(&self, method: RpcRequest) -> Result<RpcResponse, RpcError> {
        if !self.inner.is_connected.load(Ordering::Acquire) {
            return Err(RpcError::HubUnavailable);
        }

        let id = self.inner.next_call_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.inner.pending.insert(id, tx);

        if self.inner.outbound.send(Envelope::Request { id, method }).is_err() {
            self.inner.pending.remove(&id);
            return Err(RpcError::HubUnavailable);
        }

        match tokio::time::timeout(Duration::from_secs(self.inner.config.call_timeout_secs), rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RpcError::HubUnavailable),
            Err(_) => {
                self.inner.pending.remove(&id);
                Err(RpcError::Timeout)
            }
        }
    }

    /// Sends a notification without waiting for acknowledgement. Silently
    /// dropped if the Hub link is currently down; the Hub never learns of
    /// it, matching the spec's framing that Edge→Hub notifications are
    /// best-effort (client-visible state still reflects the local Edge
    /// immediately, same as `handler.rs`'s optimistic local apply).
    pub fn notify(&self, method: EdgeNotification) {
        let _ = self.inner.outbound.send(Envelope::EdgeNotify { method });
    }

    pub fn is_connected(&self) -> bool {
        self.inner.is_connected.load(Ordering::Acquire)
    }

    /// Awaits the first successful connection, for callers that want to
    /// hold off accepting client traffic until the Edge has a working
    /// mirror (spec §7 "Hub unreachable at Edge startup").
    pub async fn wait_connected(&self) {
        loop {
            if self.is_connected() {
                return;
            }
            let notified = self.inner.connected.notified();
            if self.is_connected() {
                return;
            }
            notified.await;
        }
    }
}

async fn run_reconnect_loop(
    client: HubClient,
    state: Arc<EdgeState>,
    ban_cache: Arc<BanCache>,
    notify_tx: mpsc::UnboundedSender<HubNotification>,
    mut outbound_rx: mpsc::UnboundedReceiver<Envelope>,
) {
    let mut backoff = client.inner.config.reconnect_initial_secs;

    loop {
        match TcpStream::connect(&client.inner.config.address).await {
            Ok(stream) => {
                tracing::info!("connected to hub at {}", client.inner.config.address);
                let (mut reader, mut writer) = split(stream);

                match register_and_sync(&client, &mut reader, &mut writer, &state, &ban_cache).await {
                    Ok(()) => {
                        backoff = client.inner.config.reconnect_initial_secs;
                        client.inner.is_connected.store(true, Ordering::Release);
                        client.inner.connected.notify_waiters();

                        run_connection(&client, reader, writer, &state, &notify_tx, &mut outbound_rx).await;

                        client.inner.is_connected.store(false, Ordering::Release);
                        fail_all_pending(&client);
                        metrics::HUB_RECONNECTS_TOTAL.inc();
                        tracing::warn!("hub connection lost, reconnecting");
                    }
                    Err(e) => {
                        tracing::warn!("hub registration failed: {e}");
                    }
                }
            }
            Err(e) => {
                tracing::warn!("failed to connect to hub at {}: {e}", client.inner.config.address);
            }
        }

        tokio::time::sleep(Duration::from_secs(backoff)).await;
        backoff = (backoff * 2).min(client.inner.config.reconnect_max_secs);
    }
}

/// Performs the initial `EdgeRegister` + `EdgeFullSync` handshake on a
/// freshly dialed stream before handing it to the steady-state
/// `run_connection` loop, so the mirror is populated before any
/// notification could reference state it doesn't have yet. Runs directly
/// against the split halves rather than through `call()`'s pending-map
/// machinery, since nothing else is reading this stream yet.
async fn register_and_sync(
    client: &HubClient,
    reader: &mut ReadHalf<TcpStream>,
    writer: &mut WriteHalf<TcpStream>,
    state: &Arc<EdgeState>,
    ban_cache: &Arc<BanCache>,
) -> Result<(), EnvelopeError> {
    write_envelope(writer, &Envelope::Request { id: 0, method: RpcRequest::EdgeRegister(client.inner.info.clone()) }).await?;
    match read_envelope(reader).await? {
        Envelope::Response { result: Ok(RpcResponse::EdgeRegister { accepted: true }), .. } => {}
        Envelope::Response { result: Ok(_), .. } => return Err(EnvelopeError::Eof),
        Envelope::Response { result: Err(e), .. } => {
            tracing::warn!("hub rejected edge registration: {e}");
            return Err(EnvelopeError::Eof);
        }
        _ => return Err(EnvelopeError::Eof),
    }

    write_envelope(writer, &Envelope::Request { id: 1, method: RpcRequest::EdgeFullSync { edge_id: client.inner.info.edge_id.clone() } }).await?;
    match read_envelope(reader).await? {
        Envelope::Response { result: Ok(RpcResponse::EdgeFullSync { channels, bans, sessions, sequence, .. }), .. } => {
            state.replace_channels(rebuild_channel_tree(channels)).await;
            state.replace_sessions(sessions);
            state.observe_sequence(sequence);
            ban_cache.load(bans).await;
            Ok(())
        }
        _ => Err(EnvelopeError::Eof),
    }
}

async fn run_connection(
    client: &HubClient,
    mut reader: ReadHalf<TcpStream>,
    mut writer: WriteHalf<TcpStream>,
    state: &Arc<EdgeState>,
    notify_tx: &mpsc::UnboundedSender<HubNotification>,
    outbound_rx: &mut mpsc::UnboundedReceiver<Envelope>,
) {
    let mut heartbeat = tokio::time::interval(Duration::from_secs(client.inner.config.heartbeat_interval_secs));

    loop {
        tokio::select! {
            envelope = read_envelope(&mut reader) => {
                match envelope {
                    Ok(Envelope::Response { id, result }) => {
                        if let Some((_, tx)) = client.inner.pending.remove(&id) {
                            let _ = tx.send(result);
                        }
                    }
                    Ok(Envelope::HubNotify { method }) => {
                        state.observe_sequence(method.sequence());
                        apply_to_mirror(state, &method);
                        let _ = notify_tx.send(method);
                    }
                    Ok(Envelope::Request { .. }) | Ok(Envelope::EdgeNotify { .. }) => {
                        tracing::debug!("ignoring unexpected envelope direction from hub");
                    }
                    Err(EnvelopeError::Eof) => return,
                    Err(e) => {
                        tracing::warn!("hub connection read error: {e}");
                        return;
                    }
                }
            }
            envelope = outbound_rx.recv() => {
                match envelope {
                    Some(envelope) => {
                        if let Err(e) = write_envelope(&mut writer, &envelope).await {
                            tracing::warn!("hub connection write error: {e}");
                            return;
                        }
                    }
                    None => return,
                }
            }
            _ = heartbeat.tick() => {
                let method = RpcRequest::EdgeHeartbeat {
                    edge_id: client.inner.info.edge_id.clone(),
                    stats: mumble_rpc::methods::EdgeStats { session_count: 0, cpu_load: 0.0, udp_bytes_in: 0, udp_bytes_out: 0 },
                };
                if write_envelope(&mut writer, &Envelope::Request { id: 0, method }).await.is_err() {
                    return;
                }
            }
        }
    }
}

/// Applies the cluster-wide side effects of a [`HubNotification`] to the
/// Edge mirror (spec §3 "State mirror"); delivery to locally connected
/// clients is `handler.rs`'s job once it receives the notification off
/// the channel this task forwards into.
fn apply_to_mirror(state: &Arc<EdgeState>, notification: &HubNotification) {
    match notification {
        HubNotification::UserJoined { session, .. } => state.upsert_session(session.clone()),
        HubNotification::UserLeft { session_id, .. } => {
            state.remove_session(*session_id);
        }
        HubNotification::UserStateBroadcast { session, .. } => state.upsert_session(session.clone()),
        HubNotification::UserStateChanged { session_id, patch, .. } => state.apply_user_state_patch(*session_id, patch),
        HubNotification::UserRemoveBroadcast { session_id, .. } => {
            state.remove_session(*session_id);
        }
        _ => {}
    }
}

/// Drops every in-flight call's sender; each caller's `rx.await` then
/// resolves to a closed-channel error, which `call()` maps to
/// `RpcError::HubUnavailable`.
fn fail_all_pending(client: &HubClient) {
    client.inner.pending.clear();
}

/// Rebuilds the mirror's channel tree from a full-sync snapshot (spec §4.6
/// "on connect... apply the resulting `EdgeFullSync`"). `ChannelTree`
/// stores each channel's own `links` set inline, so replaying `insert`
/// per channel is sufficient without separate `link` calls.
pub fn rebuild_channel_tree(channels: Vec<mumble_core::channel::Channel>) -> ChannelTree {
    let mut tree = ChannelTree::new();
    for channel in channels {
        tree.insert(channel);
    }
    tree
}
