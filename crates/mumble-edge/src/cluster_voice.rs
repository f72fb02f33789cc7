//! Cross-Edge voice plane (spec §4.9): a dedicated UDP socket per Edge at
//! `(host, voice_port)` carrying opaque relay frames between Edges so a
//! speaker on one Edge can reach a listener attached to another. Grounded
//! on the teacher's `udp.rs` receive-loop shape (VoIPC's `run_udp_loop`),
//! with crypto stripped out: this plane is trusted inter-Edge
//! infrastructure, never reachable by a Mumble client directly.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use dashmap::DashMap;
use mumble_proto::voice::{encode_voice_packet, Clientbound, VoicePacket};
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;

use crate::client_manager::ClientManager;
use crate::state::EdgeState;

pub type EdgeId = String;

/// A voice frame already rewritten for listener delivery (target bits
/// zeroed, sender session prepended) by the sending Edge's voice router,
/// forwarded as-is to every peer Edge with a local listener in
/// `channel_id` (spec §4.9: "no decryption/retransmission on receiving
/// side" — it was never OCB2-encrypted to begin with).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayFrame {
    pub sender_edge_id: EdgeId,
    pub sender_session_id: u32,
    pub channel_id: u32,
    pub payload: Vec<u8>,
}

/// The live `edge_id -> (host, voice_port)` map, populated from the Hub's
/// `peerJoined`/`peerLeft` notifications (spec §4.9 "Registry from Hub").
#[derive(Default)]
pub struct PeerRegistry {
    peers: DashMap<EdgeId, SocketAddr>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, edge_id: EdgeId, addr: SocketAddr) {
        self.peers.insert(edge_id, addr);
    }

    pub fn remove(&self, edge_id: &str) {
        self.peers.remove(edge_id);
    }

    pub fn addr_of(&self, edge_id: &str) -> Option<SocketAddr> {
        self.peers.get(edge_id).map(|a| *a)
    }

    pub fn all_except(&self, exclude: &str) -> Vec<(EdgeId, SocketAddr)> {
        self.peers.iter().filter(|e| e.key() != exclude).map(|e| (e.key().clone(), *e.value())).collect()
    }
}

/// Encodes and sends `packet` to every peer Edge, for the router to call
/// once per outgoing voice packet whose channel has no known local
/// listeners of its own but is on record as cluster-wide (spec §4.5
/// "forwarded cross-Edge").
pub async fn relay_to_peers(
    socket: &UdpSocket,
    peers: &PeerRegistry,
    local_edge_id: &str,
    sender_session_id: u32,
    channel_id: u32,
    packet: &VoicePacket<Clientbound>,
) {
    let mut encoded = BytesMut::new();
    encode_voice_packet(packet, &mut encoded);

    let frame = RelayFrame { sender_edge_id: local_edge_id.to_string(), sender_session_id, channel_id, payload: encoded.to_vec() };

    let bytes = match postcard::to_allocvec(&frame) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!("failed to encode cross-edge relay frame: {e}");
            return;
        }
    };

    for (edge_id, addr) in peers.all_except(local_edge_id) {
        if let Err(e) = socket.send_to(&bytes, addr).await {
            tracing::debug!("cross-edge send to {edge_id} at {addr} failed: {e}");
        }
    }
}

/// Receive loop for the cross-Edge plane: decodes each relay frame and
/// fans it out to every locally-attached listener in `channel_id`, minus
/// anyone muted/deafened (spec §4.5's listener filter applies uniformly
/// regardless of which Edge forwarded the packet).
pub async fn run_cluster_voice_loop(socket: Arc<UdpSocket>, state: Arc<EdgeState>, clients: Arc<ClientManager>) {
    let mut buf = vec![0u8; 4096];

    loop {
        let (len, _from) = match socket.recv_from(&mut buf).await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!("cross-edge voice socket recv error: {e}");
                continue;
            }
        };

        let frame: RelayFrame = match postcard::from_bytes(&buf[..len]) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!("dropping malformed cross-edge relay frame: {e}");
                continue;
            }
        };

        let packet = match VoicePacket::<Clientbound>::from_wire(BytesMut::from(&frame.payload[..])) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::debug!("dropping cross-edge relay frame with bad voice header: {e}");
                continue;
            }
        };

        let mut listeners = state.sessions_in_channel(frame.channel_id);
        listeners.extend(state.sessions_listening_to(frame.channel_id));

        for listener in listeners {
            if listener.session_id == frame.sender_session_id {
                continue;
            }
            if listener.flags.deaf || listener.flags.self_deaf {
                continue;
            }

            if let Some(local_client) = clients.get(listener.session_id) {
                if let Err(e) = local_client.send_voice_packet(packet.clone()).await {
                    tracing::debug!("failed to deliver relayed voice to session {}: {e}", listener.session_id);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn registry_excludes_self_and_tracks_removal() {
        let registry = PeerRegistry::new();
        registry.upsert("edge-a".to_string(), SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 64739));
        registry.upsert("edge-b".to_string(), SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)), 64739));

        let peers = registry.all_except("edge-a");
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].0, "edge-b");

        registry.remove("edge-b");
        assert!(registry.addr_of("edge-b").is_none());
    }
}
