//! Voice packet routing (spec §4.5): UDP/tunnel decode, address learning,
//! target expansion, and per-listener delivery. Grounded on VoIPC's
//! `udp.rs` receive loop for the address-learning shape and on
//! `TheiLLeniumStudios-ZUMBLE`'s `find_client_with_decrypt` for the
//! try-every-client fallback when a packet arrives from an unrecognized
//! address.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use mumble_core::session::Session;
use mumble_core::target::{SERVER_BROADCAST_TARGET, VoiceTarget};
use mumble_proto::voice::{VoiceCodec, VoicePacket};
use mumble_proto::voice::{ServerBound};
use tokio::net::UdpSocket;

use crate::client::Client;
use crate::client_manager::ClientManager;
use crate::cluster_voice::{self, PeerRegistry};
use crate::state::EdgeState;

/// Resolves the sending client for a UDP datagram: the fast path looks up
/// the already-learned address; the slow path tries decrypting against
/// every locally attached client and claims the address on first success
/// (spec §4.5 "per-client crypto-validate-to-claim").
pub async fn resolve_sender(clients: &ClientManager, addr: SocketAddr, packet: &[u8]) -> Option<(Arc<Client>, Vec<u8>)> {
    if let Some(client) = clients.get_by_addr(&addr) {
        if let Ok(plain) = client.crypt_state.write().await.decrypt(packet) {
            return Some((client, plain));
        }
        // A learned address whose decrypt now fails (key rotated, spoofed
        // source) falls through to the full candidate search below.
    }

    for candidate in clients.candidates_for_learning() {
        if let Ok(plain) = candidate.crypt_state.write().await.decrypt(packet) {
            clients.learn_addr(addr, candidate.session_id);
            candidate.set_udp_addr(addr).await;
            return Some((candidate, plain));
        }
    }

    None
}

/// Every session that should receive a voice packet sent with `target`,
/// cluster-wide (spec §4.5): target 0 is the sender's current channel,
/// 1..=30 is a stored `VoiceTarget` configuration, 31 is a full server
/// broadcast.
/// A session excluded from receiving voice regardless of target (spec
/// §4.5: "minus muted/deafened peers").
fn is_muted_or_deafened(session: &Session) -> bool {
    session.flags.mute || session.flags.self_mute || session.flags.deaf || session.flags.self_deaf
}

async fn listeners_for_target(sender: &Session, target: u8, client: &Client, state: &EdgeState) -> Vec<Session> {
    let mut listeners = if target == SERVER_BROADCAST_TARGET {
        state.all_sessions().into_iter().filter(|s| s.session_id != sender.session_id).collect()
    } else if target == 0 {
        let mut listeners = state.sessions_in_channel(sender.channel_id);
        listeners.extend(state.sessions_listening_to(sender.channel_id));
        listeners.retain(|s| s.session_id != sender.session_id);
        listeners
    } else {
        let Some(voice_target) = client.target(target).await else { return Vec::new() };
        expand_voice_target(&voice_target, sender, state).await
    };

    listeners.retain(|s| !is_muted_or_deafened(s));
    listeners
}

async fn expand_voice_target(voice_target: &VoiceTarget, sender: &Session, state: &EdgeState) -> Vec<Session> {
    let mut out = Vec::new();

    for &session_id in &voice_target.sessions {
        if session_id == sender.session_id {
            continue;
        }
        if let Some(session) = state.session(session_id) {
            out.push(session);
        }
    }

    for target_channel in &voice_target.channels {
        let channel_ids = state.expand_channel_target(target_channel.channel_id, target_channel.links, target_channel.children).await;

        for channel_id in channel_ids {
            for session in state.sessions_in_channel(channel_id) {
                if session.session_id == sender.session_id {
                    continue;
                }
                if let Some(group) = &target_channel.group {
                    if !session.groups.iter().any(|g| g == group) {
                        continue;
                    }
                }
                out.push(session);
            }
        }
    }

    out
}

/// Delivers `packet` from `sender` to every relevant listener: the subset
/// already attached to this Edge get it directly (encrypted per-listener
/// or tunneled), the rest are handed to the cross-Edge plane in one relay
/// (spec §4.5 "forwarded cross-Edge").
#[allow(clippy::too_many_arguments)]
pub async fn route_voice_packet(
    sender: &Client,
    sender_session: &Session,
    packet: VoicePacket<ServerBound>,
    state: &EdgeState,
    clients: &ClientManager,
    local_edge_id: &str,
    peers: &PeerRegistry,
    cluster_socket: &UdpSocket,
) {
    if sender_session.flags.suppress {
        return;
    }

    let listeners = listeners_for_target(sender_session, packet.target, sender, state).await;
    if listeners.is_empty() {
        return;
    }

    let rewritten = packet.rewrite_for_listener(sender_session.session_id);

    let mut has_remote = false;
    for listener in &listeners {
        if listener.edge_id != local_edge_id {
            has_remote = true;
            continue;
        }

        if let Some(local_client) = clients.get(listener.session_id) {
            if let Err(e) = local_client.send_voice_packet(rewritten.clone()).await {
                tracing::debug!("voice delivery to session {} failed: {e}", listener.session_id);
            }
        }
    }

    if has_remote {
        cluster_voice::relay_to_peers(cluster_socket, peers, local_edge_id, sender_session.session_id, sender_session.channel_id, &rewritten).await;
    }
}

/// Handles one datagram off the client-facing UDP socket: resolves the
/// sender, decrypts, decodes, and routes (or answers a voice-channel
/// `Ping` locally without going through the dispatcher).
#[allow(clippy::too_many_arguments)]
pub async fn handle_udp_datagram(
    data: &[u8],
    addr: SocketAddr,
    clients: &ClientManager,
    state: &EdgeState,
    local_edge_id: &str,
    peers: &PeerRegistry,
    cluster_socket: &UdpSocket,
) {
    let Some((client, plain)) = resolve_sender(clients, addr, data).await else {
        tracing::debug!("dropping udp datagram from unresolved address {addr}");
        crate::metrics::CRYPT_DROPS_TOTAL.with_label_values(&["unresolved"]).inc();
        return;
    };

    let packet = match VoicePacket::<ServerBound>::decode(BytesMut::from(&plain[..])) {
        Ok(packet) => packet,
        Err(e) => {
            tracing::debug!("dropping malformed voice packet from session {}: {e}", client.session_id);
            return;
        }
    };

    let Some(sender_session) = state.session(client.session_id) else {
        tracing::debug!("dropping voice packet from session {} with no session mirror entry", client.session_id);
        return;
    };

    if packet.codec == VoiceCodec::Ping {
        let mut dest = BytesMut::new();
        client.crypt_state.write().await.encrypt(&packet.payload, &mut dest);
        if let Err(e) = client.udp_socket.send_to(&dest, addr).await {
            tracing::debug!("voice ping echo to session {} failed: {e}", client.session_id);
        }
        return;
    }

    route_voice_packet(&client, &sender_session, packet, state, clients, local_edge_id, peers, cluster_socket).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    use mumble_core::channel::{Channel, ChannelTree};
    use mumble_core::target::TargetChannel;

    fn session(id: u32, edge: &str, channel_id: u32, groups: Vec<&str>) -> Session {
        Session {
            session_id: id,
            edge_id: edge.to_string(),
            user_id: 0,
            username: format!("s{id}"),
            channel_id,
            ip_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            cert_hash: None,
            flags: Default::default(),
            groups: groups.into_iter().map(str::to_string).collect(),
            listening_channels: Default::default(),
            connected_at: 0,
            last_active: 0,
        }
    }

    #[tokio::test]
    async fn target_zero_is_same_channel_excluding_sender() {
        let state = EdgeState::new();
        let sender = session(1, "edge-a", 0, vec![]);
        state.upsert_session(sender.clone());
        state.upsert_session(session(2, "edge-a", 0, vec![]));
        state.upsert_session(session(3, "edge-a", 9, vec![]));

        let voice_target = VoiceTarget::default();
        let group_filtered = expand_voice_target(&voice_target, &sender, &state).await;
        assert!(group_filtered.is_empty());

        let mut listeners = state.sessions_in_channel(0);
        listeners.retain(|s| s.session_id != sender.session_id);
        assert_eq!(listeners.len(), 1);
        assert_eq!(listeners[0].session_id, 2);
    }

    #[tokio::test]
    async fn voice_target_group_filter_excludes_non_members() {
        let state = EdgeState::new();
        let sender = session(1, "edge-a", 0, vec![]);
        state.upsert_session(sender.clone());
        state.upsert_session(session(2, "edge-a", 5, vec!["mods"]));
        state.upsert_session(session(3, "edge-a", 5, vec![]));

        let mut tree = ChannelTree::new();
        tree.insert(Channel::new(5, 0, "Ops".to_string(), String::new(), false));
        state.replace_channels(tree).await;

        let voice_target = VoiceTarget {
            sessions: vec![],
            channels: vec![TargetChannel { channel_id: 5, group: Some("mods".to_string()), links: false, children: false }],
        };

        let listeners = expand_voice_target(&voice_target, &sender, &state).await;
        assert_eq!(listeners.len(), 1);
        assert_eq!(listeners[0].session_id, 2);
    }
}
