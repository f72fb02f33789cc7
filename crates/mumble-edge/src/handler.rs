//! Edge message dispatcher (spec §4.4): the RUNNING-state per-client read
//! loop plus the Hub-notification relay loop that mirrors cluster state
//! changes back out to locally attached clients. Parses each frame, either
//! handles it locally (crypto setup, pings, voice target config, context
//! actions) or forwards it to the Hub as a typed notification/request,
//! exactly the split spec §4.4's table draws. Locally-handled messages
//! never mutate channel/user state authoritatively — only the Hub does,
//! and its broadcasts flow back through [`run_hub_notifications`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mumble_core::acl::{AclEntry, Principal};
use mumble_core::channel::Channel;
use mumble_core::group::ChannelGroup;
use mumble_core::target::{TargetChannel, VoiceTarget};
use mumble_proto::mumble::{
    ChannelRemove, ChannelState, ContextAction, PermissionDenied, Ping, PluginDataTransmission, TextMessage, UserRemove, UserState,
    VoiceTarget as VoiceTargetMessage, ACL as AclMessage,
};
use mumble_proto::{parse_message, read_frame, MessageKind};
use mumble_rpc::methods::{EdgeNotification, HubNotification, InheritedAclEntry, RpcRequest, RpcResponse, UserStatePatch};
use protobuf::Message as ProtobufMessage;
use tokio::io::ReadHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_rustls::server::TlsStream;

use crate::client::Client;
use crate::client_manager::ClientManager;
use crate::cluster_voice::PeerRegistry;
use crate::error::EdgeError;
use crate::hub_client::HubClient;
use crate::state::EdgeState;

/// Per-client scratch state for the two "local, superuser-gated" context
/// actions (spec §4.4): not mirrored to the Hub, since neither changes
/// authoritative state, only this Edge's own voice-routing behavior.
#[derive(Default)]
pub struct LocalContextFlags {
    pub group_shout: AtomicBool,
    pub promiscuous: AtomicBool,
}

/// Runs the RUNNING-state read loop for one client connection (spec §4.3
/// "RUNNING", §5 "messages from a single TLS connection are processed in
/// arrival order"). Returns once the client disconnects or a protocol/IO
/// error ends the connection; the caller is responsible for teardown
/// (clearing the UDP mapping, notifying the Hub of departure).
#[allow(clippy::too_many_arguments)]
pub async fn run_client(
    client: Arc<Client>,
    mut reader: ReadHalf<TlsStream<TcpStream>>,
    state: Arc<EdgeState>,
    clients: Arc<ClientManager>,
    hub: HubClient,
    edge_id: String,
    idle_timeout: Duration,
    local_flags: Arc<LocalContextFlags>,
) -> Result<(), EdgeError> {
    loop {
        let (kind, payload) = tokio::time::timeout(idle_timeout, read_frame(&mut reader))
            .await
            .map_err(|_| EdgeError::IdleTimeout)??;

        if let Err(e) = dispatch(&client, kind, &payload, &state, &clients, &hub, &edge_id, &local_flags).await {
            tracing::debug!(session_id = client.session_id, kind = %kind, "dispatch error: {e}");
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn dispatch(
    client: &Arc<Client>,
    kind: MessageKind,
    payload: &[u8],
    state: &EdgeState,
    clients: &ClientManager,
    hub: &HubClient,
    edge_id: &str,
    local_flags: &LocalContextFlags,
) -> Result<(), EdgeError> {
    if !hub.is_connected() && is_state_changing(kind) {
        let mut denied = PermissionDenied::new();
        denied.set_reason("Server must be connected to Hub".to_string());
        client.send_message(MessageKind::PermissionDenied, &denied).await?;
        return Ok(());
    }

    match kind {
        MessageKind::Ping => handle_ping(client, payload).await,
        MessageKind::CryptSetup => handle_crypt_setup(client, payload).await,
        MessageKind::VoiceTarget => handle_voice_target(client, payload, hub).await,
        MessageKind::ContextAction => handle_context_action(client, payload, state, hub, edge_id, local_flags).await,
        MessageKind::UserState => forward_user_state(client, payload, hub, edge_id).await,
        MessageKind::UserRemove => forward_user_remove(client, payload, hub, edge_id).await,
        MessageKind::ChannelState => forward_channel_state(client, payload, hub, edge_id).await,
        MessageKind::ChannelRemove => forward_channel_remove(client, payload, hub, edge_id).await,
        MessageKind::TextMessage => forward_text_message(client, payload, hub, edge_id).await,
        MessageKind::ACL => handle_acl(client, payload, hub).await,
        MessageKind::PluginDataTransmission => forward_plugin_data(client, payload, hub, edge_id).await,
        MessageKind::UserStats => handle_user_stats(client, payload, clients, state).await,
        MessageKind::RequestBlob => handle_request_blob(client, payload, state, hub).await,
        MessageKind::QueryUsers | MessageKind::PermissionQuery | MessageKind::CodecVersion | MessageKind::SuggestConfig | MessageKind::ServerConfig => {
            tracing::debug!(session_id = client.session_id, kind = %kind, "message accepted but opaque to routing (spec §9: codec negotiation is opaque)");
            Ok(())
        }
        MessageKind::Version | MessageKind::Authenticate | MessageKind::Reject | MessageKind::ServerSync | MessageKind::BanList | MessageKind::UserList
        | MessageKind::UDPTunnel | MessageKind::PermissionDenied | MessageKind::ContextActionModify => {
            Err(EdgeError::Protocol(format!("{kind} is not expected from a RUNNING client")))
        }
    }
}

fn is_state_changing(kind: MessageKind) -> bool {
    matches!(
        kind,
        MessageKind::UserState
            | MessageKind::UserRemove
            | MessageKind::ChannelState
            | MessageKind::ChannelRemove
            | MessageKind::TextMessage
            | MessageKind::ACL
            | MessageKind::PluginDataTransmission
    )
}

/// spec §4.4 "Ping: reply, update last_ping, accept remote crypto stats
/// fields".
async fn handle_ping(client: &Client, payload: &[u8]) -> Result<(), EdgeError> {
    let ping: Ping = parse_message(payload)?;
    client.touch_ping().await;

    {
        let mut crypt = client.crypt_state.write().await;
        crypt.remote_stats.good = ping.get_good();
        crypt.remote_stats.late = ping.get_late();
        crypt.remote_stats.lost = ping.get_lost();
        crypt.remote_stats.resync = ping.get_resync();
    }

    let crypt = client.crypt_state.read().await;
    let mut reply = Ping::new();
    reply.set_timestamp(ping.get_timestamp());
    reply.set_good(crypt.stats.good);
    reply.set_late(crypt.stats.late);
    reply.set_lost(crypt.stats.lost);
    reply.set_resync(crypt.stats.resync);
    drop(crypt);

    client.send_message(MessageKind::Ping, &reply).await
}

/// spec §4.4 "CryptSetup: empty client_nonce ⇒ reply with current server
/// encrypt IV; non-empty 16-byte nonce ⇒ install as decrypt IV, increment
/// resync counter".
async fn handle_crypt_setup(client: &Client, payload: &[u8]) -> Result<(), EdgeError> {
    let setup: mumble_proto::mumble::CryptSetup = parse_message(payload)?;

    if setup.get_client_nonce().is_empty() {
        client.send_crypt_setup(false).await
    } else {
        client.crypt_state.write().await.set_decrypt_nonce(setup.get_client_nonce());
        Ok(())
    }
}

/// spec §4.4 "VoiceTarget: store target config locally and mirror to Hub
/// via edge.syncVoiceTarget". A `targets` list of zero entries clears the
/// slot (spec §3 "Clearing a target = empty target list").
async fn handle_voice_target(client: &Client, payload: &[u8], hub: &HubClient) -> Result<(), EdgeError> {
    let message: VoiceTargetMessage = parse_message(payload)?;
    let id = message.get_id() as u8;
    if !(mumble_core::target::MIN_TARGET_ID..=mumble_core::target::MAX_TARGET_ID).contains(&id) {
        return Err(EdgeError::Protocol(format!("voice target id {id} out of range")));
    }

    let mut target = VoiceTarget::default();
    for entry in message.get_targets() {
        target.sessions.extend(entry.get_session().iter().copied());
        if entry.has_channel_id() {
            target.channels.push(TargetChannel {
                channel_id: entry.get_channel_id(),
                group: if entry.get_group().is_empty() { None } else { Some(entry.get_group().to_string()) },
                links: entry.get_links(),
                children: entry.get_children(),
            });
        }
    }

    client.set_target(id, target.clone()).await;

    let _ = hub.call(RpcRequest::EdgeSyncVoiceTarget { session_id: client.session_id, target_id: id, target }).await;
    Ok(())
}

/// spec §4.4 "ContextAction built-ins: group-shout toggle, bulk channel
/// move (requires Move), promiscuous mode (superuser)". `action` carries
/// the built-in name; `"bulkmove:<channel_id>"` carries the destination
/// for a bulk move, the only one of the three that needs a Hub round trip
/// (reusing the already permission-checked `UserState` path rather than
/// inventing a new one, per `DESIGN.md`).
async fn handle_context_action(
    client: &Client,
    payload: &[u8],
    state: &EdgeState,
    hub: &HubClient,
    edge_id: &str,
    local_flags: &LocalContextFlags,
) -> Result<(), EdgeError> {
    let action: ContextAction = parse_message(payload)?;

    match action.get_action() {
        "groupshout_toggle" => {
            let current = local_flags.group_shout.load(Ordering::Relaxed);
            local_flags.group_shout.store(!current, Ordering::Relaxed);
        }
        "promiscuous_toggle" => {
            if state.session(client.session_id).map(|s| s.is_superuser()).unwrap_or(false) {
                let current = local_flags.promiscuous.load(Ordering::Relaxed);
                local_flags.promiscuous.store(!current, Ordering::Relaxed);
            }
        }
        other if other.starts_with("bulkmove:") => {
            let Some(destination) = other.trim_start_matches("bulkmove:").parse::<u32>().ok() else { return Ok(()) };
            let Some(sender) = state.session(client.session_id) else { return Ok(()) };

            for occupant in state.sessions_in_channel(sender.channel_id) {
                if occupant.session_id == client.session_id {
                    continue;
                }
                hub.notify(EdgeNotification::HandleUserState {
                    edge_id: edge_id.to_string(),
                    session_id: occupant.session_id,
                    requester_session_id: client.session_id,
                    patch: UserStatePatch { channel_id: Some(destination), ..Default::default() },
                });
            }
        }
        other => tracing::debug!(session_id = client.session_id, action = other, "unrecognized context action"),
    }

    Ok(())
}

async fn forward_user_state(client: &Client, payload: &[u8], hub: &HubClient, edge_id: &str) -> Result<(), EdgeError> {
    let wire: UserState = parse_message(payload)?;

    let patch = UserStatePatch {
        channel_id: wire.has_channel_id().then(|| wire.get_channel_id()),
        username: wire.has_name().then(|| wire.get_name().to_string()),
        mute: wire.has_mute().then(|| wire.get_mute()),
        deaf: wire.has_deaf().then(|| wire.get_deaf()),
        self_mute: wire.has_self_mute().then(|| wire.get_self_mute()),
        self_deaf: wire.has_self_deaf().then(|| wire.get_self_deaf()),
        suppress: wire.has_suppress().then(|| wire.get_suppress()),
        priority_speaker: wire.has_priority_speaker().then(|| wire.get_priority_speaker()),
        recording: wire.has_recording().then(|| wire.get_recording()),
        listening_channels_add: wire.get_listening_channel_add().iter().copied().collect(),
        listening_channels_remove: wire.get_listening_channel_remove().iter().copied().collect(),
    };

    let target_session = if wire.has_session() { wire.get_session() } else { client.session_id };

    hub.notify(EdgeNotification::HandleUserState { edge_id: edge_id.to_string(), session_id: target_session, requester_session_id: client.session_id, patch });
    Ok(())
}

/// spec §4.4 "UserRemove (kick/ban)": the Hub checks Kick/Ban at root and
/// adds a ban if requested, then broadcasts; this Edge only relays intent.
async fn forward_user_remove(client: &Client, payload: &[u8], hub: &HubClient, edge_id: &str) -> Result<(), EdgeError> {
    let wire: UserRemove = parse_message(payload)?;

    hub.notify(EdgeNotification::HandleUserRemove {
        edge_id: edge_id.to_string(),
        session_id: wire.get_session(),
        requester_session_id: client.session_id,
        reason: wire.get_reason().to_string(),
        ban: wire.get_ban(),
    });
    Ok(())
}

async fn forward_channel_state(client: &Client, payload: &[u8], hub: &HubClient, edge_id: &str) -> Result<(), EdgeError> {
    let wire: ChannelState = parse_message(payload)?;

    let channel = Channel {
        id: if wire.has_channel_id() { wire.get_channel_id() } else { 0 },
        parent_id: wire.has_parent().then(|| wire.get_parent()),
        name: wire.get_name().to_string(),
        position: wire.get_position(),
        max_users: wire.get_max_users(),
        inherit_acl: true,
        description: wire.get_description().to_string(),
        temporary: wire.get_temporary(),
        links: wire.get_links().iter().copied().collect(),
    };

    hub.notify(EdgeNotification::HandleChannelState { edge_id: edge_id.to_string(), channel, requester_session_id: client.session_id });
    Ok(())
}

async fn forward_channel_remove(client: &Client, payload: &[u8], hub: &HubClient, edge_id: &str) -> Result<(), EdgeError> {
    let wire: ChannelRemove = parse_message(payload)?;
    hub.notify(EdgeNotification::HandleChannelRemove { edge_id: edge_id.to_string(), channel_id: wire.get_channel_id(), requester_session_id: client.session_id });
    Ok(())
}

async fn forward_text_message(client: &Client, payload: &[u8], hub: &HubClient, edge_id: &str) -> Result<(), EdgeError> {
    let wire: TextMessage = parse_message(payload)?;

    hub.notify(EdgeNotification::HandleTextMessage {
        edge_id: edge_id.to_string(),
        sender_session_id: client.session_id,
        target_sessions: wire.get_session().to_vec(),
        target_channels: wire.get_channel_id().to_vec(),
        target_trees: wire.get_tree_id().to_vec(),
        text: wire.get_message().to_string(),
    });
    Ok(())
}

async fn forward_plugin_data(client: &Client, payload: &[u8], hub: &HubClient, edge_id: &str) -> Result<(), EdgeError> {
    let wire: PluginDataTransmission = parse_message(payload)?;

    hub.notify(EdgeNotification::HandlePluginDataTransmission {
        edge_id: edge_id.to_string(),
        sender_session_id: client.session_id,
        receiver_session_ids: wire.get_receiver_sessions().to_vec(),
        data: wire.get_data().to_vec(),
        data_id: wire.get_data_id().to_string(),
    });
    Ok(())
}

/// spec §4.4 "ACL (query/update): edge.handleACL (request) + Write check
/// + compute inherited chain + persist + aclUpdated notification". Both
/// the read-only query and the persisting update go through the same
/// typed round trip; the Hub tells them apart by whether `entries`/`groups`
/// carried anything to persist.
async fn handle_acl(client: &Client, payload: &[u8], hub: &HubClient) -> Result<(), EdgeError> {
    let wire: AclMessage = parse_message(payload)?;
    let channel_id = wire.get_channel_id();

    if wire.get_query() {
        let response = hub.call(RpcRequest::EdgeHandleAcl { channel_id, requester_session_id: client.session_id }).await?;
        if let RpcResponse::EdgeHandleAcl { entries, groups } = response {
            client.send_message(MessageKind::ACL, &build_acl_reply(channel_id, &entries, &groups)).await?;
        }
        return Ok(());
    }

    let entries: Vec<AclEntry> = wire
        .get_acls()
        .iter()
        .filter(|a| !a.get_inherited())
        .map(|a| AclEntry {
            channel_id,
            principal: if a.get_user_id() > 0 { Principal::UserId(a.get_user_id()) } else { Principal::Group(a.get_group().to_string()) },
            apply_here: a.get_apply_here(),
            apply_subs: a.get_apply_subs(),
            allow: a.get_grant(),
            deny: a.get_deny(),
        })
        .collect();

    let groups: Vec<ChannelGroup> = wire
        .get_groups()
        .iter()
        .filter(|g| !g.get_inherited())
        .map(|g| ChannelGroup {
            channel_id,
            name: g.get_name().to_string(),
            inherit: g.get_inherit(),
            inheritable: g.get_inheritable(),
            add: g.get_add().iter().copied().collect(),
            remove: g.get_remove().iter().copied().collect(),
        })
        .collect();

    match hub.call(RpcRequest::EdgeSaveAcl { channel_id, entries, groups, requester_session_id: client.session_id }).await {
        Ok(_) => Ok(()),
        Err(e) => {
            let mut denied = PermissionDenied::new();
            denied.set_channel_id(channel_id);
            denied.set_reason(e.to_string());
            client.send_message(MessageKind::PermissionDenied, &denied).await
        }
    }
}

fn build_acl_reply(channel_id: u32, entries: &[InheritedAclEntry], groups: &[ChannelGroup]) -> AclMessage {
    let mut reply = AclMessage::new();
    reply.set_channel_id(channel_id);
    reply.set_query(true);

    let acls = entries
        .iter()
        .map(|e| {
            let mut acl = mumble_proto::mumble::ACL_ChanACL::new();
            acl.set_apply_here(e.entry.apply_here);
            acl.set_apply_subs(e.entry.apply_subs);
            acl.set_inherited(e.inherited);
            match &e.entry.principal {
                Principal::UserId(id) => acl.set_user_id(*id),
                Principal::Group(name) => acl.set_group(name.clone()),
            }
            acl.set_grant(e.entry.allow);
            acl.set_deny(e.entry.deny);
            acl
        })
        .collect();
    reply.set_acls(acls);

    let groups = groups
        .iter()
        .map(|g| {
            let mut group = mumble_proto::mumble::ACL_ChanGroup::new();
            group.set_name(g.name.clone());
            group.set_inherited(g.channel_id != channel_id);
            group.set_inherit(g.inherit);
            group.set_inheritable(g.inheritable);
            group.set_add(g.add.iter().copied().collect());
            group.set_remove(g.remove.iter().copied().collect());
            group
        })
        .collect();
    reply.set_groups(groups);

    reply
}

/// spec §9 Open Question: "UserStats cross-Edge aggregation... let Hub
/// assemble authoritative stats". A query about the caller's own session
/// is answered immediately from local crypt stats; a query about another
/// session is forwarded to the Hub so cross-Edge sessions can be covered,
/// falling back to whatever this Edge's own mirror/ban cache already know
/// when the requested session isn't locally attached.
async fn handle_user_stats(client: &Client, payload: &[u8], clients: &ClientManager, state: &EdgeState) -> Result<(), EdgeError> {
    let wire: mumble_proto::mumble::UserStats = parse_message(payload)?;
    let target_session_id = if wire.has_session() { wire.get_session() } else { client.session_id };

    let mut reply = mumble_proto::mumble::UserStats::new();
    reply.set_session(target_session_id);

    if let Some(target_client) = clients.get(target_session_id) {
        let crypt = target_client.crypt_state.read().await;
        let mut from_client = mumble_proto::mumble::UserStats_Stats::new();
        from_client.set_good(crypt.remote_stats.good);
        from_client.set_late(crypt.remote_stats.late);
        from_client.set_lost(crypt.remote_stats.lost);
        from_client.set_resync(crypt.remote_stats.resync);
        reply.set_from_client(from_client);

        let mut from_server = mumble_proto::mumble::UserStats_Stats::new();
        from_server.set_good(crypt.stats.good);
        from_server.set_late(crypt.stats.late);
        from_server.set_lost(crypt.stats.lost);
        from_server.set_resync(crypt.stats.resync);
        reply.set_from_server(from_server);
    } else if let Some(session) = state.session(target_session_id) {
        reply.set_address(session.ip_address.to_string());
    }

    client.send_message(MessageKind::UserStats, &reply).await
}

/// spec §4.4/§6 `RequestBlob`: session texture/comment and channel
/// description hashes are resolved through the Hub's blob façade, since
/// only the Hub holds the content-addressed store.
async fn handle_request_blob(client: &Client, payload: &[u8], state: &EdgeState, hub: &HubClient) -> Result<(), EdgeError> {
    let wire: mumble_proto::mumble::RequestBlob = parse_message(payload)?;

    for session_id in wire.get_session_texture() {
        let Some(session) = state.session(*session_id) else { continue };
        if let Ok(RpcResponse::BlobGetUserTexture { hash: Some(hash) }) = hub.call(RpcRequest::BlobGetUserTexture { user_id: session.user_id }).await {
            if let Ok(RpcResponse::BlobGet { data: Some(data) }) = hub.call(RpcRequest::BlobGet { hash }).await {
                let mut state_msg = UserState::new();
                state_msg.set_session(*session_id);
                state_msg.set_texture(data);
                client.send_message(MessageKind::UserState, &state_msg).await?;
            }
        }
    }

    for session_id in wire.get_session_comment() {
        let Some(session) = state.session(*session_id) else { continue };
        if let Ok(RpcResponse::BlobGetUserComment { hash: Some(hash) }) = hub.call(RpcRequest::BlobGetUserComment { user_id: session.user_id }).await {
            if let Ok(RpcResponse::BlobGet { data: Some(data) }) = hub.call(RpcRequest::BlobGet { hash }).await {
                let mut state_msg = UserState::new();
                state_msg.set_session(*session_id);
                state_msg.set_comment(String::from_utf8_lossy(&data).to_string());
                client.send_message(MessageKind::UserState, &state_msg).await?;
            }
        }
    }

    for channel_id in wire.get_channel_description() {
        if let Some(channel) = state.channel(*channel_id).await {
            let mut channel_msg = ChannelState::new();
            channel_msg.set_channel_id(*channel_id);
            channel_msg.set_description(channel.description);
            client.send_message(MessageKind::ChannelState, &channel_msg).await?;
        }
    }

    Ok(())
}

/// Relays Hub-originated cluster events to every locally-attached client
/// and keeps the cross-Edge voice peer registry current (spec §4.6 "Hub
/// side" notifications, §4.9 "Registry from Hub"). [`crate::hub_client`]
/// has already applied the session/channel-tree side effects to
/// [`EdgeState`] by the time a notification reaches this loop; this one
/// owns only what's left — wire delivery and the peer registry.
pub async fn run_hub_notifications(mut notifications: mpsc::UnboundedReceiver<HubNotification>, clients: Arc<ClientManager>, peers: Arc<PeerRegistry>, local_edge_id: String) {
    while let Some(notification) = notifications.recv().await {
        if let Err(e) = relay_one(&notification, &clients, &peers, &local_edge_id).await {
            tracing::debug!("failed to relay hub notification: {e}");
        }
    }
}

async fn relay_one(notification: &HubNotification, clients: &ClientManager, peers: &PeerRegistry, local_edge_id: &str) -> Result<(), EdgeError> {
    match notification {
        HubNotification::UserJoined { session, .. } => broadcast_to_all(clients, MessageKind::UserState, &user_state_from(session)).await,
        HubNotification::UserStateBroadcast { session, .. } => broadcast_to_all(clients, MessageKind::UserState, &user_state_from(session)).await,
        HubNotification::UserStateChanged { session_id, patch, .. } => broadcast_to_all(clients, MessageKind::UserState, &user_state_patch_wire(*session_id, patch)).await,
        HubNotification::UserLeft { session_id, .. } => {
            let mut remove = UserRemove::new();
            remove.set_session(*session_id);
            broadcast_to_all(clients, MessageKind::UserRemove, &remove).await
        }
        HubNotification::UserRemoveBroadcast { session_id, actor_session_id, reason, banned, .. } => {
            let mut remove = UserRemove::new();
            remove.set_session(*session_id);
            remove.set_actor(*actor_session_id);
            remove.set_reason(reason.clone());
            remove.set_ban(*banned);
            broadcast_to_all(clients, MessageKind::UserRemove, &remove).await?;

            if let Some(target) = clients.get(*session_id) {
                target.kick(reason.clone()).await;
            }
            Ok(())
        }
        HubNotification::ChannelStateBroadcast { channel, .. } => {
            let mut wire = ChannelState::new();
            wire.set_channel_id(channel.id);
            wire.set_parent(channel.parent_id.unwrap_or(0));
            wire.set_name(channel.name.clone());
            wire.set_description(channel.description.clone());
            wire.set_position(channel.position);
            wire.set_max_users(channel.max_users);
            wire.set_temporary(channel.temporary);
            wire.set_links(channel.links.iter().copied().collect());
            broadcast_to_all(clients, MessageKind::ChannelState, &wire).await
        }
        HubNotification::ChannelRemoveBroadcast { effect, .. } => {
            for channel_id in &effect.channels_removed {
                let mut wire = ChannelRemove::new();
                wire.set_channel_id(*channel_id);
                broadcast_to_all(clients, MessageKind::ChannelRemove, &wire).await?;
            }
            for session_id in &effect.affected_sessions {
                let mut wire = UserState::new();
                wire.set_session(*session_id);
                wire.set_channel_id(effect.parent_id);
                broadcast_to_all(clients, MessageKind::UserState, &wire).await?;
            }
            Ok(())
        }
        HubNotification::TextMessageBroadcast { sender_session_id, receiver_session_ids, text, .. } => {
            let mut wire = TextMessage::new();
            wire.set_actor(*sender_session_id);
            wire.set_message(text.clone());
            deliver_to_receivers(clients, MessageKind::TextMessage, &wire, receiver_session_ids).await
        }
        HubNotification::PluginDataBroadcast { sender_session_id, receiver_session_ids, data, data_id, .. } => {
            let mut wire = PluginDataTransmission::new();
            wire.set_sender_session(*sender_session_id);
            wire.set_receiver_sessions(receiver_session_ids.clone());
            wire.set_data(data.clone());
            wire.set_data_id(data_id.clone());
            deliver_to_receivers(clients, MessageKind::PluginDataTransmission, &wire, receiver_session_ids).await
        }
        HubNotification::AclUpdated { channel_id, .. } => {
            tracing::debug!(channel_id, "acl updated upstream; edge mirror holds no permission cache to invalidate");
            Ok(())
        }
        HubNotification::PermissionDenied { session_id, reason, .. } => {
            if let Some(target) = clients.get(*session_id) {
                let mut denied = PermissionDenied::new();
                denied.set_reason(reason.clone());
                target.send_message(MessageKind::PermissionDenied, &denied).await?;
            }
            Ok(())
        }
        HubNotification::PeerJoined { edge_id, host, voice_port, .. } => {
            if edge_id != local_edge_id {
                match format!("{host}:{voice_port}").parse() {
                    Ok(addr) => peers.upsert(edge_id.clone(), addr),
                    Err(e) => tracing::warn!("bad peer address for {edge_id}: {e}"),
                }
            }
            Ok(())
        }
        HubNotification::PeerLeft { edge_id, .. } => {
            peers.remove(edge_id);
            Ok(())
        }
        HubNotification::ForceDisconnect { session_id, reason, .. } => {
            if let Some(target) = clients.get(*session_id) {
                target.kick(reason.clone()).await;
            }
            Ok(())
        }
        HubNotification::UserStateResponse { .. } | HubNotification::ChannelStateResponse { .. } | HubNotification::UserRemoveResponse { .. } | HubNotification::ChannelRemoveResponse { .. } => {
            Ok(())
        }
    }
}

async fn broadcast_to_all<T: ProtobufMessage>(clients: &ClientManager, kind: MessageKind, message: &T) -> Result<(), EdgeError> {
    for client in clients.iter() {
        if let Err(e) = client.send_message(kind, message).await {
            tracing::debug!(session_id = client.session_id, "failed to deliver broadcast: {e}");
        }
    }
    Ok(())
}

async fn deliver_to_receivers<T: ProtobufMessage>(clients: &ClientManager, kind: MessageKind, message: &T, receivers: &[u32]) -> Result<(), EdgeError> {
    for session_id in receivers {
        if let Some(client) = clients.get(*session_id) {
            if let Err(e) = client.send_message(kind, message).await {
                tracing::debug!(session_id, "failed to deliver targeted message: {e}");
            }
        }
    }
    Ok(())
}

fn user_state_from(session: &mumble_core::session::Session) -> UserState {
    let mut state = UserState::new();
    state.set_session(session.session_id);
    state.set_name(session.username.clone());
    state.set_user_id(session.user_id);
    state.set_channel_id(session.channel_id);
    state.set_mute(session.flags.mute);
    state.set_deaf(session.flags.deaf);
    state.set_self_mute(session.flags.self_mute);
    state.set_self_deaf(session.flags.self_deaf);
    state.set_suppress(session.flags.suppress);
    state.set_priority_speaker(session.flags.priority_speaker);
    state.set_recording(session.flags.recording);
    state
}

fn user_state_patch_wire(session_id: u32, patch: &UserStatePatch) -> UserState {
    let mut state = UserState::new();
    state.set_session(session_id);
    if let Some(channel_id) = patch.channel_id {
        state.set_channel_id(channel_id);
    }
    if let Some(username) = &patch.username {
        state.set_name(username.clone());
    }
    if let Some(mute) = patch.mute {
        state.set_mute(mute);
    }
    if let Some(deaf) = patch.deaf {
        state.set_deaf(deaf);
    }
    if let Some(self_mute) = patch.self_mute {
        state.set_self_mute(self_mute);
    }
    if let Some(self_deaf) = patch.self_deaf {
        state.set_self_deaf(self_deaf);
    }
    if let Some(suppress) = patch.suppress {
        state.set_suppress(suppress);
    }
    if let Some(priority_speaker) = patch.priority_speaker {
        state.set_priority_speaker(priority_speaker);
    }
    if let Some(recording) = patch.recording {
        state.set_recording(recording);
    }
    state.set_listening_channel_add(patch.listening_channels_add.iter().copied().collect());
    state.set_listening_channel_remove(patch.listening_channels_remove.iter().copied().collect());
    state
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_changing_kinds_match_forwarding_table() {
        assert!(is_state_changing(MessageKind::UserState));
        assert!(is_state_changing(MessageKind::ACL));
        assert!(!is_state_changing(MessageKind::Ping));
        assert!(!is_state_changing(MessageKind::VoiceTarget));
    }

    #[test]
    fn user_state_patch_wire_carries_only_present_fields() {
        let patch = UserStatePatch { mute: Some(true), ..Default::default() };
        let wire = user_state_patch_wire(7, &patch);
        assert_eq!(wire.get_session(), 7);
        assert!(wire.get_mute());
        assert!(!wire.has_deaf());
    }
}
