//! Typed Edge↔Hub method registry (spec §4.6, §6): one request/response
//! pair or notification variant per RPC method name. Keeping these as
//! enums rather than a stringly-typed method name plus opaque bytes is
//! what lets [`crate::envelope::Envelope`] round-trip through `postcard`
//! without a second parse step downstream.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use mumble_core::acl::AclEntry;
use mumble_core::ban::Ban;
use mumble_core::channel::Channel;
use mumble_core::group::ChannelGroup;
use mumble_core::session::Session;
use mumble_core::target::VoiceTarget;

pub type EdgeId = String;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeInfo {
    pub edge_id: EdgeId,
    pub name: String,
    pub host: String,
    pub port: u16,
    /// Listen port of this Edge's cross-Edge voice UDP plane (spec §4.9),
    /// carried alongside the control-channel `host`/`port` so the Hub can
    /// relay it to peers via `PeerJoined`.
    pub voice_port: u16,
    pub region: String,
    pub capacity: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeStats {
    pub session_count: u32,
    pub cpu_load: f32,
    pub udp_bytes_in: u64,
    pub udp_bytes_out: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeStatus {
    pub info: EdgeInfo,
    pub online: bool,
    pub last_seen: u64,
    pub stats: EdgeStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InheritedAclEntry {
    pub entry: AclEntry,
    pub inherited: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelRemoveEffect {
    pub channel_id: u32,
    pub channels_removed: Vec<u32>,
    pub affected_sessions: Vec<u32>,
    pub parent_id: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AdminOp {
    KickSession { session_id: u32, reason: String },
    BanSession { session_id: u32, reason: String, duration: u64 },
    MoveSession { session_id: u32, channel_id: u32 },
    SetSuperuserPassword { password_hash: String },
}

/// Every `edge.*` / `cluster.*` / `blob.*` request the Edge may send, paired
/// one-to-one with an [`RpcResponse`] variant of the same name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RpcRequest {
    EdgeRegister(EdgeInfo),
    EdgeHeartbeat { edge_id: EdgeId, stats: EdgeStats },
    /// Resolves a client's handshake credentials to a registered identity
    /// (spec §4.3 "Call the external authentication collaborator"); the
    /// Hub owns the collaborator so identity/groups stay authoritative
    /// cluster-wide instead of each Edge calling out independently.
    EdgeAuthenticate { username: String, password: Option<String>, cert_hash: Option<String> },
    EdgeAllocateSessionId { edge_id: EdgeId },
    EdgeReportSession { session: Session },
    EdgeFullSync { edge_id: EdgeId },
    EdgeGetChannels,
    EdgeGetAcls { channel_id: u32 },
    EdgeSaveChannel { channel: Channel, requester_session_id: u32 },
    EdgeSaveAcl { channel_id: u32, entries: Vec<AclEntry>, groups: Vec<ChannelGroup>, requester_session_id: u32 },
    EdgeHandleAcl { channel_id: u32, requester_session_id: u32 },
    EdgeSyncVoiceTarget { session_id: u32, target_id: u8, target: VoiceTarget },
    EdgeRouteVoice { sender_session_id: u32, target_channel_id: u32 },
    EdgeAdminOperation { edge_id: EdgeId, op: AdminOp },
    EdgeJoin { edge_id: EdgeId, session: Session },
    EdgeJoinComplete { edge_id: EdgeId, session_id: u32 },
    EdgeReportPeerDisconnect { edge_id: EdgeId, session_id: u32 },
    ClusterGetStatus,
    BlobPut { data: Vec<u8> },
    BlobGet { hash: String },
    BlobGetUserTexture { user_id: u32 },
    BlobGetUserComment { user_id: u32 },
    BlobSetUserTexture { user_id: u32, hash: String },
    BlobSetUserComment { user_id: u32, hash: String },
}

/// The result carried back for each [`RpcRequest`] variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RpcResponse {
    EdgeRegister { accepted: bool },
    EdgeHeartbeat,
    EdgeAuthenticate { accepted: bool, user_id: u32, username: String, groups: Vec<String>, deny_reason: Option<String> },
    EdgeAllocateSessionId { session_id: u32 },
    EdgeReportSession,
    EdgeFullSync {
        channels: Vec<Channel>,
        acls: Vec<AclEntry>,
        groups: Vec<ChannelGroup>,
        bans: Vec<Ban>,
        sessions: Vec<Session>,
        sequence: u64,
    },
    EdgeGetChannels { channels: Vec<Channel> },
    EdgeGetAcls { entries: Vec<InheritedAclEntry>, groups: Vec<ChannelGroup> },
    EdgeSaveChannel { channel_id: u32 },
    EdgeSaveAcl,
    EdgeHandleAcl { entries: Vec<InheritedAclEntry>, groups: Vec<ChannelGroup> },
    EdgeSyncVoiceTarget,
    EdgeRouteVoice { listener_session_ids: Vec<u32> },
    EdgeAdminOperation { applied: bool },
    EdgeJoin { session_id: u32, accepted: bool, deny_reason: Option<String> },
    EdgeJoinComplete,
    EdgeReportPeerDisconnect,
    ClusterGetStatus { edges: Vec<EdgeStatus> },
    BlobPut { hash: String },
    BlobGet { data: Option<Vec<u8>> },
    BlobGetUserTexture { hash: Option<String> },
    BlobGetUserComment { hash: Option<String> },
    BlobSetUserTexture,
    BlobSetUserComment,
}

/// Notifications the Edge sends the Hub without expecting a typed reply
/// (spec §4.6: "Notifications (Edge→Hub)").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EdgeNotification {
    HandleUserState { edge_id: EdgeId, session_id: u32, requester_session_id: u32, patch: UserStatePatch },
    HandleChannelState { edge_id: EdgeId, channel: Channel, requester_session_id: u32 },
    HandleUserRemove { edge_id: EdgeId, session_id: u32, requester_session_id: u32, reason: String, ban: bool },
    HandleChannelRemove { edge_id: EdgeId, channel_id: u32, requester_session_id: u32 },
    HandleTextMessage { edge_id: EdgeId, sender_session_id: u32, target_sessions: Vec<u32>, target_channels: Vec<u32>, target_trees: Vec<u32>, text: String },
    HandlePluginDataTransmission { edge_id: EdgeId, sender_session_id: u32, receiver_session_ids: Vec<u32>, data: Vec<u8>, data_id: String },
    UserLeft { edge_id: EdgeId, session_id: u32 },
}

/// A partial update to a `Session`'s mutable fields, as carried by
/// `UserState` and forwarded verbatim to `hub.handleUserState`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserStatePatch {
    pub channel_id: Option<u32>,
    pub username: Option<String>,
    pub mute: Option<bool>,
    pub deaf: Option<bool>,
    pub self_mute: Option<bool>,
    pub self_deaf: Option<bool>,
    pub suppress: Option<bool>,
    pub priority_speaker: Option<bool>,
    pub recording: Option<bool>,
    pub listening_channels_add: HashSet<u32>,
    pub listening_channels_remove: HashSet<u32>,
}

/// Notifications the Hub sends an Edge without expecting a reply (spec
/// §4.6: "Notifications (Hub→Edge)"), each carrying a monotonic
/// `sequence` used for per-Edge ordering and replay (spec §4.6 "Ordering").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum HubNotification {
    UserStateBroadcast { sequence: u64, session: Session, patch: UserStatePatch },
    UserStateResponse { sequence: u64, session_id: u32, accepted: bool, deny_reason: Option<String> },
    ChannelStateBroadcast { sequence: u64, channel: Channel },
    ChannelStateResponse { sequence: u64, channel_id: u32, accepted: bool, deny_reason: Option<String> },
    UserRemoveBroadcast { sequence: u64, session_id: u32, actor_session_id: u32, reason: String, banned: bool },
    UserRemoveResponse { sequence: u64, session_id: u32, accepted: bool, deny_reason: Option<String> },
    ChannelRemoveBroadcast { sequence: u64, effect: ChannelRemoveEffect },
    ChannelRemoveResponse { sequence: u64, channel_id: u32, accepted: bool, deny_reason: Option<String> },
    TextMessageBroadcast { sequence: u64, sender_session_id: u32, receiver_session_ids: Vec<u32>, text: String },
    PluginDataBroadcast { sequence: u64, sender_session_id: u32, receiver_session_ids: Vec<u32>, data: Vec<u8>, data_id: String },
    UserJoined { sequence: u64, session: Session },
    UserLeft { sequence: u64, session_id: u32 },
    UserStateChanged { sequence: u64, session_id: u32, patch: UserStatePatch },
    AclUpdated { sequence: u64, channel_id: u32, timestamp: u64 },
    PermissionDenied { sequence: u64, session_id: u32, reason: String },
    PeerJoined { sequence: u64, edge_id: EdgeId, host: String, voice_port: u16 },
    PeerLeft { sequence: u64, edge_id: EdgeId },
    ForceDisconnect { sequence: u64, session_id: u32, reason: String },
}

impl HubNotification {
    pub fn sequence(&self) -> u64 {
        match self {
            HubNotification::UserStateBroadcast { sequence, .. }
            | HubNotification::UserStateResponse { sequence, .. }
            | HubNotification::ChannelStateBroadcast { sequence, .. }
            | HubNotification::ChannelStateResponse { sequence, .. }
            | HubNotification::UserRemoveBroadcast { sequence, .. }
            | HubNotification::UserRemoveResponse { sequence, .. }
            | HubNotification::ChannelRemoveBroadcast { sequence, .. }
            | HubNotification::ChannelRemoveResponse { sequence, .. }
            | HubNotification::TextMessageBroadcast { sequence, .. }
            | HubNotification::PluginDataBroadcast { sequence, .. }
            | HubNotification::UserJoined { sequence, .. }
            | HubNotification::UserLeft { sequence, .. }
            | HubNotification::UserStateChanged { sequence, .. }
            | HubNotification::AclUpdated { sequence, .. }
            | HubNotification::PermissionDenied { sequence, .. }
            | HubNotification::PeerJoined { sequence, .. }
            | HubNotification::PeerLeft { sequence, .. }
            | HubNotification::ForceDisconnect { sequence, .. } => *sequence,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
pub enum RpcError {
    #[error("unknown edge {0}")]
    UnknownEdge(EdgeId),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("not found")]
    NotFound,
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("call timed out")]
    Timeout,
    #[error("hub unavailable")]
    HubUnavailable,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_sequence_extracted_uniformly() {
        let n = HubNotification::AclUpdated { sequence: 42, channel_id: 3, timestamp: 1000 };
        assert_eq!(n.sequence(), 42);
    }
}
