//! The Hub control service: the RPC terminus all `edge.*`/`cluster.*`/
//! `blob.*` requests and `hub.handle*` notifications are dispatched
//! through (spec §4.6, §4.7, §4.8). Computes permission grants, mutates
//! the authoritative stores, and hands the caller the broadcast targets
//! it must fan out.

use std::sync::Arc;
use std::time::Duration;

use mumble_core::acl::AclEntry;
use mumble_core::channel::ROOT_CHANNEL_ID;
use mumble_core::evaluator;
use mumble_core::group::ChannelGroup;
use mumble_core::permission::{self, PermissionMask};
use mumble_core::session::Session;
use mumble_rpc::methods::{
    AdminOp, ChannelRemoveEffect, EdgeId, EdgeInfo, EdgeNotification, EdgeStats, HubNotification, RpcError, RpcRequest, RpcResponse, UserStatePatch,
};
use tokio::sync::mpsc;

use crate::acl_store::AclStore;
use crate::auth::{AuthError, Authenticator, GuestOnlyAuthenticator, HttpAuthenticator};
use crate::ban_store::BanStore;
use crate::blob::BlobStore;
use crate::channel_store::{ChannelEdit, ChannelStore};
use crate::config::HubConfig;
use crate::db::Database;
use crate::edge_registry::EdgeRegistry;
use crate::error::HubError;
use crate::group_store::GroupStore;
use crate::metrics;
use crate::permission_cache::PermissionCache;
use crate::session_manager::SessionManager;

pub struct HubState {
    pub config: HubConfig,
    pub sessions: SessionManager,
    pub channels: ChannelStore,
    pub acls: AclStore,
    pub groups: GroupStore,
    pub bans: BanStore,
    pub permissions: PermissionCache,
    pub edges: EdgeRegistry,
    pub blobs: BlobStore,
    pub db: Database,
    pub authenticator: Arc<dyn Authenticator>,
}

impl HubState {
    pub fn new(config: HubConfig) -> Self {
        let blobs = BlobStore::new(config.blob_store.enabled, config.blob_store.path.clone());
        let db = Database::new(config.database.path.clone());
        let bans = BanStore::new(config.timeout_secs.max(3600));
        let channels = ChannelStore::new(config.channel_count_limit, config.channel_nesting_limit);
        let edges = EdgeRegistry::new(1024, 3600, config.registry.timeout_secs);
        let authenticator: Arc<dyn Authenticator> = match &config.auth.base_url {
            Some(base_url) => Arc::new(HttpAuthenticator::new(base_url.clone(), Duration::from_secs(config.auth.timeout_secs), config.auth.cache_ttl_secs)),
            None => Arc::new(GuestOnlyAuthenticator),
        };

        Self {
            config,
            sessions: SessionManager::new(),
            channels,
            acls: AclStore::new(),
            groups: GroupStore::new(),
            bans,
            permissions: PermissionCache::new(),
            edges,
            blobs,
            db,
            authenticator,
        }
    }

    /// Permission check with cache (spec §4.7): a miss evaluates the full
    /// channel chain and populates the cache; a hit is O(1).
    pub async fn granted(&self, session: &Session, target_channel: u32) -> Result<PermissionMask, HubError> {
        if let Some(cached) = self.permissions.get(session.session_id, target_channel) {
            return Ok(cached);
        }

        let tree = self.channels.snapshot().await;
        let acls = self.acls.snapshot().await;
        let groups = self.groups.snapshot().await;

        let granted = evaluator::evaluate(&tree, &acls, &groups, session, target_channel)?;
        self.permissions.insert(session.session_id, target_channel, granted);
        Ok(granted)
    }

    pub async fn has_permission(&self, session: &Session, target_channel: u32, perm: PermissionMask) -> Result<bool, HubError> {
        Ok(permission::has_permission(self.granted(session, target_channel).await?, perm))
    }

    async fn require_permission(&self, session: &Session, target_channel: u32, perm: PermissionMask, reason: &str) -> Result<(), RpcError> {
        let ok = self.has_permission(session, target_channel, perm).await.map_err(|e| RpcError::Validation(e.to_string()))?;
        if ok {
            Ok(())
        } else {
            metrics::PERMISSION_DENIALS_TOTAL.with_label_values(&[reason]).inc();
            Err(RpcError::PermissionDenied(reason.to_string()))
        }
    }

    /// Dispatches one `RpcRequest` from `edge_id`, returning the typed
    /// result or a typed [`RpcError`].
    pub async fn handle_request(&self, edge_id: &EdgeId, request: RpcRequest) -> Result<RpcResponse, RpcError> {
        metrics::RPC_REQUESTS_TOTAL.with_label_values(&[request_label(&request)]).inc();

        match request {
            RpcRequest::EdgeRegister(_) => Ok(RpcResponse::EdgeRegister { accepted: true }),
            RpcRequest::EdgeHeartbeat { edge_id, stats } => self.edge_heartbeat(edge_id, stats).await,
            RpcRequest::EdgeAuthenticate { username, password, cert_hash } => self.authenticate(username, password, cert_hash).await,
            RpcRequest::EdgeAllocateSessionId { .. } => Ok(RpcResponse::EdgeAllocateSessionId { session_id: self.sessions.allocate_session_id() }),
            RpcRequest::EdgeReportSession { session } => {
                self.sessions.insert(session);
                Ok(RpcResponse::EdgeReportSession)
            }
            RpcRequest::EdgeFullSync { .. } => self.full_sync().await,
            RpcRequest::EdgeGetChannels => Ok(RpcResponse::EdgeGetChannels { channels: self.channels.snapshot().await.iter().cloned().collect() }),
            RpcRequest::EdgeGetAcls { channel_id } => self.get_acls(channel_id).await,
            RpcRequest::EdgeSaveChannel { channel, requester_session_id } => self.save_channel(channel, requester_session_id).await,
            RpcRequest::EdgeSaveAcl { channel_id, entries, groups, requester_session_id } => self.save_acl(channel_id, entries, groups, requester_session_id).await,
            RpcRequest::EdgeHandleAcl { channel_id, requester_session_id } => self.handle_acl_query(channel_id, requester_session_id).await,
            RpcRequest::EdgeSyncVoiceTarget { .. } => Ok(RpcResponse::EdgeSyncVoiceTarget),
            RpcRequest::EdgeRouteVoice { sender_session_id, target_channel_id } => self.route_voice(sender_session_id, target_channel_id).await,
            RpcRequest::EdgeAdminOperation { op, .. } => self.admin_operation(op).await,
            RpcRequest::EdgeJoin { edge_id, session } => self.join(edge_id, session).await,
            RpcRequest::EdgeJoinComplete { .. } => Ok(RpcResponse::EdgeJoinComplete),
            RpcRequest::EdgeReportPeerDisconnect { session_id, .. } => {
                self.sessions.remove(session_id);
                Ok(RpcResponse::EdgeReportPeerDisconnect)
            }
            RpcRequest::ClusterGetStatus => Ok(RpcResponse::ClusterGetStatus { edges: self.edges.status().await }),
            RpcRequest::BlobPut { data } => self.blobs.put(data).await.map(|hash| RpcResponse::BlobPut { hash }).map_err(|e| RpcError::Validation(e.to_string())),
            RpcRequest::BlobGet { hash } => Ok(RpcResponse::BlobGet { data: self.blobs.get(&hash).await.ok() }),
            RpcRequest::BlobGetUserTexture { user_id } => Ok(RpcResponse::BlobGetUserTexture { hash: self.blobs.user_texture_hash(user_id) }),
            RpcRequest::BlobGetUserComment { user_id } => Ok(RpcResponse::BlobGetUserComment { hash: self.blobs.user_comment_hash(user_id) }),
            RpcRequest::BlobSetUserTexture { user_id, hash } => {
                self.blobs.set_user_texture(user_id, hash);
                Ok(RpcResponse::BlobSetUserTexture)
            }
            RpcRequest::BlobSetUserComment { user_id, hash } => {
                self.blobs.set_user_comment(user_id, hash);
                Ok(RpcResponse::BlobSetUserComment)
            }
        }
    }

    async fn edge_heartbeat(&self, edge_id: EdgeId, stats: EdgeStats) -> Result<RpcResponse, RpcError> {
        if self.edges.heartbeat(&edge_id, stats).await {
            Ok(RpcResponse::EdgeHeartbeat)
        } else {
            Err(RpcError::UnknownEdge(edge_id))
        }
    }

    /// Handles `edge.authenticate` (spec §4.3 "Call the external
    /// authentication collaborator"): a rejected credential is a normal
    /// negative result, not a transport error, so only a genuine
    /// collaborator failure (both upstream and cache) becomes an
    /// `RpcError`.
    async fn authenticate(&self, username: String, password: Option<String>, cert_hash: Option<String>) -> Result<RpcResponse, RpcError> {
        match self.authenticator.authenticate(&username, password.as_deref(), cert_hash.as_deref()).await {
            Ok(result) => Ok(RpcResponse::EdgeAuthenticate { accepted: true, user_id: result.user_id, username: result.username, groups: result.groups, deny_reason: None }),
            Err(AuthError::Rejected) => Ok(RpcResponse::EdgeAuthenticate { accepted: false, user_id: 0, username, groups: vec![], deny_reason: Some("rejected".to_string()) }),
            Err(e) => Err(RpcError::Validation(e.to_string())),
        }
    }

    async fn full_sync(&self) -> Result<RpcResponse, RpcError> {
        Ok(RpcResponse::EdgeFullSync {
            channels: self.channels.snapshot().await.iter().cloned().collect(),
            acls: self.acls.all().await,
            groups: self.groups.all().await,
            bans: self.bans.snapshot().await,
            sessions: self.sessions.all(),
            sequence: self.edges.next_sequence(),
        })
    }

    async fn get_acls(&self, channel_id: u32) -> Result<RpcResponse, RpcError> {
        let chain = self.channels.chain_to_root(channel_id).await.map_err(|e| RpcError::Validation(e.to_string()))?;
        Ok(RpcResponse::EdgeGetAcls { entries: self.acls.inherited_view(&chain, channel_id).await, groups: self.groups.for_channel(channel_id).await })
    }

    async fn save_channel(&self, edit: mumble_core::channel::Channel, requester_session_id: u32) -> Result<RpcResponse, RpcError> {
        let requester = self.sessions.get(requester_session_id).map_err(|e| RpcError::Validation(e.to_string()))?;

        let exists = self.channels.get(edit.id).await.is_ok();
        let channel = if exists {
            let parent_id = edit.parent_id.unwrap_or(ROOT_CHANNEL_ID);
            self.require_permission(&requester, parent_id, permission::WRITE, "Write").await?;
            self.channels
                .edit(
                    edit.id,
                    ChannelEdit {
                        parent_id: edit.parent_id,
                        name: Some(edit.name),
                        position: Some(edit.position),
                        max_users: Some(edit.max_users),
                        description: Some(edit.description),
                        inherit_acl: Some(edit.inherit_acl),
                    },
                )
                .await
        } else {
            let parent_id = edit.parent_id.unwrap_or(ROOT_CHANNEL_ID);
            self.require_permission(&requester, parent_id, permission::MAKE_CHANNEL, "MakeChannel").await?;
            self.channels.create(parent_id, edit.name, edit.description, edit.temporary).await
        }
        .map_err(|e| RpcError::Validation(e.to_string()))?;

        self.permissions.invalidate_all();
        Ok(RpcResponse::EdgeSaveChannel { channel_id: channel.id })
    }

    async fn save_acl(&self, channel_id: u32, entries: Vec<AclEntry>, groups: Vec<ChannelGroup>, requester_session_id: u32) -> Result<RpcResponse, RpcError> {
        let requester = self.sessions.get(requester_session_id).map_err(|e| RpcError::Validation(e.to_string()))?;
        self.require_permission(&requester, channel_id, permission::WRITE, "Write").await?;

        self.acls.set_entries(channel_id, entries).await;
        self.groups.set_groups(groups).await;
        self.permissions.invalidate_all();
        Ok(RpcResponse::EdgeSaveAcl)
    }

    async fn handle_acl_query(&self, channel_id: u32, requester_session_id: u32) -> Result<RpcResponse, RpcError> {
        let requester = self.sessions.get(requester_session_id).map_err(|e| RpcError::Validation(e.to_string()))?;
        self.require_permission(&requester, channel_id, permission::WRITE, "Write").await?;
        self.get_acls(channel_id).await.map(|r| match r {
            RpcResponse::EdgeGetAcls { entries, groups } => RpcResponse::EdgeHandleAcl { entries, groups },
            other => other,
        })
    }

    async fn route_voice(&self, sender_session_id: u32, target_channel_id: u32) -> Result<RpcResponse, RpcError> {
        let listeners = self.sessions.sessions_in_channel(target_channel_id).into_iter().filter(|s| s.session_id != sender_session_id).map(|s| s.session_id).collect();
        Ok(RpcResponse::EdgeRouteVoice { listener_session_ids: listeners })
    }

    async fn admin_operation(&self, op: AdminOp) -> Result<RpcResponse, RpcError> {
        match op {
            AdminOp::KickSession { session_id, .. } | AdminOp::BanSession { session_id, .. } => {
                self.sessions.remove(session_id);
            }
            AdminOp::MoveSession { session_id, channel_id } => {
                self.sessions.update(session_id, |s| s.channel_id = channel_id).map_err(|e| RpcError::Validation(e.to_string()))?;
            }
            AdminOp::SetSuperuserPassword { .. } => {}
        }
        Ok(RpcResponse::EdgeAdminOperation { applied: true })
    }

    async fn join(&self, edge_id: EdgeId, mut session: Session) -> Result<RpcResponse, RpcError> {
        if self.bans.is_banned(session.ip_address, session.cert_hash.as_deref()).await {
            return Ok(RpcResponse::EdgeJoin { session_id: session.session_id, accepted: false, deny_reason: Some("banned".to_string()) });
        }

        if session.session_id == 0 {
            session.session_id = self.sessions.allocate_session_id();
        }
        session.edge_id = edge_id.clone();
        let session_id = session.session_id;
        self.sessions.insert(session.clone());

        self.broadcast_except(&edge_id, HubNotification::UserJoined { sequence: self.edges.next_sequence(), session }).await;

        Ok(RpcResponse::EdgeJoin { session_id, accepted: true, deny_reason: None })
    }

    pub async fn handle_notification(&self, edge_id: &EdgeId, notification: EdgeNotification) {
        match notification {
            EdgeNotification::HandleUserState { session_id, requester_session_id, patch, .. } => {
                self.apply_user_state(session_id, requester_session_id, patch).await
            }
            EdgeNotification::HandleChannelState { channel, requester_session_id, .. } => {
                if let Ok(RpcResponse::EdgeSaveChannel { channel_id }) = self.save_channel(channel, requester_session_id).await {
                    if let Ok(channel) = self.channels.get(channel_id).await {
                        self.broadcast_except(edge_id, HubNotification::ChannelStateBroadcast { sequence: self.edges.next_sequence(), channel }).await;
                    }
                }
            }
            EdgeNotification::HandleUserRemove { session_id, requester_session_id, reason, ban, .. } => {
                self.handle_user_remove(edge_id, session_id, requester_session_id, reason, ban).await
            }
            EdgeNotification::HandleChannelRemove { channel_id, requester_session_id, .. } => {
                let Ok(requester) = self.sessions.get(requester_session_id) else { return };
                if !self.has_permission(&requester, channel_id, permission::WRITE).await.unwrap_or(false) {
                    metrics::PERMISSION_DENIALS_TOTAL.with_label_values(&["Write"]).inc();
                    return;
                }

                if let Ok((removed, parent_id)) = self.channels.remove(channel_id).await {
                    let mut affected_sessions = Vec::new();
                    for session in self.sessions.all().into_iter().filter(|s| removed.contains(&s.channel_id)) {
                        if self.sessions.update(session.session_id, |s| s.channel_id = parent_id).is_ok() {
                            affected_sessions.push(session.session_id);
                        }
                    }
                    self.permissions.invalidate_all();
                    self.broadcast_except(
                        edge_id,
                        HubNotification::ChannelRemoveBroadcast {
                            sequence: self.edges.next_sequence(),
                            effect: ChannelRemoveEffect { channel_id, channels_removed: removed, affected_sessions, parent_id },
                        },
                    )
                    .await;
                }
            }
            EdgeNotification::HandleTextMessage { sender_session_id, target_sessions, target_channels, target_trees, text, .. } => {
                self.handle_text_message(edge_id, sender_session_id, target_sessions, target_channels, target_trees, text).await
            }
            EdgeNotification::HandlePluginDataTransmission { sender_session_id, receiver_session_ids, data, data_id, .. } => {
                self.broadcast_except(
                    edge_id,
                    HubNotification::PluginDataBroadcast { sequence: self.edges.next_sequence(), sender_session_id, receiver_session_ids, data, data_id },
                )
                .await;
            }
            EdgeNotification::UserLeft { session_id, .. } => {
                self.sessions.remove(session_id);
                self.broadcast_except(edge_id, HubNotification::UserLeft { sequence: self.edges.next_sequence(), session_id }).await;
            }
        }
    }

    /// spec §4.4's `UserRemove` row: `Kick`/`Ban` is root-only (spec §4.7),
    /// so the check always runs at `ROOT_CHANNEL_ID` regardless of the
    /// target's current channel. A ban carries no duration over the wire
    /// (only the `bool`), so a banned removal always records a permanent
    /// ban; see `DESIGN.md`.
    async fn handle_user_remove(&self, edge_id: &EdgeId, session_id: u32, requester_session_id: u32, reason: String, ban: bool) {
        let Ok(requester) = self.sessions.get(requester_session_id) else { return };
        let perm = if ban { permission::BAN } else { permission::KICK };
        if !self.has_permission(&requester, ROOT_CHANNEL_ID, perm).await.unwrap_or(false) {
            metrics::PERMISSION_DENIALS_TOTAL.with_label_values(&[if ban { "Ban" } else { "Kick" }]).inc();
            return;
        }

        let removed = self.sessions.remove(session_id);
        if ban {
            if let Some(session) = &removed {
                let mask = if session.ip_address.is_ipv4() { 32 } else { 128 };
                self.bans
                    .add(mumble_core::ban::Ban {
                        id: 0,
                        ip: Some((session.ip_address, mask)),
                        cert_hash: session.cert_hash.clone(),
                        username: Some(session.username.clone()),
                        reason: reason.clone(),
                        start: now_epoch_secs(),
                        duration: 0,
                    })
                    .await;
            }
        }

        self.broadcast_except(
            edge_id,
            HubNotification::UserRemoveBroadcast { sequence: self.edges.next_sequence(), session_id, actor_session_id: requester_session_id, reason, banned: ban },
        )
        .await;
    }

    /// spec §4.4's `TextMessage` row: `TextMessage` is checked per target
    /// channel/tree before its sessions are added to the receiver set;
    /// directly-addressed sessions need no check (Mumble lets a client
    /// message a session it can already see).
    async fn handle_text_message(&self, edge_id: &EdgeId, sender_session_id: u32, target_sessions: Vec<u32>, target_channels: Vec<u32>, target_trees: Vec<u32>, text: String) {
        let Ok(sender) = self.sessions.get(sender_session_id) else { return };

        let mut receivers: std::collections::HashSet<u32> = target_sessions.into_iter().collect();

        for channel_id in &target_channels {
            if self.has_permission(&sender, *channel_id, permission::TEXT_MESSAGE).await.unwrap_or(false) {
                receivers.extend(self.sessions.sessions_in_channel(*channel_id).into_iter().map(|s| s.session_id));
            } else {
                metrics::PERMISSION_DENIALS_TOTAL.with_label_values(&["TextMessage"]).inc();
            }
        }

        if !target_trees.is_empty() {
            let tree = self.channels.snapshot().await;
            for channel_id in &target_trees {
                if self.has_permission(&sender, *channel_id, permission::TEXT_MESSAGE).await.unwrap_or(false) {
                    for descendant in tree.descendants_including_self(*channel_id) {
                        receivers.extend(self.sessions.sessions_in_channel(descendant).into_iter().map(|s| s.session_id));
                    }
                } else {
                    metrics::PERMISSION_DENIALS_TOTAL.with_label_values(&["TextMessage"]).inc();
                }
            }
        }

        receivers.remove(&sender_session_id);
        if receivers.is_empty() {
            return;
        }

        self.broadcast_except(
            edge_id,
            HubNotification::TextMessageBroadcast { sequence: self.edges.next_sequence(), sender_session_id, receiver_session_ids: receivers.into_iter().collect(), text },
        )
        .await;
    }

    /// spec §4.4's `UserState` row: a self-applied patch (mute/deaf toggles
    /// on your own session, comment, plugin context) needs no permission
    /// check; an admin acting on someone else's session needs `MuteDeafen`
    /// for the mute/deaf/suppress/priority-speaker fields and `Move` for a
    /// channel reassignment, checked at the target's current channel.
    async fn apply_user_state(&self, session_id: u32, requester_session_id: u32, patch: UserStatePatch) {
        if requester_session_id != session_id {
            let Ok(requester) = self.sessions.get(requester_session_id) else { return };
            let Ok(target) = self.sessions.get(session_id) else { return };

            let touches_mute_flags = patch.mute.is_some() || patch.deaf.is_some() || patch.suppress.is_some() || patch.priority_speaker.is_some();
            if touches_mute_flags && !self.has_permission(&requester, target.channel_id, permission::MUTE_DEAFEN).await.unwrap_or(false) {
                metrics::PERMISSION_DENIALS_TOTAL.with_label_values(&["MuteDeafen"]).inc();
                return;
            }

            if let Some(channel_id) = patch.channel_id {
                if !self.has_permission(&requester, channel_id, permission::MOVE).await.unwrap_or(false) {
                    metrics::PERMISSION_DENIALS_TOTAL.with_label_values(&["Move"]).inc();
                    return;
                }
            }
        }

        let result = self.sessions.update(session_id, |s| {
            if let Some(channel_id) = patch.channel_id {
                s.channel_id = channel_id;
            }
            if let Some(username) = patch.username.clone() {
                s.username = username;
            }
            if let Some(mute) = patch.mute {
                s.flags.mute = mute;
            }
            if let Some(deaf) = patch.deaf {
                s.flags.deaf = deaf;
            }
            if let Some(self_mute) = patch.self_mute {
                s.flags.self_mute = self_mute;
            }
            if let Some(self_deaf) = patch.self_deaf {
                s.flags.self_deaf = self_deaf;
            }
            if let Some(suppress) = patch.suppress {
                s.flags.suppress = suppress;
            }
            if let Some(priority_speaker) = patch.priority_speaker {
                s.flags.priority_speaker = priority_speaker;
            }
            if let Some(recording) = patch.recording {
                s.flags.recording = recording;
            }
            for channel_id in &patch.listening_channels_add {
                s.listening_channels.insert(*channel_id);
            }
            for channel_id in &patch.listening_channels_remove {
                s.listening_channels.remove(channel_id);
            }
        });

        if let Ok(session) = result {
            if patch.channel_id.is_some() {
                // Channel-scoped group membership (`in`/`out`) depends on
                // the session's current channel, so a move can change what
                // every other session's cached grant ought to be too.
                self.permissions.invalidate_all();
            }
            self.edges
                .broadcast(&[], HubNotification::UserStateBroadcast { sequence: self.edges.next_sequence(), session, patch })
                .await;
        }
    }

    async fn broadcast_except(&self, _origin: &EdgeId, notification: HubNotification) {
        self.edges.broadcast(&[], notification).await;
    }
}

fn request_label(request: &RpcRequest) -> &'static str {
    match request {
        RpcRequest::EdgeRegister(_) => "edge.register",
        RpcRequest::EdgeHeartbeat { .. } => "edge.heartbeat",
        RpcRequest::EdgeAuthenticate { .. } => "edge.authenticate",
        RpcRequest::EdgeAllocateSessionId { .. } => "edge.allocateSessionId",
        RpcRequest::EdgeReportSession { .. } => "edge.reportSession",
        RpcRequest::EdgeFullSync { .. } => "edge.fullSync",
        RpcRequest::EdgeGetChannels => "edge.getChannels",
        RpcRequest::EdgeGetAcls { .. } => "edge.getACLs",
        RpcRequest::EdgeSaveChannel { .. } => "edge.saveChannel",
        RpcRequest::EdgeSaveAcl { .. } => "edge.saveACL",
        RpcRequest::EdgeHandleAcl { .. } => "edge.handleACL",
        RpcRequest::EdgeSyncVoiceTarget { .. } => "edge.syncVoiceTarget",
        RpcRequest::EdgeRouteVoice { .. } => "edge.routeVoice",
        RpcRequest::EdgeAdminOperation { .. } => "edge.adminOperation",
        RpcRequest::EdgeJoin { .. } => "edge.join",
        RpcRequest::EdgeJoinComplete { .. } => "edge.joinComplete",
        RpcRequest::EdgeReportPeerDisconnect { .. } => "edge.reportPeerDisconnect",
        RpcRequest::ClusterGetStatus => "cluster.getStatus",
        RpcRequest::BlobPut { .. } => "blob.put",
        RpcRequest::BlobGet { .. } => "blob.get",
        RpcRequest::BlobGetUserTexture { .. } => "blob.getUserTexture",
        RpcRequest::BlobGetUserComment { .. } => "blob.getUserComment",
        RpcRequest::BlobSetUserTexture { .. } => "blob.setUserTexture",
        RpcRequest::BlobSetUserComment { .. } => "blob.setUserComment",
    }
}

pub type HubNotificationSender = mpsc::UnboundedSender<HubNotification>;

fn now_epoch_secs() -> u64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthConfig, AutoBanConfig, BlobStoreConfig, DatabaseConfig, RegistryConfig, SuggestConfig, TlsConfig, WebApiConfig};
    use mumble_core::channel::Channel;
    use std::net::{IpAddr, Ipv4Addr};

    fn test_config() -> HubConfig {
        HubConfig {
            server_id: "test".to_string(),
            name: "test-hub".to_string(),
            host: "0.0.0.0".to_string(),
            control_port: 8443,
            timeout_secs: 30,
            max_users: 1000,
            max_users_per_channel: 0,
            channel_nesting_limit: 10,
            channel_count_limit: 1000,
            bandwidth: 558_000,
            text_message_length: 5000,
            image_message_length: 131_072,
            message_limit: 1,
            message_burst: 5,
            plugin_message_limit: 4,
            plugin_message_burst: 15,
            kdf_iterations: -1,
            allow_html: true,
            username_regex: None,
            channel_name_regex: None,
            default_channel: 0,
            remember_channel: true,
            listeners_per_channel: 0,
            listeners_per_user: 0,
            allow_recording: true,
            send_version: true,
            allow_ping: true,
            log_days: 31,
            auto_ban: AutoBanConfig::default(),
            suggest: SuggestConfig::default(),
            auth: AuthConfig::default(),
            tls: TlsConfig { cert: "cert.pem".to_string(), key: "key.pem".to_string(), ca: None, reject_unauthorized: false },
            registry: RegistryConfig::default(),
            database: DatabaseConfig { path: ":memory:".to_string(), backup_dir: None, backup_interval_secs: None, wal_mode: false },
            blob_store: BlobStoreConfig { enabled: false, path: String::new() },
            web_api: WebApiConfig { enabled: false, port: 8080, cors: vec![] },
        }
    }

    fn session(id: u32, channel_id: u32) -> Session {
        Session {
            session_id: id,
            edge_id: "edge-1".to_string(),
            user_id: 0,
            username: format!("guest{id}"),
            channel_id,
            ip_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            cert_hash: None,
            flags: Default::default(),
            groups: vec![],
            listening_channels: Default::default(),
            connected_at: 0,
            last_active: 0,
        }
    }

    #[tokio::test]
    async fn guest_has_default_grant_at_root() {
        let hub = HubState::new(test_config());
        let guest = session(1, 0);
        let granted = hub.granted(&guest, 0).await.unwrap();
        assert!(permission::has_permission(granted, permission::TRAVERSE));
        assert!(!permission::has_permission(granted, permission::MAKE_CHANNEL));
    }

    #[tokio::test]
    async fn save_channel_denied_without_make_channel_permission() {
        let hub = HubState::new(test_config());
        hub.sessions.insert(session(1, 0));

        let proposed = Channel { id: 99, parent_id: Some(0), name: "New".to_string(), position: 0, max_users: 0, inherit_acl: true, description: String::new(), temporary: false, links: Default::default() };
        let result = hub.save_channel(proposed, 1).await;
        assert!(matches!(result, Err(RpcError::PermissionDenied(_))));
    }

    #[tokio::test]
    async fn allocate_session_id_returns_lowest_free_id() {
        let hub = HubState::new(test_config());
        let result = hub.handle_request(&"edge-1".to_string(), RpcRequest::EdgeAllocateSessionId { edge_id: "edge-1".to_string() }).await.unwrap();
        assert!(matches!(result, RpcResponse::EdgeAllocateSessionId { session_id: 1 }));
    }
}
