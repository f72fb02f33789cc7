//! Edge-held state mirror (spec §2 "State mirror (Edge)", §3 "Cluster
//! view"): a read-mostly copy of the Hub's channel tree and the
//! cluster-wide session index, kept current by the notifications
//! `crate::hub_client` delivers. Every mutation records the notification's
//! `sequence` so a future reconnect can detect a gap (a stale mirror is
//! thrown away and rebuilt via `fullSync`, never patched incrementally
//! across a gap).

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use mumble_core::channel::{Channel, ChannelTree};
use mumble_core::session::Session;
use mumble_rpc::methods::{ChannelRemoveEffect, UserStatePatch};
use tokio::sync::RwLock;

pub struct EdgeState {
    channels: RwLock<ChannelTree>,
    /// Cluster-wide session index: every session on every Edge, not just
    /// the ones attached to this process (spec §3 "remote-user index").
    sessions: DashMap<u32, Session>,
    last_sequence: AtomicU64,
}

impl EdgeState {
    pub fn new() -> Self {
        Self { channels: RwLock::new(ChannelTree::new()), sessions: DashMap::new(), last_sequence: AtomicU64::new(0) }
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence.load(Ordering::Relaxed)
    }

    /// Records the sequence of the broadcast just applied, for gap
    /// detection (spec §4.6 "Ordering": "every broadcast carries a
    /// monotonic sequence").
    pub fn observe_sequence(&self, sequence: u64) {
        self.last_sequence.fetch_max(sequence, Ordering::Relaxed);
    }

    pub async fn replace_channels(&self, tree: ChannelTree) {
        *self.channels.write().await = tree;
    }

    pub async fn apply_channel_state(&self, channel: Channel) {
        self.channels.write().await.insert(channel);
    }

    pub async fn apply_channel_remove(&self, effect: &ChannelRemoveEffect) {
        let mut channels = self.channels.write().await;
        for id in &effect.channels_removed {
            channels.remove(*id);
        }
        drop(channels);

        for mut entry in self.sessions.iter_mut() {
            if effect.channels_removed.contains(&entry.channel_id) {
                entry.channel_id = effect.parent_id;
            }
        }
    }

    pub async fn channel(&self, id: u32) -> Option<Channel> {
        self.channels.read().await.get(id).cloned()
    }

    pub async fn all_channels(&self) -> Vec<Channel> {
        self.channels.read().await.iter().cloned().collect()
    }

    /// Expands a `VoiceTarget` channel entry into the concrete channel ids
    /// it covers (spec §4.5: "channel expansion with links/children"), used
    /// by the voice router before gathering listener sessions.
    pub async fn expand_channel_target(&self, channel_id: u32, links: bool, children: bool) -> Vec<u32> {
        let tree = self.channels.read().await;

        let mut ids = if children { tree.descendants_including_self(channel_id) } else { vec![channel_id] };

        if links {
            if let Some(channel) = tree.get(channel_id) {
                ids.extend(channel.links.iter().copied());
            }
        }

        ids
    }

    pub fn replace_sessions(&self, sessions: Vec<Session>) {
        self.sessions.clear();
        for session in sessions {
            self.sessions.insert(session.session_id, session);
        }
    }

    pub fn upsert_session(&self, session: Session) {
        self.sessions.insert(session.session_id, session);
    }

    pub fn remove_session(&self, session_id: u32) -> Option<Session> {
        self.sessions.remove(&session_id).map(|(_, s)| s)
    }

    pub fn session(&self, session_id: u32) -> Option<Session> {
        self.sessions.get(&session_id).map(|s| s.clone())
    }

    pub fn apply_user_state_patch(&self, session_id: u32, patch: &UserStatePatch) {
        if let Some(mut session) = self.sessions.get_mut(&session_id) {
            if let Some(channel_id) = patch.channel_id {
                session.channel_id = channel_id;
            }
            if let Some(username) = &patch.username {
                session.username = username.clone();
            }
            if let Some(mute) = patch.mute {
                session.flags.mute = mute;
            }
            if let Some(deaf) = patch.deaf {
                session.flags.deaf = deaf;
            }
            if let Some(self_mute) = patch.self_mute {
                session.flags.self_mute = self_mute;
            }
            if let Some(self_deaf) = patch.self_deaf {
                session.flags.self_deaf = self_deaf;
            }
            if let Some(suppress) = patch.suppress {
                session.flags.suppress = suppress;
            }
            if let Some(priority_speaker) = patch.priority_speaker {
                session.flags.priority_speaker = priority_speaker;
            }
            if let Some(recording) = patch.recording {
                session.flags.recording = recording;
            }
            for channel_id in &patch.listening_channels_add {
                session.listening_channels.insert(*channel_id);
            }
            for channel_id in &patch.listening_channels_remove {
                session.listening_channels.remove(channel_id);
            }
        }
    }

    /// Every cluster-wide session currently sitting in `channel_id`, used by
    /// the voice router to compute the normal-target listener set (spec
    /// §4.5: "sessions in sender's channel").
    pub fn sessions_in_channel(&self, channel_id: u32) -> Vec<Session> {
        self.sessions.iter().filter(|s| s.channel_id == channel_id).map(|s| s.clone()).collect()
    }

    /// Sessions elsewhere listening to `channel_id` (spec §4.5: "sessions
    /// elsewhere whose listening_channels contains sender's channel").
    pub fn sessions_listening_to(&self, channel_id: u32) -> Vec<Session> {
        self.sessions.iter().filter(|s| s.channel_id != channel_id && s.listening_channels.contains(&channel_id)).map(|s| s.clone()).collect()
    }

    pub fn all_sessions(&self) -> Vec<Session> {
        self.sessions.iter().map(|s| s.clone()).collect()
    }
}

impl Default for EdgeState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn session(id: u32, edge: &str, channel_id: u32) -> Session {
        Session {
            session_id: id,
            edge_id: edge.to_string(),
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

    #[test]
    fn sessions_in_channel_filters_across_edges() {
        let state = EdgeState::new();
        state.upsert_session(session(1, "edge-a", 0));
        state.upsert_session(session(2, "edge-b", 0));
        state.upsert_session(session(3, "edge-b", 5));

        let mut ids: Vec<u32> = state.sessions_in_channel(0).iter().map(|s| s.session_id).collect();
        ids.sort();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn user_state_patch_updates_only_present_fields() {
        let state = EdgeState::new();
        state.upsert_session(session(1, "edge-a", 0));

        let patch = UserStatePatch { mute: Some(true), ..Default::default() };
        state.apply_user_state_patch(1, &patch);

        let session = state.session(1).unwrap();
        assert!(session.flags.mute);
        assert_eq!(session.channel_id, 0);
    }

    #[tokio::test]
    async fn channel_remove_moves_occupants_to_parent() {
        let state = EdgeState::new();
        state.upsert_session(session(1, "edge-a", 3));

        let effect = ChannelRemoveEffect { channel_id: 3, channels_removed: vec![3], affected_sessions: vec![1], parent_id: 0 };
        state.apply_channel_remove(&effect).await;

        assert_eq!(state.session(1).unwrap().channel_id, 0);
        assert!(state.channel(3).await.is_none());
    }

    #[tokio::test]
    async fn expand_channel_target_covers_children_and_links() {
        let state = EdgeState::new();
        let mut tree = ChannelTree::new();
        tree.insert(Channel::new(1, 0, "A".to_string(), String::new(), false));
        tree.insert(Channel::new(2, 1, "B".to_string(), String::new(), false));
        tree.insert(Channel::new(3, 0, "C".to_string(), String::new(), false));
        tree.link(1, 3).unwrap();
        state.replace_channels(tree).await;

        let mut ids = state.expand_channel_target(1, true, true).await;
        ids.sort();
        assert_eq!(ids, vec![1, 2, 3]);

        let mut no_expansion = state.expand_channel_target(1, false, false).await;
        no_expansion.sort();
        assert_eq!(no_expansion, vec![1]);
    }
}
