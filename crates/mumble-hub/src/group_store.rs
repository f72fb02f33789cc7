//! Channel groups (spec §3, §4.7's "channel-group inheritance"). Thin
//! async wrapper over [`mumble_core::group::GroupStore`], matching the
//! other stores' single-writer-per-channel discipline.

use mumble_core::group::{ChannelGroup, GroupStore as CoreGroupStore};
use tokio::sync::RwLock;

#[derive(Default)]
pub struct GroupStore {
    inner: RwLock<CoreGroupStore>,
}

impl GroupStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn for_channel(&self, channel_id: u32) -> Vec<ChannelGroup> {
        self.inner.read().await.for_channel(channel_id).into_iter().cloned().collect()
    }

    pub async fn set_groups(&self, groups: Vec<ChannelGroup>) {
        let mut inner = self.inner.write().await;
        for group in groups {
            inner.upsert(group);
        }
    }

    pub async fn user_in_group(&self, chain_root_first: &[u32], name: &str, user_id: u32) -> bool {
        self.inner.read().await.user_in_group(chain_root_first, name, user_id)
    }

    pub async fn snapshot(&self) -> CoreGroupStore {
        self.inner.read().await.clone()
    }

    /// All persisted groups across every channel, flattened for full sync.
    pub async fn all(&self) -> Vec<ChannelGroup> {
        self.inner.read().await.all().into_iter().cloned().collect()
    }
}
