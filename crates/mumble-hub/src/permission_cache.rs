//! Permission grant cache (spec §4.7 "Cache: keyed by `(session_id,
//! channel_id) → granted`; invalidated on ACL or channel-tree change").

use dashmap::DashMap;
use mumble_core::permission::PermissionMask;

#[derive(Default)]
pub struct PermissionCache {
    grants: DashMap<(u32, u32), PermissionMask>,
}

impl PermissionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, session_id: u32, channel_id: u32) -> Option<PermissionMask> {
        self.grants.get(&(session_id, channel_id)).map(|e| *e.value())
    }

    pub fn insert(&self, session_id: u32, channel_id: u32, granted: PermissionMask) {
        self.grants.insert((session_id, channel_id), granted);
    }

    /// Drops every cached grant touching `channel_id`, whether as the
    /// evaluated target or as an ancestor on some other target's chain —
    /// cheaper to over-invalidate than to track per-entry ancestor sets.
    pub fn invalidate_channel(&self, channel_id: u32) {
        self.grants.retain(|&(_, c), _| c != channel_id);
    }

    pub fn invalidate_session(&self, session_id: u32) {
        self.grants.retain(|&(s, _), _| s != session_id);
    }

    /// A channel-tree structural change (reparent, link, remove) can alter
    /// any channel's inherited chain, so the whole cache is dropped.
    pub fn invalidate_all(&self) {
        self.grants.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalidate_channel_drops_only_matching_entries() {
        let cache = PermissionCache::new();
        cache.insert(1, 10, 0xff);
        cache.insert(1, 20, 0xff);

        cache.invalidate_channel(10);
        assert!(cache.get(1, 10).is_none());
        assert!(cache.get(1, 20).is_some());
    }
}
