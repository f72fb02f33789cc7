//! Per-channel ACL entries (spec §4.8 "On ACL update"). Only the target
//! channel's non-inherited entries are persisted; the inherited view
//! returned to the caller is computed on demand by walking the chain.

use std::collections::HashMap;

use mumble_core::acl::AclEntry;
use mumble_core::evaluator::AclSource;
use mumble_rpc::methods::InheritedAclEntry;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct AclStore {
    entries: RwLock<HashMap<u32, Vec<AclEntry>>>,
}

/// A point-in-time clone of the ACL table, sync-readable so it can be
/// passed to [`mumble_core::evaluator::evaluate`] without holding the
/// store's async lock across the evaluation.
pub struct AclSnapshot(HashMap<u32, Vec<AclEntry>>);

impl AclSource for AclSnapshot {
    fn acls_at(&self, channel_id: u32) -> Vec<AclEntry> {
        self.0.get(&channel_id).cloned().unwrap_or_default()
    }
}

impl AclStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries_at(&self, channel_id: u32) -> Vec<AclEntry> {
        self.entries.read().await.get(&channel_id).cloned().unwrap_or_default()
    }

    pub async fn set_entries(&self, channel_id: u32, entries: Vec<AclEntry>) {
        self.entries.write().await.insert(channel_id, entries);
    }

    /// Walks `chain` (root-first) and emits every entry whose scope covers
    /// `target`, flagged `inherited` when its source channel differs from
    /// the target (spec §4.8).
    pub async fn inherited_view(&self, chain_root_first: &[u32], target: u32) -> Vec<InheritedAclEntry> {
        let entries = self.entries.read().await;
        let mut view = Vec::new();

        for &channel_id in chain_root_first {
            let Some(at_channel) = entries.get(&channel_id) else { continue };
            for entry in at_channel {
                if entry.covers(target) {
                    view.push(InheritedAclEntry {
                        entry: entry.clone(),
                        inherited: channel_id != target,
                    });
                }
            }
        }

        view
    }

    pub async fn snapshot(&self) -> AclSnapshot {
        AclSnapshot(self.entries.read().await.clone())
    }

    /// All persisted entries across every channel, flattened for full sync.
    pub async fn all(&self) -> Vec<AclEntry> {
        self.entries.read().await.values().flatten().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mumble_core::acl::Principal;
    use mumble_core::permission::WRITE;

    #[tokio::test]
    async fn inherited_view_flags_ancestor_entries() {
        let store = AclStore::new();
        store
            .set_entries(0, vec![AclEntry { channel_id: 0, principal: Principal::Group("all".to_string()), apply_here: true, apply_subs: true, allow: WRITE, deny: 0 }])
            .await;
        store
            .set_entries(1, vec![AclEntry { channel_id: 1, principal: Principal::Group("all".to_string()), apply_here: true, apply_subs: false, allow: 0, deny: 0 }])
            .await;

        let view = store.inherited_view(&[0, 1], 1).await;
        assert_eq!(view.len(), 2);
        assert!(view.iter().any(|e| e.entry.channel_id == 0 && e.inherited));
        assert!(view.iter().any(|e| e.entry.channel_id == 1 && !e.inherited));
    }
}
