//! Authoritative channel tree (spec §4.8). Single-writer-per-channel is
//! enforced the easy way here: one `tokio::sync::RwLock` guards the whole
//! tree, mirroring the teacher's `ServerState` convention of a coarse
//! `RwLock` around shared mutable collections rather than per-entity
//! locks. Broadcasts are built from the result while still holding the
//! write guard, then dispatched after it drops (spec §5).

use mumble_core::channel::{Channel, ChannelTree, ROOT_CHANNEL_ID};
use mumble_core::error::CoreError;
use tokio::sync::RwLock;

use crate::error::HubError;

pub struct ChannelEdit {
    pub parent_id: Option<u32>,
    pub name: Option<String>,
    pub position: Option<i32>,
    pub max_users: Option<u32>,
    pub description: Option<String>,
    pub inherit_acl: Option<bool>,
}

pub struct ChannelStore {
    tree: RwLock<ChannelTree>,
    count_limit: u32,
    nesting_limit: u32,
}

impl ChannelStore {
    pub fn new(count_limit: u32, nesting_limit: u32) -> Self {
        Self {
            tree: RwLock::new(ChannelTree::new()),
            count_limit,
            nesting_limit,
        }
    }

    pub async fn list_channels(&self) -> Vec<Channel> {
        self.tree.read().await.iter().cloned().collect()
    }

    pub async fn get(&self, id: u32) -> Result<Channel, HubError> {
        self.tree.read().await.get(id).cloned().ok_or(CoreError::UnknownChannel(id).into())
    }

    /// Implements the `ChannelState` create path of spec §4.8: non-empty
    /// name, parent exists, no case-insensitive sibling collision, nesting
    /// and count limits respected. Permission and `inherit_acl` defaults
    /// are the caller's responsibility before invoking this.
    pub async fn create(&self, parent_id: u32, name: String, description: String, temporary: bool) -> Result<Channel, HubError> {
        if name.trim().is_empty() {
            return Err(HubError::PermissionDenied("channel name must not be empty".to_string()));
        }

        let mut tree = self.tree.write().await;

        if !tree.contains(parent_id) {
            return Err(CoreError::UnknownChannel(parent_id).into());
        }
        if tree.has_sibling_name_collision(parent_id, &name, None) {
            return Err(CoreError::DuplicateSiblingName(name).into());
        }
        if tree.iter().count() as u32 >= self.count_limit {
            return Err(HubError::PermissionDenied("channel count limit reached".to_string()));
        }

        let chain = tree.chain_to_root(parent_id)?;
        if chain.len() as u32 >= self.nesting_limit {
            return Err(HubError::PermissionDenied("channel nesting limit reached".to_string()));
        }

        let id = tree.next_free_id();
        let channel = Channel::new(id, parent_id, name, description, temporary);
        tree.insert(channel.clone());
        Ok(channel)
    }

    /// Implements the edit path: rename collision re-check, cycle check on
    /// reparent (spec §4.8 "walk new-parent chain toward root; reject if
    /// target channel encountered").
    pub async fn edit(&self, id: u32, edit: ChannelEdit) -> Result<Channel, HubError> {
        let mut tree = self.tree.write().await;

        if id == ROOT_CHANNEL_ID && edit.parent_id.is_some() {
            return Err(CoreError::RootUndeletable.into());
        }

        if let Some(new_parent) = edit.parent_id {
            if !tree.contains(new_parent) {
                return Err(CoreError::UnknownChannel(new_parent).into());
            }
            if tree.would_cycle(id, new_parent) {
                return Err(CoreError::WouldCreateCycle(id, new_parent).into());
            }
        }

        if let Some(name) = &edit.name {
            let parent = edit.parent_id.or_else(|| tree.get(id).and_then(|c| c.parent_id));
            if let Some(parent) = parent {
                if tree.has_sibling_name_collision(parent, name, Some(id)) {
                    return Err(CoreError::DuplicateSiblingName(name.clone()).into());
                }
            }
        }

        let channel = tree.get_mut(id).ok_or(CoreError::UnknownChannel(id))?;
        if let Some(parent_id) = edit.parent_id {
            channel.parent_id = Some(parent_id);
        }
        if let Some(name) = edit.name {
            channel.name = name;
        }
        if let Some(position) = edit.position {
            channel.position = position;
        }
        if let Some(max_users) = edit.max_users {
            channel.max_users = max_users;
        }
        if let Some(description) = edit.description {
            channel.description = description;
        }
        if let Some(inherit_acl) = edit.inherit_acl {
            channel.inherit_acl = inherit_acl;
        }

        Ok(channel.clone())
    }

    /// Collects descendants by DFS and removes them all, per spec §4.8.
    /// Returns the removed ids and the parent occupants should move to.
    /// Root is rejected before any mutation happens.
    pub async fn remove(&self, id: u32) -> Result<(Vec<u32>, u32), HubError> {
        if id == ROOT_CHANNEL_ID {
            return Err(CoreError::RootUndeletable.into());
        }

        let mut tree = self.tree.write().await;
        let parent_id = tree.get(id).and_then(|c| c.parent_id).ok_or(CoreError::UnknownChannel(id))?;
        let removed = tree.descendants_including_self(id);
        for channel_id in &removed {
            tree.remove(*channel_id);
        }
        Ok((removed, parent_id))
    }

    pub async fn link(&self, a: u32, b: u32) -> Result<(), HubError> {
        self.tree.write().await.link(a, b).map_err(Into::into)
    }

    pub async fn unlink(&self, a: u32, b: u32) -> Result<(), HubError> {
        self.tree.write().await.unlink(a, b).map_err(Into::into)
    }

    pub async fn chain_to_root(&self, id: u32) -> Result<Vec<u32>, HubError> {
        self.tree.read().await.chain_to_root(id).map_err(Into::into)
    }

    /// A point-in-time clone for sync evaluation (permission checks,
    /// inherited-ACL views) without holding the async lock across it.
    pub async fn snapshot(&self) -> ChannelTree {
        self.tree.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_rejects_sibling_name_collision() {
        let store = ChannelStore::new(1000, 10);
        store.create(0, "Foo".to_string(), String::new(), false).await.unwrap();

        let err = store.create(0, "foo".to_string(), String::new(), false).await.unwrap_err();
        assert!(matches!(err, HubError::Core(CoreError::DuplicateSiblingName(_))));
    }

    #[tokio::test]
    async fn edit_rejects_reparenting_under_own_descendant() {
        let store = ChannelStore::new(1000, 10);
        let a = store.create(0, "A".to_string(), String::new(), false).await.unwrap();
        let b = store.create(a.id, "B".to_string(), String::new(), false).await.unwrap();

        let err = store
            .edit(a.id, ChannelEdit { parent_id: Some(b.id), name: None, position: None, max_users: None, description: None, inherit_acl: None })
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::Core(CoreError::WouldCreateCycle(_, _))));
    }

    #[tokio::test]
    async fn remove_rejects_root_and_collects_descendants() {
        let store = ChannelStore::new(1000, 10);
        let a = store.create(0, "A".to_string(), String::new(), false).await.unwrap();
        let b = store.create(a.id, "B".to_string(), String::new(), false).await.unwrap();

        assert!(store.remove(ROOT_CHANNEL_ID).await.is_err());

        let (mut removed, parent) = store.remove(a.id).await.unwrap();
        removed.sort();
        assert_eq!(removed, vec![a.id, b.id]);
        assert_eq!(parent, 0);
    }

    #[tokio::test]
    async fn remove_drops_symmetric_link_on_the_surviving_channel() {
        let store = ChannelStore::new(1000, 10);
        let a = store.create(0, "A".to_string(), String::new(), false).await.unwrap();
        let b = store.create(0, "B".to_string(), String::new(), false).await.unwrap();
        store.link(a.id, b.id).await.unwrap();

        store.remove(b.id).await.unwrap();

        let snapshot = store.snapshot().await;
        assert!(!snapshot.get(a.id).unwrap().links.contains(&b.id));
    }
}
