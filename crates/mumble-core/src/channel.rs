//! Channel tree: a flat `id -> Channel` map plus `parent_id` pointers, per
//! the design note in spec §9 ("avoid owning parent/child references that
//! would require cycle-breaking"). Children and link membership are
//! derived, never stored as owning pointers.

use std::collections::{BTreeSet, HashMap};

use crate::error::CoreError;

pub const ROOT_CHANNEL_ID: u32 = 0;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Channel {
    pub id: u32,
    /// `None` only for the root channel.
    pub parent_id: Option<u32>,
    pub name: String,
    pub position: i32,
    /// `0` = unlimited.
    pub max_users: u32,
    pub inherit_acl: bool,
    pub description: String,
    pub temporary: bool,
    pub links: BTreeSet<u32>,
}

impl Channel {
    pub fn root() -> Self {
        Self {
            id: ROOT_CHANNEL_ID,
            parent_id: None,
            name: "Root".to_string(),
            position: 0,
            max_users: 0,
            inherit_acl: true,
            description: String::new(),
            temporary: false,
            links: BTreeSet::new(),
        }
    }

    pub fn new(id: u32, parent_id: u32, name: String, description: String, temporary: bool) -> Self {
        Self {
            id,
            parent_id: Some(parent_id),
            name,
            position: 0,
            max_users: 0,
            inherit_acl: true,
            description,
            temporary,
            links: BTreeSet::new(),
        }
    }
}

/// Authoritative channel tree held by the Hub, and the shape the Edge
/// mirror keeps a read-only copy of.
#[derive(Debug, Default, Clone)]
pub struct ChannelTree {
    channels: HashMap<u32, Channel>,
}

impl ChannelTree {
    pub fn new() -> Self {
        let mut channels = HashMap::new();
        channels.insert(ROOT_CHANNEL_ID, Channel::root());
        Self { channels }
    }

    pub fn get(&self, id: u32) -> Option<&Channel> {
        self.channels.get(&id)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut Channel> {
        self.channels.get_mut(&id)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.channels.contains_key(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    pub fn children_of(&self, parent: u32) -> Vec<&Channel> {
        self.channels.values().filter(|c| c.parent_id == Some(parent)).collect()
    }

    /// Siblings have distinct case-insensitive names (spec §3 invariant).
    pub fn has_sibling_name_collision(&self, parent: u32, name: &str, exclude_id: Option<u32>) -> bool {
        let lower = name.to_lowercase();
        self.channels
            .values()
            .any(|c| c.parent_id == Some(parent) && Some(c.id) != exclude_id && c.name.to_lowercase() == lower)
    }

    /// Walks from `child` up to the root, returning the chain ordered
    /// root-first (used both for ACL evaluation and cycle checks).
    pub fn chain_to_root(&self, child: u32) -> Result<Vec<u32>, CoreError> {
        let mut chain = Vec::new();
        let mut current = Some(child);
        let mut guard = 0;

        while let Some(id) = current {
            chain.push(id);
            guard += 1;
            if guard > self.channels.len() + 1 {
                return Err(CoreError::CyclicChannelTree(child));
            }

            current = match self.channels.get(&id) {
                Some(c) => c.parent_id,
                None => return Err(CoreError::UnknownChannel(id)),
            };
        }

        chain.reverse();
        Ok(chain)
    }

    /// True if moving `channel` to become a child of `new_parent` would
    /// create a cycle (`new_parent` is `channel` or one of its descendants).
    pub fn would_cycle(&self, channel: u32, new_parent: u32) -> bool {
        if channel == new_parent {
            return true;
        }

        let mut current = Some(new_parent);
        let mut guard = 0;

        while let Some(id) = current {
            if id == channel {
                return true;
            }
            guard += 1;
            if guard > self.channels.len() + 1 {
                return true;
            }
            current = self.channels.get(&id).and_then(|c| c.parent_id);
        }

        false
    }

    pub fn insert(&mut self, channel: Channel) {
        self.channels.insert(channel.id, channel);
    }

    /// Removes `id`, first walking its `links` set to drop the symmetric
    /// back-reference on every channel it was linked to (spec §3 "links are
    /// symmetric" must hold after removal too).
    pub fn remove(&mut self, id: u32) -> Option<Channel> {
        if let Some(channel) = self.channels.get(&id) {
            let linked: Vec<u32> = channel.links.iter().copied().collect();
            for other in linked {
                if let Some(c) = self.channels.get_mut(&other) {
                    c.links.remove(&id);
                }
            }
        }
        self.channels.remove(&id)
    }

    pub fn next_free_id(&self) -> u32 {
        let mut id = 1;
        while self.channels.contains_key(&id) {
            id += 1;
        }
        id
    }

    /// Symmetric link add: `A -> B` always implies `B -> A`.
    pub fn link(&mut self, a: u32, b: u32) -> Result<(), CoreError> {
        {
            let ca = self.channels.get_mut(&a).ok_or(CoreError::UnknownChannel(a))?;
            ca.links.insert(b);
        }
        let cb = self.channels.get_mut(&b).ok_or(CoreError::UnknownChannel(b))?;
        cb.links.insert(a);
        Ok(())
    }

    pub fn unlink(&mut self, a: u32, b: u32) -> Result<(), CoreError> {
        {
            let ca = self.channels.get_mut(&a).ok_or(CoreError::UnknownChannel(a))?;
            ca.links.remove(&b);
        }
        let cb = self.channels.get_mut(&b).ok_or(CoreError::UnknownChannel(b))?;
        cb.links.remove(&a);
        Ok(())
    }

    /// DFS collection of `id` and every descendant, used by channel removal
    /// (spec §4.8: "collect descendants by DFS").
    pub fn descendants_including_self(&self, id: u32) -> Vec<u32> {
        let mut out = Vec::new();
        let mut stack = vec![id];

        while let Some(current) = stack.pop() {
            out.push(current);
            for child in self.children_of(current) {
                stack.push(child.id);
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_sibling_name_collision_case_insensitively() {
        let mut tree = ChannelTree::new();
        tree.insert(Channel::new(1, 0, "Foo".to_string(), String::new(), false));

        assert!(tree.has_sibling_name_collision(0, "foo", None));
        assert!(!tree.has_sibling_name_collision(0, "foo", Some(1)));
        assert!(!tree.has_sibling_name_collision(0, "bar", None));
    }

    #[test]
    fn would_cycle_rejects_moving_under_own_descendant() {
        let mut tree = ChannelTree::new();
        tree.insert(Channel::new(1, 0, "A".to_string(), String::new(), false));
        tree.insert(Channel::new(2, 1, "B".to_string(), String::new(), false));

        assert!(tree.would_cycle(1, 2));
        assert!(!tree.would_cycle(2, 1));
    }

    #[test]
    fn chain_to_root_is_root_first() {
        let mut tree = ChannelTree::new();
        tree.insert(Channel::new(1, 0, "A".to_string(), String::new(), false));
        tree.insert(Channel::new(2, 1, "B".to_string(), String::new(), false));

        assert_eq!(tree.chain_to_root(2).unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn links_are_symmetric() {
        let mut tree = ChannelTree::new();
        tree.insert(Channel::new(1, 0, "A".to_string(), String::new(), false));
        tree.insert(Channel::new(2, 0, "B".to_string(), String::new(), false));

        tree.link(1, 2).unwrap();
        assert!(tree.get(1).unwrap().links.contains(&2));
        assert!(tree.get(2).unwrap().links.contains(&1));

        tree.unlink(1, 2).unwrap();
        assert!(!tree.get(1).unwrap().links.contains(&2));
        assert!(!tree.get(2).unwrap().links.contains(&1));
    }

    #[test]
    fn removing_a_linked_channel_drops_the_symmetric_back_reference() {
        let mut tree = ChannelTree::new();
        tree.insert(Channel::new(1, 0, "A".to_string(), String::new(), false));
        tree.insert(Channel::new(2, 0, "B".to_string(), String::new(), false));

        tree.link(1, 2).unwrap();
        tree.remove(2);

        assert!(!tree.get(1).unwrap().links.contains(&2));
    }

    #[test]
    fn descendants_include_self_and_children_only() {
        let mut tree = ChannelTree::new();
        tree.insert(Channel::new(1, 0, "A".to_string(), String::new(), false));
        tree.insert(Channel::new(2, 1, "B".to_string(), String::new(), false));
        tree.insert(Channel::new(3, 0, "C".to_string(), String::new(), false));

        let mut descendants = tree.descendants_including_self(1);
        descendants.sort();
        assert_eq!(descendants, vec![1, 2]);
    }
}
