//! Channel-chain ACL evaluator (spec §4.7): given a session and a target
//! channel, walk the chain root-to-target and compute the granted
//! permission mask.

use crate::acl::{AclEntry, Principal};
use crate::channel::ChannelTree;
use crate::error::CoreError;
use crate::group::GroupStore;
use crate::permission::{self, PermissionMask};
use crate::session::Session;

pub trait AclSource {
    /// ACL entries attached directly to `channel_id` (not inherited ones).
    fn acls_at(&self, channel_id: u32) -> Vec<AclEntry>;
}

/// One matched entry from the inherited view used when responding to an
/// `ACL` query (spec §4.8): `inherited = source.channel != target.channel`.
#[derive(Debug, Clone)]
pub struct InheritedAcl {
    pub entry: AclEntry,
    pub inherited: bool,
}

pub fn matches_principal(principal: &Principal, session: &Session, target_channel: u32, groups: &GroupStore, chain: &[u32]) -> bool {
    match principal {
        Principal::UserId(id) => session.user_id == *id,
        Principal::Group(name) => matches_group(name, session, target_channel, groups, chain),
    }
}

fn matches_group(name: &str, session: &Session, target_channel: u32, groups: &GroupStore, chain: &[u32]) -> bool {
    match name {
        "all" => true,
        "auth" => session.user_id > 0,
        "in" => session.channel_id == target_channel,
        "out" => session.channel_id != target_channel,
        other if other.starts_with('$') => session.cert_hash.as_deref() == Some(&other[1..]),
        other if other.starts_with('#') => session.groups.iter().any(|t| t == &other[1..]),
        other => groups.user_in_group(chain, other, session.user_id),
    }
}

/// Computes the granted permission mask for `session` at `target_channel`,
/// per spec §4.7. Superusers bypass the walk entirely.
pub fn evaluate<S: AclSource>(
    tree: &ChannelTree,
    acls: &S,
    groups: &GroupStore,
    session: &Session,
    target_channel: u32,
) -> Result<PermissionMask, CoreError> {
    if session.is_superuser() {
        return Ok(if target_channel == crate::channel::ROOT_CHANNEL_ID {
            permission::ALL_PERMISSIONS
        } else {
            permission::ALL_SUB_PERMISSIONS
        });
    }

    let chain = tree.chain_to_root(target_channel)?;

    let mut grant = permission::DEFAULT_GRANT;
    let mut traverse = true;
    let mut write = false;

    for &channel_id in &chain {
        let channel = tree.get(channel_id).ok_or(CoreError::UnknownChannel(channel_id))?;

        if !channel.inherit_acl {
            grant = permission::DEFAULT_GRANT;
        }

        for entry in acls.acls_at(channel_id) {
            if !entry.covers(target_channel) {
                continue;
            }
            if !matches_principal(&entry.principal, session, target_channel, groups, &chain) {
                continue;
            }

            if entry.allow & permission::TRAVERSE != 0 {
                traverse = true;
            }
            if entry.deny & permission::TRAVERSE != 0 {
                traverse = false;
            }
            if entry.allow & permission::WRITE != 0 {
                write = true;
            }
            if entry.deny & permission::WRITE != 0 {
                write = false;
            }

            grant |= entry.allow;
            grant &= !entry.deny;
        }

        if !traverse && !write {
            return Ok(permission::NONE);
        }
    }

    // Root-only permissions never apply below root.
    if target_channel != crate::channel::ROOT_CHANNEL_ID {
        grant &= !permission::ROOT_ONLY;
    }

    Ok(grant)
}

pub fn has_permission(granted: PermissionMask, perm: PermissionMask) -> bool {
    permission::has_permission(granted, perm)
}

/// Computes the inherited ACL view for an `ACL` query response (spec
/// §4.8): every matching entry along the chain, flagged `inherited`.
pub fn inherited_view<S: AclSource>(tree: &ChannelTree, acls: &S, target_channel: u32) -> Result<Vec<InheritedAcl>, CoreError> {
    let chain = tree.chain_to_root(target_channel)?;
    let mut out = Vec::new();

    for &channel_id in &chain {
        for entry in acls.acls_at(channel_id) {
            if entry.covers(target_channel) {
                out.push(InheritedAcl {
                    inherited: channel_id != target_channel,
                    entry,
                });
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;
    use std::collections::HashMap;
    use std::net::{IpAddr, Ipv4Addr};

    struct FakeAcls(HashMap<u32, Vec<AclEntry>>);

    impl AclSource for FakeAcls {
        fn acls_at(&self, channel_id: u32) -> Vec<AclEntry> {
            self.0.get(&channel_id).cloned().unwrap_or_default()
        }
    }

    fn session(user_id: u32, channel_id: u32, groups: Vec<&str>) -> Session {
        Session {
            session_id: 1,
            edge_id: "edge-1".to_string(),
            user_id,
            username: "alice".to_string(),
            channel_id,
            ip_address: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            cert_hash: None,
            flags: Default::default(),
            groups: groups.into_iter().map(String::from).collect(),
            listening_channels: Default::default(),
            connected_at: 0,
            last_active: 0,
        }
    }

    #[test]
    fn superuser_at_root_gets_all_permissions() {
        let tree = ChannelTree::new();
        let acls = FakeAcls(HashMap::new());
        let groups = GroupStore::new();
        let su = session(1, 0, vec!["admin"]);

        let granted = evaluate(&tree, &acls, &groups, &su, 0).unwrap();
        assert_eq!(granted, permission::ALL_PERMISSIONS);
    }

    #[test]
    fn write_implies_move_but_not_speak() {
        let mut tree = ChannelTree::new();
        tree.insert(Channel::new(1, 0, "A".to_string(), String::new(), false));

        let mut map = HashMap::new();
        map.insert(
            1,
            vec![AclEntry {
                channel_id: 1,
                principal: Principal::Group("all".to_string()),
                apply_here: true,
                apply_subs: true,
                allow: permission::WRITE,
                deny: permission::NONE,
            }],
        );
        let acls = FakeAcls(map);
        let groups = GroupStore::new();
        let user = session(5, 0, vec![]);

        let granted = evaluate(&tree, &acls, &groups, &user, 1).unwrap();
        assert!(has_permission(granted, permission::MOVE));
        assert!(!has_permission(granted, permission::SPEAK));
    }

    #[test]
    fn denying_traverse_without_write_blocks_descendants() {
        let mut tree = ChannelTree::new();
        tree.insert(Channel::new(1, 0, "A".to_string(), String::new(), false));
        tree.insert(Channel::new(2, 1, "B".to_string(), String::new(), false));

        let mut map = HashMap::new();
        map.insert(
            1,
            vec![AclEntry {
                channel_id: 1,
                principal: Principal::Group("all".to_string()),
                apply_here: true,
                apply_subs: true,
                allow: permission::NONE,
                deny: permission::TRAVERSE,
            }],
        );
        let acls = FakeAcls(map);
        let groups = GroupStore::new();
        let user = session(5, 0, vec![]);

        let granted = evaluate(&tree, &acls, &groups, &user, 2).unwrap();
        assert_eq!(granted, permission::NONE);
    }

    #[test]
    fn root_only_permissions_ignored_below_root() {
        let mut tree = ChannelTree::new();
        tree.insert(Channel::new(1, 0, "A".to_string(), String::new(), false));

        let mut map = HashMap::new();
        map.insert(
            1,
            vec![AclEntry {
                channel_id: 1,
                principal: Principal::Group("all".to_string()),
                apply_here: true,
                apply_subs: true,
                allow: permission::KICK,
                deny: permission::NONE,
            }],
        );
        let acls = FakeAcls(map);
        let groups = GroupStore::new();
        let user = session(5, 0, vec![]);

        let granted = evaluate(&tree, &acls, &groups, &user, 1).unwrap();
        assert!(!has_permission(granted, permission::KICK));
    }
}
