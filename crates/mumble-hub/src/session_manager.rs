//! Hub session table (spec §4.6 "Session manager", §5 "Hub session table").
//! Writes come from Edge-facing RPC handlers; reads come from the
//! permission checker and broadcast fan-out. A `dashmap` gives per-shard
//! locking rather than one coarse `RwLock` over the whole table, matching
//! the sharded-map convention `TheiLLeniumStudios-ZUMBLE`'s fuller fork of
//! this server uses for its client table (there via `scc::HashMap`, here
//! via the pack's `dashmap`, per the substitution noted in SPEC_FULL.md).

use dashmap::DashMap;
use mumble_core::session::Session;

use crate::error::HubError;

#[derive(Debug, Default)]
pub struct SessionManager {
    sessions: DashMap<u32, Session>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Linear scan for the lowest unused id, matching the allocation
    /// strategy of this server family's client table.
    pub fn allocate_session_id(&self) -> u32 {
        let mut id = 1;
        while self.sessions.contains_key(&id) {
            id += 1;
        }
        id
    }

    pub fn insert(&self, session: Session) {
        self.sessions.insert(session.session_id, session);
    }

    pub fn remove(&self, session_id: u32) -> Option<Session> {
        self.sessions.remove(&session_id).map(|(_, s)| s)
    }

    pub fn get(&self, session_id: u32) -> Result<Session, HubError> {
        self.sessions
            .get(&session_id)
            .map(|e| e.value().clone())
            .ok_or(HubError::UnknownSession(session_id))
    }

    pub fn update<F: FnOnce(&mut Session)>(&self, session_id: u32, f: F) -> Result<Session, HubError> {
        let mut entry = self.sessions.get_mut(&session_id).ok_or(HubError::UnknownSession(session_id))?;
        f(&mut entry);
        Ok(entry.clone())
    }

    pub fn sessions_in_channel(&self, channel_id: u32) -> Vec<Session> {
        self.sessions.iter().filter(|e| e.channel_id == channel_id).map(|e| e.clone()).collect()
    }

    pub fn sessions_on_edge(&self, edge_id: &str) -> Vec<Session> {
        self.sessions.iter().filter(|e| e.edge_id == edge_id).map(|e| e.clone()).collect()
    }

    pub fn all(&self) -> Vec<Session> {
        self.sessions.iter().map(|e| e.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn session(id: u32) -> Session {
        Session {
            session_id: id,
            edge_id: "edge-1".to_string(),
            user_id: 0,
            username: format!("guest{id}"),
            channel_id: 0,
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
    fn allocation_fills_the_lowest_free_id() {
        let manager = SessionManager::new();
        manager.insert(session(1));
        manager.insert(session(2));
        assert_eq!(manager.allocate_session_id(), 3);

        manager.remove(1);
        assert_eq!(manager.allocate_session_id(), 1);
    }

    #[test]
    fn update_mutates_in_place_and_returns_the_new_state() {
        let manager = SessionManager::new();
        manager.insert(session(1));

        let updated = manager.update(1, |s| s.channel_id = 5).unwrap();
        assert_eq!(updated.channel_id, 5);
        assert_eq!(manager.get(1).unwrap().channel_id, 5);
    }
}
