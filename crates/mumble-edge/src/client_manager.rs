//! The set of clients attached to this Edge process (spec §4.3 "Edge
//! client session state machine", §4.5 "UDP address-learning"), grounded
//! on the teacher's `ServerState` client index — `scc::HashMap` swapped for
//! `dashmap::DashMap` (no async-locking story is needed for a flat
//! session-id/address index; see `DESIGN.md`).

use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;

use crate::client::Client;

#[derive(Default)]
pub struct ClientManager {
    clients: DashMap<u32, Arc<Client>>,
    by_addr: DashMap<SocketAddr, u32>,
}

impl ClientManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, client: Arc<Client>) {
        self.clients.insert(client.session_id, client);
    }

    pub fn remove(&self, session_id: u32) -> Option<Arc<Client>> {
        let removed = self.clients.remove(&session_id).map(|(_, c)| c);
        self.by_addr.retain(|_, sid| *sid != session_id);
        removed
    }

    pub fn get(&self, session_id: u32) -> Option<Arc<Client>> {
        self.clients.get(&session_id).map(|c| c.clone())
    }

    pub fn get_by_addr(&self, addr: &SocketAddr) -> Option<Arc<Client>> {
        let session_id = *self.by_addr.get(addr)?;
        self.get(session_id)
    }

    /// Claims `addr` for `session_id` once a packet from that address has
    /// decrypted successfully against the session's crypt state (spec §4.5:
    /// "per-client crypto-validate-to-claim").
    pub fn learn_addr(&self, addr: SocketAddr, session_id: u32) {
        self.by_addr.insert(addr, session_id);
    }

    /// Every client not yet bound to `addr`, tried in turn by the voice
    /// router until one successfully decrypts the packet (spec §4.5,
    /// grounded on the teacher's `find_client_with_decrypt`).
    pub fn candidates_for_learning(&self) -> Vec<Arc<Client>> {
        self.clients.iter().map(|c| c.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn iter(&self) -> Vec<Arc<Client>> {
        self.clients.iter().map(|c| c.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn addr_index_tracks_insert_and_remove() {
        let manager = ClientManager::new();
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 6000);

        manager.learn_addr(addr, 42);
        assert_eq!(*manager.by_addr.get(&addr).unwrap(), 42);

        manager.by_addr.remove(&addr);
        assert!(manager.by_addr.get(&addr).is_none());
    }
}
