//! Persisted ban list (spec §4.8's `UserRemove`-with-ban path, and the
//! `BanList` admin query). Wraps [`mumble_core::ban::BanCache`] with a
//! write lock and an id allocator; Edges pull a read-only snapshot for
//! their own local `ban_cache.rs`.

use mumble_core::ban::{Ban, BanCache};
use tokio::sync::RwLock;

pub struct BanStore {
    all: RwLock<Vec<Ban>>,
    cache: RwLock<BanCache>,
    next_id: RwLock<u64>,
}

impl BanStore {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            all: RwLock::new(Vec::new()),
            cache: RwLock::new(BanCache::new(ttl_secs)),
            next_id: RwLock::new(1),
        }
    }

    pub async fn snapshot(&self) -> Vec<Ban> {
        self.all.read().await.clone()
    }

    pub async fn add(&self, mut ban: Ban) -> Ban {
        let mut next_id = self.next_id.write().await;
        ban.id = *next_id;
        *next_id += 1;
        drop(next_id);

        let mut all = self.all.write().await;
        all.push(ban.clone());
        self.cache.write().await.load(all.clone());
        ban
    }

    pub async fn is_banned(&self, ip: std::net::IpAddr, cert_hash: Option<&str>) -> bool {
        self.cache.read().await.is_banned(ip, cert_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[tokio::test]
    async fn added_ban_is_immediately_enforced() {
        let store = BanStore::new(3600);
        store
            .add(Ban {
                id: 0,
                ip: None,
                cert_hash: Some("abc".to_string()),
                username: Some("troll".to_string()),
                reason: "spam".to_string(),
                start: 0,
                duration: 0,
            })
            .await;

        assert!(store.is_banned(IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)), Some("abc")).await);
        assert_eq!(store.snapshot().await.len(), 1);
    }
}
