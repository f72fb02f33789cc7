//! Edge-local ban mirror (spec §2 "Ban cache", §4.3 "query ban cache on
//! `(ip, cert_hash)`"). Wraps [`mumble_core::ban::BanCache`] behind a lock
//! and refreshes wholesale from the Hub's `fullSync` snapshot, the same
//! way [`crate::state::EdgeState`] mirrors channels/ACLs.

use std::net::IpAddr;

use mumble_core::ban::{Ban, BanCache as CoreBanCache};
use tokio::sync::RwLock;

pub struct BanCache {
    inner: RwLock<CoreBanCache>,
}

impl BanCache {
    pub fn new(ttl_secs: u64) -> Self {
        Self { inner: RwLock::new(CoreBanCache::new(ttl_secs)) }
    }

    pub async fn load(&self, bans: Vec<Ban>) {
        self.inner.write().await.load(bans);
    }

    pub async fn is_stale(&self) -> bool {
        self.inner.read().await.is_stale()
    }

    pub async fn is_banned(&self, ip: IpAddr, cert_hash: Option<&str>) -> bool {
        self.inner.read().await.is_banned(ip, cert_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[tokio::test]
    async fn fresh_cache_with_no_load_is_stale() {
        let cache = BanCache::new(3600);
        assert!(cache.is_stale().await);
    }

    #[tokio::test]
    async fn loaded_ban_is_enforced() {
        let cache = BanCache::new(3600);
        cache
            .load(vec![Ban { id: 1, ip: None, cert_hash: Some("abc".to_string()), username: None, reason: "spam".to_string(), start: 0, duration: 0 }])
            .await;

        assert!(cache.is_banned(IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)), Some("abc")).await);
        assert!(!cache.is_banned(IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)), Some("other")).await);
        assert!(!cache.is_stale().await);
    }
}
