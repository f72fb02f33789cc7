//! Ban records (spec §3) and the indexed cache an Edge consults on accept
//! (spec §4.3) and the Hub persists (spec §4.8's `UserRemove` handling).

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Ban {
    pub id: u64,
    pub ip: Option<(IpAddr, u8)>,
    pub cert_hash: Option<String>,
    pub username: Option<String>,
    pub reason: String,
    pub start: u64,
    /// `0` = permanent.
    pub duration: u64,
}

impl Ban {
    pub fn is_active_at(&self, now: u64) -> bool {
        self.duration == 0 || now < self.start + self.duration
    }

    pub fn is_active(&self) -> bool {
        self.is_active_at(now_epoch_secs())
    }

    pub fn matches_ip(&self, addr: IpAddr) -> bool {
        match self.ip {
            Some((ban_addr, mask)) => ip_in_cidr(addr, ban_addr, mask),
            None => false,
        }
    }
}

fn now_epoch_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

fn ip_in_cidr(addr: IpAddr, base: IpAddr, mask_bits: u8) -> bool {
    match (addr, base) {
        (IpAddr::V4(a), IpAddr::V4(b)) => {
            let mask = if mask_bits >= 32 { u32::MAX } else { !0u32 << (32 - mask_bits) };
            (u32::from(a) & mask) == (u32::from(b) & mask)
        }
        (IpAddr::V6(a), IpAddr::V6(b)) => {
            let mask = if mask_bits >= 128 { u128::MAX } else { !0u128 << (128 - mask_bits) };
            (u128::from(a) & mask) == (u128::from(b) & mask)
        }
        _ => false,
    }
}

/// TTL-evicted, dual-indexed ban cache: `cert_hash -> bans` and a linear
/// scan over IP-keyed bans for CIDR matching (the address space covered in
/// practice is small enough per spec §2's 3% budget for this component).
#[derive(Debug, Default)]
pub struct BanCache {
    by_cert: HashMap<String, Vec<Ban>>,
    ip_bans: Vec<Ban>,
    loaded_at: Option<u64>,
    ttl_secs: u64,
}

impl BanCache {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            by_cert: HashMap::new(),
            ip_bans: Vec::new(),
            loaded_at: None,
            ttl_secs,
        }
    }

    pub fn load(&mut self, bans: Vec<Ban>) {
        self.by_cert.clear();
        self.ip_bans.clear();

        for ban in bans {
            if let Some(hash) = ban.cert_hash.clone() {
                self.by_cert.entry(hash).or_default().push(ban.clone());
            }
            if ban.ip.is_some() {
                self.ip_bans.push(ban);
            }
        }

        self.loaded_at = Some(now_epoch_secs());
    }

    pub fn is_stale(&self) -> bool {
        match self.loaded_at {
            Some(t) => now_epoch_secs().saturating_sub(t) > self.ttl_secs,
            None => true,
        }
    }

    /// True if `(ip, cert_hash)` matches any currently-active ban.
    pub fn is_banned(&self, ip: IpAddr, cert_hash: Option<&str>) -> bool {
        if let Some(hash) = cert_hash {
            if let Some(bans) = self.by_cert.get(hash) {
                if bans.iter().any(|b| b.is_active()) {
                    return true;
                }
            }
        }

        self.ip_bans.iter().any(|b| b.is_active() && b.matches_ip(ip))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn cidr_match_respects_mask() {
        let base = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 0));
        assert!(ip_in_cidr(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 42)), base, 24));
        assert!(!ip_in_cidr(IpAddr::V4(Ipv4Addr::new(192, 168, 2, 42)), base, 24));
    }

    #[test]
    fn permanent_ban_is_always_active() {
        let ban = Ban {
            id: 1,
            ip: None,
            cert_hash: Some("abc".to_string()),
            username: None,
            reason: "spam".to_string(),
            start: 0,
            duration: 0,
        };

        assert!(ban.is_active_at(1_000_000_000));
    }

    #[test]
    fn expired_timed_ban_is_inactive() {
        let ban = Ban {
            id: 2,
            ip: None,
            cert_hash: Some("abc".to_string()),
            username: None,
            reason: "spam".to_string(),
            start: 100,
            duration: 50,
        };

        assert!(ban.is_active_at(120));
        assert!(!ban.is_active_at(200));
    }

    #[test]
    fn cache_matches_by_cert_hash() {
        let mut cache = BanCache::new(3600);
        cache.load(vec![Ban {
            id: 3,
            ip: None,
            cert_hash: Some("deadbeef".to_string()),
            username: None,
            reason: "abuse".to_string(),
            start: 0,
            duration: 0,
        }]);

        assert!(cache.is_banned(IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)), Some("deadbeef")));
        assert!(!cache.is_banned(IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)), Some("other")));
    }
}
