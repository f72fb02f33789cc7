//! Cluster membership (spec §4.6 "Hub side"): tracks channels per
//! `edge_id`, `last_seen` for offline detection, and owns the per-Edge
//! replay cache ([`mumble_rpc::ReplayCache`]) broadcasts fall into while
//! an Edge is offline.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use mumble_rpc::methods::{EdgeId, EdgeInfo, EdgeStats, EdgeStatus, HubNotification};
use mumble_rpc::ReplayCache;
use tokio::sync::mpsc;
use tokio::sync::RwLock;

pub struct EdgeHandle {
    pub info: EdgeInfo,
    pub sender: mpsc::UnboundedSender<HubNotification>,
    pub last_seen: u64,
    pub stats: EdgeStats,
}

#[derive(Default)]
struct Registry {
    online: HashMap<EdgeId, EdgeHandle>,
    known: HashMap<EdgeId, EdgeInfo>,
}

pub struct EdgeRegistry {
    registry: RwLock<Registry>,
    replay: RwLock<ReplayCache>,
    sequence: AtomicU64,
    timeout_secs: u64,
}

impl EdgeRegistry {
    pub fn new(max_messages_per_edge: usize, max_cache_time_secs: u64, timeout_secs: u64) -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            replay: RwLock::new(ReplayCache::new(max_messages_per_edge, max_cache_time_secs)),
            sequence: AtomicU64::new(1),
            timeout_secs,
        }
    }

    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    /// Registers `info` as online and replays any backlog accumulated
    /// while it was offline (spec §4.6 "on reconnect the buffered messages
    /// are replayed in sequence before live broadcasts resume"). The
    /// caller is responsible for actually sending the replayed batch on
    /// the freshly connected stream before forwarding further live
    /// notifications to `sender`.
    pub async fn register_online(&self, info: EdgeInfo, sender: mpsc::UnboundedSender<HubNotification>) -> Vec<HubNotification> {
        let edge_id = info.edge_id.clone();
        {
            let mut replay = self.replay.write().await;
            replay.register_edge(&edge_id);
        }
        let backlog = self.replay.write().await.drain_for_replay(&edge_id);

        let mut registry = self.registry.write().await;
        registry.known.insert(edge_id.clone(), info.clone());
        registry.online.insert(
            edge_id,
            EdgeHandle { info, sender, last_seen: now_epoch_secs(), stats: EdgeStats { session_count: 0, cpu_load: 0.0, udp_bytes_in: 0, udp_bytes_out: 0 } },
        );

        backlog
    }

    pub async fn mark_offline(&self, edge_id: &EdgeId) {
        self.registry.write().await.online.remove(edge_id);
    }

    pub async fn heartbeat(&self, edge_id: &EdgeId, stats: EdgeStats) -> bool {
        let mut registry = self.registry.write().await;
        match registry.online.get_mut(edge_id) {
            Some(handle) => {
                handle.last_seen = now_epoch_secs();
                handle.stats = stats;
                true
            }
            None => false,
        }
    }

    /// Offline Edges whose `last_seen` exceeds `timeout_secs` are dropped
    /// entirely from the online set (spec §5's Edge-offline ticker); their
    /// `known` entry and replay queue are kept so they can still rejoin.
    pub async fn reap_stale(&self) -> Vec<EdgeId> {
        let now = now_epoch_secs();
        let mut registry = self.registry.write().await;
        let stale: Vec<EdgeId> = registry
            .online
            .iter()
            .filter(|(_, h)| now.saturating_sub(h.last_seen) > self.timeout_secs)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &stale {
            registry.online.remove(id);
        }
        stale
    }

    /// Broadcasts `notification` to every online Edge listed in `targets`
    /// (or all online Edges if empty), queuing for any target currently
    /// offline.
    pub async fn broadcast(&self, targets: &[EdgeId], notification: HubNotification) {
        let registry = self.registry.read().await;
        let recipients: Vec<EdgeId> = if targets.is_empty() {
            registry.known.keys().cloned().collect()
        } else {
            targets.to_vec()
        };

        for edge_id in recipients {
            match registry.online.get(&edge_id) {
                Some(handle) => {
                    let _ = handle.sender.send(notification.clone());
                }
                None => {
                    self.replay.write().await.queue_for(&edge_id, notification.clone());
                }
            }
        }
    }

    pub async fn status(&self) -> Vec<EdgeStatus> {
        let registry = self.registry.read().await;
        registry
            .known
            .values()
            .map(|info| {
                let online_handle = registry.online.get(&info.edge_id);
                EdgeStatus {
                    info: info.clone(),
                    online: online_handle.is_some(),
                    last_seen: online_handle.map(|h| h.last_seen).unwrap_or(0),
                    stats: online_handle.map(|h| h.stats.clone()).unwrap_or(EdgeStats { session_count: 0, cpu_load: 0.0, udp_bytes_in: 0, udp_bytes_out: 0 }),
                }
            })
            .collect()
    }

    pub async fn is_online(&self, edge_id: &EdgeId) -> bool {
        self.registry.read().await.online.contains_key(edge_id)
    }
}

fn now_epoch_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge_info(id: &str) -> EdgeInfo {
        EdgeInfo { edge_id: id.to_string(), name: id.to_string(), host: "127.0.0.1".to_string(), port: 64738, voice_port: 64739, region: "local".to_string(), capacity: 100 }
    }

    #[tokio::test]
    async fn broadcast_to_offline_edge_queues_for_replay() {
        let registry = EdgeRegistry::new(10, 3600, 30);
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.register_online(edge_info("edge-a"), tx).await;
        registry.mark_offline(&"edge-a".to_string()).await;

        registry
            .broadcast(&["edge-a".to_string()], HubNotification::AclUpdated { sequence: 1, channel_id: 0, timestamp: 0 })
            .await;

        let (tx2, _rx2) = mpsc::unbounded_channel();
        let backlog = registry.register_online(edge_info("edge-a"), tx2).await;
        assert_eq!(backlog.len(), 1);
    }

    #[tokio::test]
    async fn fresh_heartbeat_is_not_reaped() {
        let registry = EdgeRegistry::new(10, 3600, 30);
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.register_online(edge_info("edge-a"), tx).await;

        let stale = registry.reap_stale().await;
        assert!(stale.is_empty());
        assert!(registry.is_online(&"edge-a".to_string()).await);
    }

    #[tokio::test]
    async fn mark_offline_removes_from_online_set() {
        let registry = EdgeRegistry::new(10, 3600, 30);
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.register_online(edge_info("edge-a"), tx).await;

        registry.mark_offline(&"edge-a".to_string()).await;
        assert!(!registry.is_online(&"edge-a".to_string()).await);
    }
}
