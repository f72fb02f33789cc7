//! Per-Edge broadcast replay cache (spec §4.6: "the Hub continues to queue
//! its broadcast messages into a per-Edge ring buffer (FIFO,
//! `maxMessagesPerEdge`, TTL `maxCacheTime`); on reconnect the buffered
//! messages are replayed in sequence before live broadcasts resume").

use std::collections::{HashMap, VecDeque};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::methods::{EdgeId, HubNotification};

#[derive(Debug, Clone)]
struct Entry {
    notification: HubNotification,
    queued_at: u64,
}

/// One Edge's FIFO backlog, bounded both by count and by age.
#[derive(Debug)]
struct EdgeQueue {
    entries: VecDeque<Entry>,
    max_len: usize,
    max_age_secs: u64,
}

impl EdgeQueue {
    fn new(max_len: usize, max_age_secs: u64) -> Self {
        Self { entries: VecDeque::new(), max_len, max_age_secs }
    }

    fn push(&mut self, notification: HubNotification, now: u64) {
        self.evict_stale(now);
        if self.entries.len() >= self.max_len {
            self.entries.pop_front();
        }
        self.entries.push_back(Entry { notification, queued_at: now });
    }

    fn evict_stale(&mut self, now: u64) {
        while let Some(front) = self.entries.front() {
            if now.saturating_sub(front.queued_at) > self.max_age_secs {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    fn drain(&mut self, now: u64) -> Vec<HubNotification> {
        self.evict_stale(now);
        self.entries.drain(..).map(|e| e.notification).collect()
    }
}

/// Holds one [`EdgeQueue`] per known Edge. Online Edges get broadcasts
/// delivered live and never accumulate a backlog; offline Edges (or Edges
/// the Hub hasn't marked online yet) accumulate until `drain_for_replay`
/// is called on reconnect, per spec §4.6's "new Edge entering also gets a
/// cache slot".
#[derive(Debug, Default)]
pub struct ReplayCache {
    queues: HashMap<EdgeId, EdgeQueue>,
    max_messages_per_edge: usize,
    max_cache_time_secs: u64,
}

impl ReplayCache {
    pub fn new(max_messages_per_edge: usize, max_cache_time_secs: u64) -> Self {
        Self {
            queues: HashMap::new(),
            max_messages_per_edge,
            max_cache_time_secs,
        }
    }

    pub fn register_edge(&mut self, edge_id: &EdgeId) {
        self.queues
            .entry(edge_id.clone())
            .or_insert_with(|| EdgeQueue::new(self.max_messages_per_edge, self.max_cache_time_secs));
    }

    pub fn deregister_edge(&mut self, edge_id: &EdgeId) {
        self.queues.remove(edge_id);
    }

    /// Queues `notification` for a single offline Edge. Online delivery is
    /// the connection task's responsibility; this cache only exists for
    /// the gap between disconnect and reconnect.
    pub fn queue_for(&mut self, edge_id: &EdgeId, notification: HubNotification) {
        let now = now_epoch_secs();
        self.queues
            .entry(edge_id.clone())
            .or_insert_with(|| EdgeQueue::new(self.max_messages_per_edge, self.max_cache_time_secs))
            .push(notification, now);
    }

    /// Drains and returns the backlog for `edge_id` in enqueue order, for
    /// replay immediately before live broadcasts resume.
    pub fn drain_for_replay(&mut self, edge_id: &EdgeId) -> Vec<HubNotification> {
        let now = now_epoch_secs();
        match self.queues.get_mut(edge_id) {
            Some(queue) => queue.drain(now),
            None => Vec::new(),
        }
    }

    pub fn backlog_len(&self, edge_id: &EdgeId) -> usize {
        self.queues.get(edge_id).map(|q| q.entries.len()).unwrap_or(0)
    }
}

fn now_epoch_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification(sequence: u64) -> HubNotification {
        HubNotification::UserLeft { sequence, session_id: 1 }
    }

    #[test]
    fn replay_drains_in_fifo_order() {
        let mut cache = ReplayCache::new(10, 3600);
        let edge = "edge-a".to_string();
        cache.register_edge(&edge);

        cache.queue_for(&edge, notification(1));
        cache.queue_for(&edge, notification(2));
        cache.queue_for(&edge, notification(3));

        let replayed = cache.drain_for_replay(&edge);
        let sequences: Vec<u64> = replayed.iter().map(|n| n.sequence()).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
        assert_eq!(cache.backlog_len(&edge), 0);
    }

    #[test]
    fn queue_evicts_oldest_once_over_capacity() {
        let mut cache = ReplayCache::new(2, 3600);
        let edge = "edge-a".to_string();

        cache.queue_for(&edge, notification(1));
        cache.queue_for(&edge, notification(2));
        cache.queue_for(&edge, notification(3));

        let replayed = cache.drain_for_replay(&edge);
        let sequences: Vec<u64> = replayed.iter().map(|n| n.sequence()).collect();
        assert_eq!(sequences, vec![2, 3]);
    }

    #[test]
    fn unregistered_edge_replays_empty() {
        let mut cache = ReplayCache::new(10, 3600);
        assert!(cache.drain_for_replay(&"ghost".to_string()).is_empty());
    }
}
