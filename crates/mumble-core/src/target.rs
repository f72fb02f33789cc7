//! Voice target configuration (spec §3): per-session routing profiles
//! indexed `1..=30`, used by `VoiceTarget` protocol messages and consulted
//! by the Edge voice router when a sender addresses a non-default target.

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TargetChannel {
    pub channel_id: u32,
    pub group: Option<String>,
    pub links: bool,
    pub children: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct VoiceTarget {
    pub sessions: Vec<u32>,
    pub channels: Vec<TargetChannel>,
}

impl VoiceTarget {
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty() && self.channels.is_empty()
    }
}

pub const MIN_TARGET_ID: u8 = 1;
pub const MAX_TARGET_ID: u8 = 30;
pub const CURRENT_CHANNEL_TARGET: u8 = 0;
pub const SERVER_BROADCAST_TARGET: u8 = 31;

/// A session's full set of configurable target slots, `1..=30`.
#[derive(Debug, Clone)]
pub struct VoiceTargetTable {
    slots: Vec<VoiceTarget>,
}

impl Default for VoiceTargetTable {
    fn default() -> Self {
        Self {
            slots: vec![VoiceTarget::default(); MAX_TARGET_ID as usize + 1],
        }
    }
}

impl VoiceTargetTable {
    pub fn set(&mut self, id: u8, target: VoiceTarget) {
        if (id as usize) < self.slots.len() {
            self.slots[id as usize] = target;
        }
    }

    pub fn clear(&mut self, id: u8) {
        self.set(id, VoiceTarget::default());
    }

    pub fn get(&self, id: u8) -> Option<&VoiceTarget> {
        self.slots.get(id as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clearing_a_target_empties_it() {
        let mut table = VoiceTargetTable::default();
        table.set(3, VoiceTarget { sessions: vec![7, 9], channels: vec![] });
        assert!(!table.get(3).unwrap().is_empty());

        table.clear(3);
        assert!(table.get(3).unwrap().is_empty());
    }
}
