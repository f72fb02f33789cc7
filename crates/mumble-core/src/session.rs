//! The `Session` record (spec §3): the Hub's view of one authenticated
//! client, shared verbatim in the full-sync/broadcast payloads Edges
//! mirror locally.

use std::collections::HashSet;
use std::net::IpAddr;

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SessionFlags {
    pub mute: bool,
    pub deaf: bool,
    pub self_mute: bool,
    pub self_deaf: bool,
    pub suppress: bool,
    pub priority_speaker: bool,
    pub recording: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Session {
    pub session_id: u32,
    pub edge_id: String,
    /// `0` for guests.
    pub user_id: u32,
    pub username: String,
    pub channel_id: u32,
    pub ip_address: IpAddr,
    pub cert_hash: Option<String>,
    pub flags: SessionFlags,
    pub groups: Vec<String>,
    pub listening_channels: HashSet<u32>,
    pub connected_at: u64,
    pub last_active: u64,
}

impl Session {
    pub fn is_guest(&self) -> bool {
        self.user_id == 0
    }

    pub fn is_superuser(&self) -> bool {
        self.groups.iter().any(|g| g == "admin" || g == "superuser")
    }
}
