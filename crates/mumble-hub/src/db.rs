//! Persistence façade (spec §6 "Persistent state (Hub)"). The schema spec
//! describes maps directly onto a single JSON snapshot file rather than a
//! SQL schema — no SQL crate is part of this stack, and a flat snapshot
//! plus WAL-style periodic backup (per `database.backupInterval`) is
//! sufficient for the single-writer Hub this cluster assumes.

use std::path::{Path, PathBuf};

use mumble_core::acl::AclEntry;
use mumble_core::ban::Ban;
use mumble_core::channel::Channel;
use mumble_core::group::ChannelGroup;
use serde::{Deserialize, Serialize};
use tokio::fs;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistedUser {
    pub user_id: u32,
    pub name: String,
    pub texture_hash: Option<String>,
    pub comment_hash: Option<String>,
    pub last_channel_id: u32,
}

/// A full-database snapshot (spec §6's channels/ACLs/groups/bans/users
/// table list), written atomically on each `save`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DbSnapshot {
    pub channels: Vec<Channel>,
    pub acls: Vec<(u32, Vec<AclEntry>)>,
    pub groups: Vec<ChannelGroup>,
    pub bans: Vec<Ban>,
    pub users: Vec<PersistedUser>,
}

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

pub struct Database {
    path: PathBuf,
}

impl Database {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn load(&self) -> Result<DbSnapshot, DbError> {
        if !Path::new(&self.path).exists() {
            return Ok(DbSnapshot::default());
        }
        let raw = fs::read(&self.path).await?;
        Ok(serde_json::from_slice(&raw)?)
    }

    /// Writes to a sibling temp file and renames over the target so a
    /// crash mid-write never leaves a truncated snapshot on disk.
    pub async fn save(&self, snapshot: &DbSnapshot) -> Result<(), DbError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let tmp_path = self.path.with_extension("tmp");
        let body = serde_json::to_vec_pretty(snapshot)?;
        fs::write(&tmp_path, body).await?;
        fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }

    pub async fn backup_to(&self, dir: impl AsRef<Path>, timestamp: u64) -> Result<(), DbError> {
        fs::create_dir_all(&dir).await?;
        let snapshot = self.load().await?;
        let dest = dir.as_ref().join(format!("hub-backup-{timestamp}.json"));
        fs::write(dest, serde_json::to_vec_pretty(&snapshot)?).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_then_load_round_trips_a_snapshot() {
        let path = std::env::temp_dir().join(format!("mumble-hub-db-test-{}.json", std::process::id()));
        let db = Database::new(path.clone());

        let mut snapshot = DbSnapshot::default();
        snapshot.channels.push(Channel::root());
        db.save(&snapshot).await.unwrap();

        let loaded = db.load().await.unwrap();
        assert_eq!(loaded.channels.len(), 1);

        let _ = tokio::fs::remove_file(path).await;
    }

    #[tokio::test]
    async fn loading_a_missing_file_yields_an_empty_snapshot() {
        let db = Database::new(std::env::temp_dir().join("mumble-hub-db-test-missing.json"));
        let loaded = db.load().await.unwrap();
        assert!(loaded.channels.is_empty());
    }
}
