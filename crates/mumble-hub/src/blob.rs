//! Content-addressed blob façade (spec §6 "Blobs are content-addressed;
//! the user/channel record stores only the hash"). Backs user textures
//! and comments; the store itself is a flat directory under
//! `blobStore.path` keyed by the content hash.

use std::path::PathBuf;

use dashmap::DashMap;
use ring::digest;
use tokio::fs;

#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("blob store is disabled")]
    Disabled,
    #[error("blob {0} not found")]
    NotFound(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct BlobStore {
    root: Option<PathBuf>,
    user_textures: DashMap<u32, String>,
    user_comments: DashMap<u32, String>,
}

pub fn hash_of(data: &[u8]) -> String {
    let digest = digest::digest(&digest::SHA256, data);
    hex_encode(digest.as_ref())
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

impl BlobStore {
    pub fn new(enabled: bool, path: impl Into<PathBuf>) -> Self {
        Self {
            root: enabled.then(|| path.into()),
            user_textures: DashMap::new(),
            user_comments: DashMap::new(),
        }
    }

    fn path_for(&self, hash: &str) -> Result<PathBuf, BlobError> {
        self.root.as_ref().map(|r| r.join(hash)).ok_or(BlobError::Disabled)
    }

    pub async fn put(&self, data: Vec<u8>) -> Result<String, BlobError> {
        let root = self.root.as_ref().ok_or(BlobError::Disabled)?;
        fs::create_dir_all(root).await?;
        let hash = hash_of(&data);
        fs::write(root.join(&hash), &data).await?;
        Ok(hash)
    }

    pub async fn get(&self, hash: &str) -> Result<Vec<u8>, BlobError> {
        let path = self.path_for(hash)?;
        fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                BlobError::NotFound(hash.to_string())
            } else {
                BlobError::Io(e)
            }
        })
    }

    pub fn user_texture_hash(&self, user_id: u32) -> Option<String> {
        self.user_textures.get(&user_id).map(|e| e.clone())
    }

    pub fn user_comment_hash(&self, user_id: u32) -> Option<String> {
        self.user_comments.get(&user_id).map(|e| e.clone())
    }

    pub fn set_user_texture(&self, user_id: u32, hash: String) {
        self.user_textures.insert(user_id, hash);
    }

    pub fn set_user_comment(&self, user_id: u32, hash: String) {
        self.user_comments.insert(user_id, hash);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_content_hashes_identically() {
        assert_eq!(hash_of(b"hello"), hash_of(b"hello"));
        assert_ne!(hash_of(b"hello"), hash_of(b"world"));
    }

    #[tokio::test]
    async fn disabled_store_rejects_put_and_get() {
        let store = BlobStore::new(false, "unused");
        assert!(matches!(store.put(vec![1, 2, 3]).await, Err(BlobError::Disabled)));
        assert!(matches!(store.get("deadbeef").await, Err(BlobError::Disabled)));
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = std::env::temp_dir().join(format!("mumble-hub-blob-test-{}", std::process::id()));
        let store = BlobStore::new(true, dir.clone());

        let hash = store.put(b"avatar bytes".to_vec()).await.unwrap();
        let data = store.get(&hash).await.unwrap();
        assert_eq!(data, b"avatar bytes");

        let _ = tokio::fs::remove_dir_all(dir).await;
    }
}
