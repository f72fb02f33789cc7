//! External authentication collaborator (spec §5 "external auth HTTP
//! (with configurable timeout, default 5 s)"). Resolves a client's
//! `Authenticate` credentials to a registered `user_id`/groups, falling
//! back to a short-lived cache entry if the upstream call fails so a
//! transient outage doesn't strand already-known users.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResult {
    pub user_id: u32,
    pub username: String,
    pub groups: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("credentials rejected")]
    Rejected,
    #[error("upstream timed out and no cached result is available")]
    NoCacheAvailable,
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, username: &str, password: Option<&str>, cert_hash: Option<&str>) -> Result<AuthResult, AuthError>;
}

/// Calls a configured HTTP endpoint (`POST {base_url}/authenticate`) with
/// a bounded timeout, caching the last successful result per username so a
/// later upstream failure can still admit a previously-seen user (spec §5:
/// suspension point with a configurable timeout; degrade gracefully on the
/// Hub-down case is analogous).
pub struct HttpAuthenticator {
    client: reqwest::Client,
    base_url: String,
    cache: DashMap<String, (AuthResult, u64)>,
    cache_ttl_secs: u64,
}

#[derive(Serialize)]
struct AuthRequestBody<'a> {
    username: &'a str,
    password: Option<&'a str>,
    cert_hash: Option<&'a str>,
}

impl HttpAuthenticator {
    pub fn new(base_url: String, timeout: Duration, cache_ttl_secs: u64) -> Self {
        Self {
            client: reqwest::Client::builder().timeout(timeout).build().expect("reqwest client"),
            base_url,
            cache: DashMap::new(),
            cache_ttl_secs,
        }
    }

    fn cached(&self, username: &str) -> Option<AuthResult> {
        let now = now_epoch_secs();
        self.cache.get(username).and_then(|entry| {
            let (result, at) = entry.value().clone();
            (now.saturating_sub(at) <= self.cache_ttl_secs).then_some(result)
        })
    }
}

#[async_trait]
impl Authenticator for HttpAuthenticator {
    async fn authenticate(&self, username: &str, password: Option<&str>, cert_hash: Option<&str>) -> Result<AuthResult, AuthError> {
        let body = AuthRequestBody { username, password, cert_hash };

        match self.client.post(format!("{}/authenticate", self.base_url)).json(&body).send().await {
            Ok(response) if response.status().is_success() => {
                let result: AuthResult = response.json().await?;
                self.cache.insert(username.to_string(), (result.clone(), now_epoch_secs()));
                Ok(result)
            }
            Ok(response) if response.status().as_u16() == 401 || response.status().as_u16() == 403 => Err(AuthError::Rejected),
            Ok(response) => Err(response.error_for_status().unwrap_err().into()),
            Err(e) => match self.cached(username) {
                Some(result) => {
                    tracing::warn!("auth upstream unreachable for {username}: {e}, serving cached result");
                    Ok(result)
                }
                None => Err(AuthError::NoCacheAvailable),
            },
        }
    }
}

/// Accepts every connection as an unregistered guest; used when no
/// external auth endpoint is configured.
pub struct GuestOnlyAuthenticator;

#[async_trait]
impl Authenticator for GuestOnlyAuthenticator {
    async fn authenticate(&self, username: &str, _password: Option<&str>, _cert_hash: Option<&str>) -> Result<AuthResult, AuthError> {
        Ok(AuthResult { user_id: 0, username: username.to_string(), groups: vec![] })
    }
}

fn now_epoch_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn guest_only_authenticator_always_admits_as_guest() {
        let auth = GuestOnlyAuthenticator;
        let result = auth.authenticate("anyone", None, None).await.unwrap();
        assert_eq!(result.user_id, 0);
        assert_eq!(result.username, "anyone");
    }
}
