//! Hub configuration (spec §6 "Configuration (Hub)"), loaded from a TOML
//! file and overridable by CLI flags, per VoIPC's `config.rs` pattern.

use std::fs;
use std::path::Path;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AutoBanConfig {
    #[serde(default = "default_autoban_attempts")]
    pub attempts: u32,
    #[serde(default = "default_autoban_timeframe")]
    pub timeframe_secs: u64,
    #[serde(default = "default_autoban_duration")]
    pub duration_secs: u64,
    #[serde(default = "default_true")]
    pub ban_successful_connections: bool,
}

impl Default for AutoBanConfig {
    fn default() -> Self {
        Self {
            attempts: default_autoban_attempts(),
            timeframe_secs: default_autoban_timeframe(),
            duration_secs: default_autoban_duration(),
            ban_successful_connections: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SuggestConfig {
    pub version: Option<String>,
    pub positional: Option<bool>,
    pub push_to_talk: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    pub cert: String,
    pub key: String,
    pub ca: Option<String>,
    #[serde(default)]
    pub reject_unauthorized: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_registry_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_edges")]
    pub max_edges: u32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat_interval(),
            timeout_secs: default_registry_timeout(),
            max_edges: default_max_edges(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    pub backup_dir: Option<String>,
    pub backup_interval_secs: Option<u64>,
    #[serde(default)]
    pub wal_mode: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlobStoreConfig {
    #[serde(default)]
    pub enabled: bool,
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebApiConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_web_api_port")]
    pub port: u16,
    #[serde(default)]
    pub cors: Vec<String>,
}

/// The external authentication collaborator (spec §5). `base_url` absent
/// means every handshake is admitted as an unregistered guest.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    pub base_url: Option<String>,
    #[serde(default = "default_auth_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_auth_cache_ttl")]
    pub cache_ttl_secs: u64,
}

/// Every option spec §6 names under "Configuration (Hub)". Required fields
/// (`name`, `host`, `port`, `tls`, `registry`, `database`, `blob_store`,
/// `web_api`) have no serde default and fail TOML deserialization if
/// absent; everything else falls back to the documented default.
#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    #[serde(default = "default_server_id")]
    pub server_id: String,
    pub name: String,
    pub host: String,
    #[serde(default = "default_control_port")]
    pub control_port: u16,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_users")]
    pub max_users: u32,
    #[serde(default)]
    pub max_users_per_channel: u32,
    #[serde(default = "default_channel_nesting_limit")]
    pub channel_nesting_limit: u32,
    #[serde(default = "default_channel_count_limit")]
    pub channel_count_limit: u32,
    #[serde(default = "default_bandwidth")]
    pub bandwidth: u32,
    #[serde(default = "default_text_message_length")]
    pub text_message_length: u32,
    #[serde(default = "default_image_message_length")]
    pub image_message_length: u32,
    #[serde(default = "default_message_limit")]
    pub message_limit: u32,
    #[serde(default = "default_message_burst")]
    pub message_burst: u32,
    #[serde(default = "default_plugin_message_limit")]
    pub plugin_message_limit: u32,
    #[serde(default = "default_plugin_message_burst")]
    pub plugin_message_burst: u32,
    #[serde(default = "default_kdf_iterations")]
    pub kdf_iterations: i32,
    #[serde(default = "default_true")]
    pub allow_html: bool,
    pub username_regex: Option<String>,
    pub channel_name_regex: Option<String>,
    #[serde(default)]
    pub default_channel: u32,
    #[serde(default = "default_true")]
    pub remember_channel: bool,
    #[serde(default)]
    pub listeners_per_channel: u32,
    #[serde(default)]
    pub listeners_per_user: u32,
    #[serde(default = "default_true")]
    pub allow_recording: bool,
    #[serde(default = "default_true")]
    pub send_version: bool,
    #[serde(default = "default_true")]
    pub allow_ping: bool,
    #[serde(default = "default_log_days")]
    pub log_days: u32,
    #[serde(default)]
    pub auto_ban: AutoBanConfig,
    #[serde(default)]
    pub suggest: SuggestConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    pub tls: TlsConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    pub database: DatabaseConfig,
    pub blob_store: BlobStoreConfig,
    pub web_api: WebApiConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file {0}: {1}")]
    Io(String, std::io::Error),
    #[error("cannot parse config file {0}: {1}")]
    Parse(String, toml::de::Error),
    #[error("invalid configuration:\n{0}")]
    Validation(String),
}

impl HubConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|e| ConfigError::Io(path.display().to_string(), e))?;
        let config: HubConfig = toml::from_str(&raw).map_err(|e| ConfigError::Parse(path.display().to_string(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Aggregates every violated rule into one error (spec §7
    /// "Configuration errors... aggregate into one error listing every
    /// violated rule") rather than failing on the first problem found.
    fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if self.name.trim().is_empty() {
            problems.push("name must not be empty".to_string());
        }
        if self.host.trim().is_empty() {
            problems.push("host must not be empty".to_string());
        }
        if self.control_port == 0 {
            problems.push("port must be in [1,65535]".to_string());
        }
        if self.tls.cert.trim().is_empty() || self.tls.key.trim().is_empty() {
            problems.push("tls.cert and tls.key are required".to_string());
        }
        if self.database.path.trim().is_empty() {
            problems.push("database.path is required".to_string());
        }
        if self.blob_store.enabled && self.blob_store.path.trim().is_empty() {
            problems.push("blobStore.path is required when blobStore.enabled".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(problems.join("\n")))
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_server_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
fn default_control_port() -> u16 {
    8443
}
fn default_timeout() -> u64 {
    30
}
fn default_max_users() -> u32 {
    1000
}
fn default_channel_nesting_limit() -> u32 {
    10
}
fn default_channel_count_limit() -> u32 {
    1000
}
fn default_bandwidth() -> u32 {
    558_000
}
fn default_text_message_length() -> u32 {
    5000
}
fn default_image_message_length() -> u32 {
    131_072
}
fn default_message_limit() -> u32 {
    1
}
fn default_message_burst() -> u32 {
    5
}
fn default_plugin_message_limit() -> u32 {
    4
}
fn default_plugin_message_burst() -> u32 {
    15
}
fn default_kdf_iterations() -> i32 {
    -1
}
fn default_log_days() -> u32 {
    31
}
fn default_heartbeat_interval() -> u64 {
    30
}
fn default_registry_timeout() -> u64 {
    30
}
fn default_max_edges() -> u32 {
    64
}
fn default_web_api_port() -> u16 {
    8080
}
fn default_auth_timeout() -> u64 {
    5
}
fn default_auth_cache_ttl() -> u64 {
    300
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_toml() -> &'static str {
        r#"
        name = "test-hub"
        host = "0.0.0.0"

        [tls]
        cert = "cert.pem"
        key = "key.pem"

        [database]
        path = "hub.db"

        [blob_store]
        enabled = false
        path = ""

        [web_api]
        enabled = true
        "#
    }

    #[test]
    fn minimal_config_parses_and_fills_defaults() {
        let config: HubConfig = toml::from_str(minimal_toml()).unwrap();
        assert_eq!(config.control_port, 8443);
        assert_eq!(config.max_users, 1000);
        assert!(config.allow_html);
        config.validate().unwrap();
    }

    #[test]
    fn missing_name_and_tls_aggregate_into_one_error() {
        let mut config: HubConfig = toml::from_str(minimal_toml()).unwrap();
        config.name = String::new();
        config.tls.cert = String::new();
        config.tls.key = String::new();

        let err = config.validate().unwrap_err();
        let ConfigError::Validation(msg) = err else { panic!("expected validation error") };
        assert!(msg.contains("name"));
        assert!(msg.contains("tls"));
    }
}
