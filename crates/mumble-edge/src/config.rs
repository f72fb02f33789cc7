//! Edge configuration (spec §6), loaded from TOML per VoIPC's
//! `config.rs` pattern and mirroring [`mumble_hub::config::HubConfig`]'s
//! shape for the options an Edge also recognizes.

use std::fs;
use std::path::Path;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    pub cert: String,
    pub key: String,
    pub ca: Option<String>,
    #[serde(default)]
    pub reject_unauthorized: bool,
}

/// Edge↔Hub RPC client tuning (spec §4.6 "Edge side").
#[derive(Debug, Clone, Deserialize)]
pub struct HubConnectionConfig {
    pub address: String,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_reconnect_initial")]
    pub reconnect_initial_secs: u64,
    #[serde(default = "default_reconnect_max")]
    pub reconnect_max_secs: u64,
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SuggestConfig {
    pub version: Option<String>,
    pub positional: Option<bool>,
    pub push_to_talk: Option<bool>,
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

/// Every option spec §6 names that is meaningful at an Edge. Required
/// fields (`name`, `host`, `port`, `tls`, `hub`, `web_api`) have no serde
/// default and fail TOML deserialization if absent.
#[derive(Debug, Clone, Deserialize)]
pub struct EdgeConfig {
    #[serde(default = "default_edge_id")]
    pub edge_id: String,
    pub name: String,
    pub host: String,
    #[serde(default = "default_control_port")]
    pub port: u16,
    #[serde(default = "default_voice_port")]
    pub voice_port: u16,
    #[serde(default)]
    pub region: String,
    #[serde(default = "default_capacity")]
    pub capacity: u32,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_max_users")]
    pub max_users: u32,
    #[serde(default)]
    pub max_users_per_channel: u32,
    #[serde(default = "default_bandwidth")]
    pub bandwidth: u32,
    #[serde(default = "default_text_message_length")]
    pub text_message_length: u32,
    #[serde(default = "default_image_message_length")]
    pub image_message_length: u32,
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
    /// Authentication-service HTTP timeout (spec §5 "external auth HTTP
    /// (with configurable timeout, default 5 s)").
    #[serde(default = "default_auth_timeout")]
    pub auth_timeout_secs: u64,
    /// Whether to fall back to the cached auth result on collaborator
    /// unavailability (spec §7 "Authentication service unavailability").
    #[serde(default)]
    pub allow_cache_fallback: bool,
    #[serde(default)]
    pub suggest: SuggestConfig,
    pub tls: TlsConfig,
    pub hub: HubConnectionConfig,
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

impl EdgeConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|e| ConfigError::Io(path.display().to_string(), e))?;
        let config: EdgeConfig = toml::from_str(&raw).map_err(|e| ConfigError::Parse(path.display().to_string(), e))?;
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
        if self.port == 0 {
            problems.push("port must be in [1,65535]".to_string());
        }
        if self.tls.cert.trim().is_empty() || self.tls.key.trim().is_empty() {
            problems.push("tls.cert and tls.key are required".to_string());
        }
        if self.hub.address.trim().is_empty() {
            problems.push("hub.address is required".to_string());
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
fn default_edge_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
fn default_control_port() -> u16 {
    64738
}
fn default_voice_port() -> u16 {
    64739
}
fn default_capacity() -> u32 {
    100
}
fn default_timeout() -> u64 {
    30
}
fn default_idle_timeout() -> u64 {
    300
}
fn default_max_users() -> u32 {
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
fn default_auth_timeout() -> u64 {
    5
}
fn default_heartbeat_interval() -> u64 {
    30
}
fn default_reconnect_initial() -> u64 {
    1
}
fn default_reconnect_max() -> u64 {
    30
}
fn default_call_timeout() -> u64 {
    5
}
fn default_web_api_port() -> u16 {
    8081
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_toml() -> &'static str {
        r#"
        name = "edge-1"
        host = "0.0.0.0"

        [tls]
        cert = "cert.pem"
        key = "key.pem"

        [hub]
        address = "hub.internal:8443"

        [web_api]
        enabled = false
        "#
    }

    #[test]
    fn minimal_config_parses_and_fills_defaults() {
        let config: EdgeConfig = toml::from_str(minimal_toml()).unwrap();
        assert_eq!(config.port, 64738);
        assert_eq!(config.hub.heartbeat_interval_secs, 30);
        assert_eq!(config.idle_timeout_secs, 300);
        config.validate().unwrap();
    }

    #[test]
    fn missing_name_and_hub_address_aggregate_into_one_error() {
        let mut config: EdgeConfig = toml::from_str(minimal_toml()).unwrap();
        config.name = String::new();
        config.hub.address = String::new();

        let err = config.validate().unwrap_err();
        let ConfigError::Validation(msg) = err else { panic!("expected validation error") };
        assert!(msg.contains("name"));
        assert!(msg.contains("hub.address"));
    }
}
