pub mod ban_cache;
pub mod client;
pub mod client_manager;
pub mod cluster_voice;
pub mod config;
pub mod error;
pub mod handler;
pub mod http;
pub mod hub_client;
pub mod metrics;
pub mod state;
pub mod voice_router;
