pub mod acl_store;
pub mod auth;
pub mod ban_store;
pub mod blob;
pub mod channel_store;
pub mod config;
pub mod control_service;
pub mod db;
pub mod edge_registry;
pub mod error;
pub mod group_store;
pub mod http;
pub mod metrics;
pub mod permission_cache;
pub mod session_manager;

pub use control_service::{HubNotificationSender, HubState};
pub use error::HubError;
