//! End-to-end scenarios against an in-memory Hub core: no TLS, no real
//! Edge process, just [`HubState`] driven directly the way a connected
//! Edge's RPC handlers would drive it. Mirrors the teacher's sparse
//! testing style but lives in `tests/` rather than inline, since these
//! scenarios span multiple stores at once.

use std::net::{IpAddr, Ipv4Addr};

use mumble_core::acl::{AclEntry, Principal};
use mumble_core::channel::Channel;
use mumble_core::permission;
use mumble_core::session::Session;
use mumble_hub::config::{AuthConfig, AutoBanConfig, BlobStoreConfig, DatabaseConfig, HubConfig, RegistryConfig, SuggestConfig, TlsConfig, WebApiConfig};
use mumble_hub::HubState;
use mumble_rpc::methods::{EdgeNotification, RpcRequest, RpcResponse, UserStatePatch};

fn test_config() -> HubConfig {
    HubConfig {
        server_id: "scenario".to_string(),
        name: "scenario-hub".to_string(),
        host: "0.0.0.0".to_string(),
        control_port: 8443,
        timeout_secs: 30,
        max_users: 1000,
        max_users_per_channel: 0,
        channel_nesting_limit: 10,
        channel_count_limit: 1000,
        bandwidth: 558_000,
        text_message_length: 5000,
        image_message_length: 131_072,
        message_limit: 1,
        message_burst: 5,
        plugin_message_limit: 4,
        plugin_message_burst: 15,
        kdf_iterations: -1,
        allow_html: true,
        username_regex: None,
        channel_name_regex: None,
        default_channel: 0,
        remember_channel: true,
        listeners_per_channel: 0,
        listeners_per_user: 0,
        allow_recording: true,
        send_version: true,
        allow_ping: true,
        log_days: 31,
        auto_ban: AutoBanConfig::default(),
        suggest: SuggestConfig::default(),
        tls: TlsConfig { cert: "cert.pem".to_string(), key: "key.pem".to_string(), ca: None, reject_unauthorized: false },
        registry: RegistryConfig::default(),
        database: DatabaseConfig { path: ":memory:".to_string(), backup_dir: None, backup_interval_secs: None, wal_mode: false },
        blob_store: BlobStoreConfig { enabled: false, path: String::new() },
        web_api: WebApiConfig { enabled: false, port: 8080, cors: vec![] },
    }
}

fn guest(id: u32, edge_id: &str) -> Session {
    Session {
        session_id: id,
        edge_id: edge_id.to_string(),
        user_id: 0,
        username: format!("guest{id}"),
        channel_id: 0,
        ip_address: IpAddr::V4(Ipv4Addr::new(10, 0, 0, id as u8)),
        cert_hash: None,
        flags: Default::default(),
        groups: vec![],
        listening_channels: Default::default(),
        connected_at: 0,
        last_active: 0,
    }
}

fn admin(id: u32, edge_id: &str) -> Session {
    let mut session = guest(id, edge_id);
    session.user_id = id;
    session.groups = vec!["admin".to_string()];
    session
}

#[tokio::test]
async fn join_then_channel_create_then_move_and_remove() {
    let hub = HubState::new(test_config());

    let superuser = admin(1, "edge-a");
    hub.sessions.insert(superuser.clone());

    let proposed = Channel { id: 0, parent_id: Some(0), name: "Lobby".to_string(), position: 0, max_users: 0, inherit_acl: true, description: String::new(), temporary: false, links: Default::default() };
    let response = hub.handle_request(&"edge-a".to_string(), RpcRequest::EdgeSaveChannel { channel: proposed, requester_session_id: 1 }).await.unwrap();
    let RpcResponse::EdgeSaveChannel { channel_id } = response else { panic!("expected EdgeSaveChannel") };
    assert_ne!(channel_id, 0);

    let second_guest = guest(2, "edge-a");
    hub.sessions.insert(second_guest);
    hub.handle_notification(
        &"edge-a".to_string(),
        EdgeNotification::HandleUserState { edge_id: "edge-a".to_string(), session_id: 2, requester_session_id: 2, patch: UserStatePatch { channel_id: Some(channel_id), ..Default::default() } },
    )
    .await;
    assert_eq!(hub.sessions.get(2).unwrap().channel_id, channel_id);

    hub.handle_notification(&"edge-a".to_string(), EdgeNotification::HandleChannelRemove { edge_id: "edge-a".to_string(), channel_id, requester_session_id: 1 }).await;
    assert_eq!(hub.sessions.get(2).unwrap().channel_id, 0);
    assert!(hub.channels.get(channel_id).await.is_err());
}

#[tokio::test]
async fn acl_write_grant_lets_a_previously_denied_user_create_channels() {
    let hub = HubState::new(test_config());
    let user = guest(5, "edge-a");
    hub.sessions.insert(user.clone());

    let denied = hub.has_permission(&user, 0, permission::MAKE_CHANNEL).await.unwrap();
    assert!(!denied);

    hub.acls
        .set_entries(0, vec![AclEntry { channel_id: 0, principal: Principal::UserId(5), apply_here: true, apply_subs: true, allow: permission::WRITE, deny: permission::NONE }])
        .await;
    hub.permissions.invalidate_all();

    let granted = hub.has_permission(&user, 0, permission::MAKE_CHANNEL).await.unwrap();
    assert!(granted);
}

#[tokio::test]
async fn banned_session_is_refused_on_join() {
    let hub = HubState::new(test_config());
    hub.bans
        .add(mumble_core::ban::Ban { id: 0, ip: None, cert_hash: Some("abc123".to_string()), username: None, reason: "abuse".to_string(), start: 0, duration: 0 })
        .await;

    let mut banned = guest(9, "edge-a");
    banned.cert_hash = Some("abc123".to_string());

    let response = hub.handle_request(&"edge-a".to_string(), RpcRequest::EdgeJoin { edge_id: "edge-a".to_string(), session: banned }).await.unwrap();
    let RpcResponse::EdgeJoin { accepted, deny_reason, .. } = response else { panic!("expected EdgeJoin") };
    assert!(!accepted);
    assert_eq!(deny_reason.as_deref(), Some("banned"));
}

#[tokio::test]
async fn full_sync_reports_current_session_table() {
    let hub = HubState::new(test_config());
    hub.sessions.insert(guest(1, "edge-a"));
    hub.sessions.insert(guest(2, "edge-a"));

    let response = hub.handle_request(&"edge-a".to_string(), RpcRequest::EdgeFullSync { edge_id: "edge-a".to_string() }).await.unwrap();
    let RpcResponse::EdgeFullSync { sessions, .. } = response else { panic!("expected EdgeFullSync") };
    assert_eq!(sessions.len(), 2);
}
