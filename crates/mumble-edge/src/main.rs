#[macro_use]
extern crate lazy_static;

use std::fs::File;
use std::io;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::Parser;
use rustls_pemfile::{certs, pkcs8_private_keys};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::mpsc;
use tokio_rustls::rustls::{self, Certificate, PrivateKey};
use tokio_rustls::TlsAcceptor;

use mumble_core::session::{Session, SessionFlags};
use mumble_edge::ban_cache::BanCache;
use mumble_edge::client::Client;
use mumble_edge::client_manager::ClientManager;
use mumble_edge::cluster_voice::PeerRegistry;
use mumble_edge::config::EdgeConfig;
use mumble_edge::handler::LocalContextFlags;
use mumble_edge::hub_client::HubClient;
use mumble_edge::state::EdgeState;
use mumble_edge::{handler, http, metrics, voice_router};
use mumble_proto::mumble::{Reject, Reject_RejectType, Version};
use mumble_rpc::methods::{EdgeInfo, EdgeNotification, RpcRequest, RpcResponse};

/// Edge node of a Mumble cluster: terminates client TLS/UDP, mirrors the
/// Hub's authoritative state, and routes voice locally or across the
/// cluster voice plane.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[clap(short, long, value_parser, default_value = "edge.toml")]
    config: String,
    #[clap(long, value_parser, default_value = "admin")]
    http_user: String,
    #[clap(long, value_parser)]
    http_password: String,
}

/// Lifetime a ban-cache entry is trusted before the next `fullSync`
/// refreshes it (spec §2 "Ban cache"); not itself configurable, same as
/// the teacher's crypt-resync constants.
const BAN_CACHE_TTL_SECS: u64 = 3600;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn load_certs<P: AsRef<Path>>(path: P) -> io::Result<Vec<Certificate>> {
    certs(&mut BufReader::new(File::open(path)?))
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid cert"))
        .map(|mut certs| certs.drain(..).map(Certificate).collect())
}

fn load_keys<P: AsRef<Path>>(path: P) -> io::Result<Vec<PrivateKey>> {
    pkcs8_private_keys(&mut BufReader::new(File::open(path)?))
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid key"))
        .map(|mut keys| keys.drain(..).map(PrivateKey).collect())
}

fn epoch_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

#[actix_web_codegen::main]
async fn main() {
    tracing_subscriber::fmt::init();
    metrics::register_all();

    let args = Args::parse();

    let config = match EdgeConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("cannot load edge config at {}: {}", args.config, e);
            return;
        }
    };

    let certs = match load_certs(&config.tls.cert) {
        Ok(certs) => certs,
        Err(e) => {
            tracing::error!("cannot load certificate at {}: {}", config.tls.cert, e);
            return;
        }
    };

    let mut keys = match load_keys(&config.tls.key) {
        Ok(keys) => keys,
        Err(e) => {
            tracing::error!("cannot load key at {}: {}", config.tls.key, e);
            return;
        }
    };

    // Mumble clients present a self-signed certificate over TLS that the
    // server never validates against a CA (spec §9 Open Question: identity
    // comes from the external authenticator, not the TLS layer). Matching
    // the teacher's TLS config, client certificates are not requested at all.
    let tls_config = match rustls::ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(certs, keys.remove(0))
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
    {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("cannot build tls config: {}", e);
            return;
        }
    };
    let tls_acceptor = TlsAcceptor::from(Arc::new(tls_config));

    let bind_addr = format!("{}:{}", config.host, config.port);
    let voice_bind_addr = format!("{}:{}", config.host, config.voice_port);

    let tcp_listener = match TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("cannot bind client tcp channel on {}: {}", bind_addr, e);
            return;
        }
    };

    let client_udp_socket = match UdpSocket::bind(&bind_addr).await {
        Ok(socket) => Arc::new(socket),
        Err(e) => {
            tracing::error!("cannot bind client udp channel on {}: {}", bind_addr, e);
            return;
        }
    };

    let cluster_udp_socket = match UdpSocket::bind(&voice_bind_addr).await {
        Ok(socket) => Arc::new(socket),
        Err(e) => {
            tracing::error!("cannot bind cross-edge voice channel on {}: {}", voice_bind_addr, e);
            return;
        }
    };

    tracing::info!(edge_id = %config.edge_id, "edge listening on {} (voice plane {})", bind_addr, voice_bind_addr);

    let state = Arc::new(EdgeState::new());
    let clients = Arc::new(ClientManager::new());
    let peers = Arc::new(PeerRegistry::new());
    let ban_cache = Arc::new(BanCache::new(BAN_CACHE_TTL_SECS));

    let edge_info = EdgeInfo {
        edge_id: config.edge_id.clone(),
        name: config.name.clone(),
        host: config.host.clone(),
        port: config.port,
        voice_port: config.voice_port,
        region: config.region.clone(),
        capacity: config.capacity,
    };

    let (hub, notify_rx) = HubClient::start(edge_info, config.hub.clone(), state.clone(), ban_cache.clone());

    tracing::info!("waiting for initial hub connection");
    hub.wait_connected().await;
    tracing::info!("hub connection established, accepting clients");

    actix_rt::spawn(handler::run_hub_notifications(notify_rx, clients.clone(), peers.clone(), config.edge_id.clone()));

    {
        let socket = cluster_udp_socket.clone();
        let state = state.clone();
        let clients = clients.clone();
        actix_rt::spawn(async move {
            mumble_edge::cluster_voice::run_cluster_voice_loop(socket, state, clients).await;
        });
    }

    {
        let socket = client_udp_socket.clone();
        let cluster_socket = cluster_udp_socket.clone();
        let state = state.clone();
        let clients = clients.clone();
        let peers = peers.clone();
        let edge_id = config.edge_id.clone();
        actix_rt::spawn(async move {
            let mut buf = vec![0u8; 4096];
            loop {
                let (len, addr) = match socket.recv_from(&mut buf).await {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::warn!("client udp socket recv error: {e}");
                        continue;
                    }
                };
                voice_router::handle_udp_datagram(&buf[..len], addr, &clients, &state, &edge_id, &peers, &cluster_socket).await;
            }
        });
    }

    let http_server = http::create_http_server(
        format!("{}:{}", config.host, config.web_api.port),
        config.web_api.enabled,
        clients.clone(),
        hub.clone(),
        args.http_user,
        args.http_password,
    );

    let server_version = {
        let proto = 1u32 << 16 | 5 << 8;
        let mut v = Version::new();
        v.set_os(std::env::consts::FAMILY.to_string());
        v.set_os_version(std::env::consts::OS.to_string());
        v.set_release(VERSION.to_string());
        v.set_version(proto);
        v
    };

    let accept_loop = actix_rt::spawn(async move {
        loop {
            let (stream, addr) = match tcp_listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!("tcp accept error: {e}");
                    continue;
                }
            };

            let tls_acceptor = tls_acceptor.clone();
            let state = state.clone();
            let clients = clients.clone();
            let hub = hub.clone();
            let ban_cache = ban_cache.clone();
            let config = config.clone();
            let udp_socket = client_udp_socket.clone();
            let server_version = server_version.clone();

            actix_rt::spawn(async move {
                match tls_acceptor.accept(stream).await {
                    Ok(tls_stream) => {
                        if let Err(e) = connection::handle(tls_stream, addr, server_version, state, clients, hub, ban_cache, config, udp_socket).await {
                            tracing::debug!(peer = %addr, "client connection closed: {e}");
                        }
                    }
                    Err(e) => tracing::debug!(peer = %addr, "tls handshake failed: {e}"),
                }
            });
        }
    });

    match http_server {
        Some(server) => {
            tokio::select! {
                res = accept_loop => if let Err(e) = res { tracing::error!("accept loop task panicked: {e}"); },
                res = server => if let Err(e) = res { tracing::error!("http server error: {e}"); },
            }
        }
        None => {
            if let Err(e) = accept_loop.await {
                tracing::error!("accept loop task panicked: {e}");
            }
        }
    }
}

/// Per-connection handshake and lifecycle (spec §4.3 "Per-client session
/// state machine"): TLS is already established by the time this runs,
/// leaving VERSION_EXCHANGE through RUNNING plus final cleanup.
mod connection {
    use super::*;
    use std::net::SocketAddr;

    use tokio::net::TcpStream;
    use tokio_rustls::server::TlsStream;

    use mumble_edge::error::EdgeError;
    use mumble_proto::{send_message, MessageKind};

    #[allow(clippy::too_many_arguments)]
    pub async fn handle(
        mut stream: TlsStream<TcpStream>,
        addr: SocketAddr,
        server_version: Version,
        state: Arc<EdgeState>,
        clients: Arc<ClientManager>,
        hub: HubClient,
        ban_cache: Arc<BanCache>,
        config: EdgeConfig,
        udp_socket: Arc<UdpSocket>,
    ) -> Result<(), EdgeError> {
        let (version, authenticate, crypt) = Client::init(&mut stream, server_version).await?;
        tracing::debug!(peer = %addr, client_release = %version.get_release(), "client handshake complete");

        if ban_cache.is_banned(addr.ip(), None).await {
            reject(&mut stream, Reject_RejectType::ServerFull, "You are banned from this server").await;
            return Err(EdgeError::Banned);
        }

        let username = authenticate.get_username().to_string();
        let password = authenticate.has_password().then(|| authenticate.get_password().to_string());

        let auth = hub.call(RpcRequest::EdgeAuthenticate { username: username.clone(), password, cert_hash: None }).await?;

        let RpcResponse::EdgeAuthenticate { accepted, user_id, username, groups, deny_reason } = auth else {
            return Err(EdgeError::AuthUnavailable);
        };

        if !accepted {
            let reason = deny_reason.unwrap_or_else(|| "authentication rejected".to_string());
            reject(&mut stream, Reject_RejectType::WrongUserPW, &reason).await;
            return Err(EdgeError::AuthRejected(reason));
        }

        let session_id = match hub.call(RpcRequest::EdgeAllocateSessionId { edge_id: config.edge_id.clone() }).await {
            Ok(RpcResponse::EdgeAllocateSessionId { session_id }) => session_id,
            _ => {
                reject(&mut stream, Reject_RejectType::ServerFull, "server unavailable").await;
                return Err(EdgeError::HubUnavailable);
            }
        };

        let (reader, writer) = tokio::io::split(stream);
        let (disconnect_tx, mut disconnect_rx) = mpsc::channel::<String>(1);

        let client = Arc::new(Client::new(version, authenticate, session_id, crypt, writer, udp_socket, disconnect_tx));

        client.send_server_sync(&format!("Welcome to {}", config.name), config.bandwidth).await?;
        client.send_server_config(&config).await?;
        client.sync_channels_and_sessions(&state).await?;

        let now = epoch_secs();
        let session = Session {
            session_id,
            edge_id: config.edge_id.clone(),
            user_id,
            username,
            channel_id: config.default_channel,
            ip_address: addr.ip(),
            cert_hash: None,
            flags: SessionFlags::default(),
            groups,
            listening_channels: Default::default(),
            connected_at: now,
            last_active: now,
        };

        match hub.call(RpcRequest::EdgeJoin { edge_id: config.edge_id.clone(), session: session.clone() }).await {
            Ok(RpcResponse::EdgeJoin { accepted: true, .. }) => {}
            Ok(RpcResponse::EdgeJoin { deny_reason, .. }) => {
                let reason = deny_reason.unwrap_or_else(|| "join rejected".to_string());
                client.kick(reason.clone()).await;
                return Err(EdgeError::AuthRejected(reason));
            }
            _ => return Err(EdgeError::HubUnavailable),
        }

        let _ = hub.call(RpcRequest::EdgeJoinComplete { edge_id: config.edge_id.clone(), session_id }).await;

        state.upsert_session(session.clone());
        client.send_message(MessageKind::UserState, &Client::user_state_for(&session)).await?;
        clients.insert(client.clone());
        metrics::CLIENTS_ONLINE.inc();

        let local_flags = Arc::new(LocalContextFlags::default());
        let idle_timeout = Duration::from_secs(config.idle_timeout_secs);

        let run_result = tokio::select! {
            result = handler::run_client(client.clone(), reader, state.clone(), clients.clone(), hub.clone(), config.edge_id.clone(), idle_timeout, local_flags) => result,
            Some(reason) = disconnect_rx.recv() => {
                let _ = client.send_message(MessageKind::Reject, &{
                    let mut r = Reject::new();
                    r.set_field_type(Reject_RejectType::None);
                    r.set_reason(reason.clone());
                    r
                }).await;
                Err(EdgeError::AuthRejected(reason))
            }
        };

        clients.remove(session_id);
        state.remove_session(session_id);
        hub.notify(EdgeNotification::UserLeft { edge_id: config.edge_id.clone(), session_id });
        metrics::CLIENTS_ONLINE.dec();

        run_result
    }

    async fn reject(stream: &mut TlsStream<TcpStream>, kind: Reject_RejectType, reason: &str) {
        let mut r = Reject::new();
        r.set_field_type(kind);
        r.set_reason(reason.to_string());
        let _ = send_message(MessageKind::Reject, &r, stream).await;
    }
}

