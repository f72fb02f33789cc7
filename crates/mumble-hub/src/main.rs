#[macro_use]
extern crate lazy_static;

use std::sync::Arc;

use clap::Parser;
use mumble_hub::config::HubConfig;
use mumble_hub::http::create_http_server;
use mumble_hub::HubState;

/// Mumble cluster Hub: the authoritative control plane for channels,
/// ACLs, bans, and sessions across every connected Edge.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[clap(short, long, value_parser, default_value = "hub.toml")]
    config: String,
    /// Listen address for the Edge control RPC channel.
    #[clap(short, long, value_parser, default_value = "0.0.0.0:8443")]
    listen: String,
    /// Listen address for the admin HTTP API.
    #[clap(long, value_parser, default_value = "0.0.0.0:8080")]
    http_listen: String,
    #[clap(long, value_parser, default_value = "admin")]
    http_user: String,
    #[clap(long, value_parser)]
    http_password: String,
}

#[actix_web_codegen::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let config = match HubConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("cannot load hub config at {}: {}", args.config, e);
            return;
        }
    };

    let state = Arc::new(HubState::new(config));

    let listener = match tokio::net::TcpListener::bind(&args.listen).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("cannot bind control channel on {}: {}", args.listen, e);
            return;
        }
    };

    tracing::info!("hub control channel listening on {}", args.listen);

    let rpc_state = state.clone();
    let rpc_task = actix_rt::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    let state = rpc_state.clone();
                    actix_rt::spawn(async move {
                        tracing::debug!("edge control connection from {addr}");
                        if let Err(e) = control_connection::handle(stream, state).await {
                            tracing::warn!("edge control connection from {addr} closed: {e}");
                        }
                    });
                }
                Err(e) => tracing::warn!("accept error on control channel: {e}"),
            }
        }
    });

    let http_server = create_http_server(args.http_listen, state, args.http_user, args.http_password);

    match http_server {
        Some(server) => {
            tokio::select! {
                res = rpc_task => if let Err(e) = res { tracing::error!("control channel task panicked: {e}"); },
                res = server => if let Err(e) = res { tracing::error!("http server error: {e}"); },
            }
        }
        None => {
            if let Err(e) = rpc_task.await {
                tracing::error!("control channel task panicked: {e}");
            }
        }
    }
}

/// The per-Edge control-channel connection loop: reads envelopes,
/// dispatches requests/notifications to [`HubState`], writes responses and
/// relayed broadcasts (spec §4.6, §5 "one task per connected Edge").
mod control_connection {
    use std::sync::Arc;

    use mumble_hub::HubState;
    use mumble_rpc::envelope::{read_envelope, write_envelope, Envelope, EnvelopeError};
    use mumble_rpc::methods::{EdgeId, RpcRequest};
    use tokio::io::{split, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::mpsc;

    pub async fn handle(stream: TcpStream, state: Arc<HubState>) -> Result<(), EnvelopeError> {
        let (mut reader, mut writer) = split(stream);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut edge_id: Option<EdgeId> = None;

        loop {
            tokio::select! {
                envelope = read_envelope(&mut reader) => {
                    match envelope {
                        Ok(Envelope::Request { id, method }) => {
                            if let RpcRequest::EdgeRegister(info) = &method {
                                edge_id = Some(info.edge_id.clone());
                                let backlog = state.edges.register_online(info.clone(), tx.clone()).await;
                                for notification in backlog {
                                    let _ = tx.send(notification);
                                }
                                // Cluster voice plane (spec §4.9): tell every Edge
                                // (including the one just registered; it ignores
                                // its own id in `PeerRegistry::all_except`) where
                                // to reach this one.
                                state
                                    .edges
                                    .broadcast(
                                        &[],
                                        mumble_rpc::methods::HubNotification::PeerJoined {
                                            sequence: state.edges.next_sequence(),
                                            edge_id: info.edge_id.clone(),
                                            host: info.host.clone(),
                                            voice_port: info.voice_port,
                                        },
                                    )
                                    .await;
                            }
                            let target_edge = edge_id.clone().unwrap_or_default();
                            let result = state.handle_request(&target_edge, method).await;
                            write_envelope(&mut writer, &Envelope::response(id, result)).await?;
                        }
                        Ok(Envelope::EdgeNotify { method }) => {
                            let target_edge = edge_id.clone().unwrap_or_default();
                            state.handle_notification(&target_edge, method).await;
                        }
                        Ok(Envelope::Response { .. }) | Ok(Envelope::HubNotify { .. }) => {
                            tracing::debug!("ignoring unexpected envelope direction from edge");
                        }
                        Err(EnvelopeError::Eof) => break,
                        Err(e) => return Err(e),
                    }
                }
                notification = rx.recv() => {
                    match notification {
                        Some(notification) => write_envelope(&mut writer, &Envelope::HubNotify { method: notification }).await?,
                        None => break,
                    }
                }
            }
        }

        if let Some(edge_id) = edge_id {
            state.edges.mark_offline(&edge_id).await;
            state
                .edges
                .broadcast(&[], mumble_rpc::methods::HubNotification::PeerLeft { sequence: state.edges.next_sequence(), edge_id })
                .await;
        }
        let _ = writer.shutdown().await;
        Ok(())
    }
}
