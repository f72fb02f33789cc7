//! Per-connection client record (spec §4.3 "Per-client state"), grounded on
//! the teacher's `client.rs` — same TLS handshake shape, same
//! send/send_message/send_voice_packet split — generalized so the
//! channel-tree/session fields it used to own directly are now looked up
//! from [`crate::state::EdgeState`], which the Hub keeps current instead of
//! a single in-process `ServerState`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use protobuf::Message;
use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::mpsc::Sender;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tokio_rustls::server::TlsStream;

use mumble_core::channel::Channel;
use mumble_core::session::Session;
use mumble_core::target::{VoiceTarget, VoiceTargetTable};
use mumble_crypto::CryptState;
use mumble_proto::mumble::{Authenticate, ChannelState, CryptSetup, ServerConfig, ServerSync, UDPTunnel, UserState, Version};
use mumble_proto::voice::{encode_voice_packet, Clientbound, VoicePacket};
use mumble_proto::{expected_message, message_to_bytes, send_message, MessageKind};

use crate::config::EdgeConfig;
use crate::error::EdgeError;
use crate::state::EdgeState;

pub struct Client {
    pub version: Version,
    pub authenticate: Authenticate,
    pub session_id: u32,
    pub write: RwLock<WriteHalf<TlsStream<TcpStream>>>,
    pub tokens: Vec<String>,
    pub crypt_state: RwLock<CryptState>,
    pub udp_socket_addr: RwLock<Option<SocketAddr>>,
    pub use_opus: bool,
    pub codecs: Vec<i32>,
    pub udp_socket: Arc<UdpSocket>,
    pub targets: RwLock<VoiceTargetTable>,
    pub last_ping: RwLock<Instant>,
    /// Signals the owning connection task to tear down (admin kick, ban,
    /// or a Hub-initiated `ForceDisconnect`), carrying the disconnect
    /// reason shown to the client via `Reject`/`UserRemove`.
    pub disconnect: Sender<String>,
    last_sequence: AtomicU32,
}

impl Client {
    /// Performs the fixed-order handshake prefix (spec §4.3
    /// "TLS_HANDSHAKING → VERSION_EXCHANGE"): read `Version`, send ours,
    /// read `Authenticate`, send a freshly generated `CryptSetup`.
    pub async fn init(stream: &mut TlsStream<TcpStream>, server_version: Version) -> Result<(Version, Authenticate, CryptState), EdgeError> {
        let version: Version = expected_message(MessageKind::Version, stream).await?;

        send_message(MessageKind::Version, &server_version, stream).await?;

        let authenticate: Authenticate = expected_message(MessageKind::Authenticate, stream).await?;

        let crypt = CryptState::new();
        let crypt_setup = crypt.get_crypt_setup();
        send_message(MessageKind::CryptSetup, &crypt_setup, stream).await?;

        Ok((version, authenticate, crypt))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn new(
        version: Version,
        authenticate: Authenticate,
        session_id: u32,
        crypt_state: CryptState,
        write: WriteHalf<TlsStream<TcpStream>>,
        udp_socket: Arc<UdpSocket>,
        disconnect: Sender<String>,
    ) -> Self {
        let tokens = authenticate.get_tokens().to_vec();
        let use_opus = authenticate.has_opus() && authenticate.get_opus();
        let codecs = authenticate.get_celt_versions().to_vec();

        Self {
            version,
            authenticate,
            session_id,
            write: RwLock::new(write),
            tokens,
            crypt_state: RwLock::new(crypt_state),
            udp_socket_addr: RwLock::new(None),
            use_opus,
            codecs,
            udp_socket,
            targets: RwLock::new(VoiceTargetTable::default()),
            last_ping: RwLock::new(Instant::now()),
            disconnect,
            last_sequence: AtomicU32::new(0),
        }
    }

    pub fn username(&self) -> &str {
        self.authenticate.get_username()
    }

    pub async fn send(&self, data: &[u8]) -> Result<(), EdgeError> {
        match timeout(Duration::from_secs(1), self.write.write().await.write_all(data)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(EdgeError::Io(e)),
            Err(_) => Err(EdgeError::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "write timed out"))),
        }
    }

    pub async fn send_message<T: Message>(&self, kind: MessageKind, message: &T) -> Result<(), EdgeError> {
        tracing::trace!(session_id = self.session_id, username = self.username(), kind = %kind, "send message");

        let bytes = message_to_bytes(kind, message)?;
        self.send(&bytes).await?;

        crate::metrics::VOICE_PACKETS_TOTAL.with_label_values(&["tcp-control"]).inc();
        Ok(())
    }

    pub async fn send_crypt_setup(&self, reset: bool) -> Result<(), EdgeError> {
        if reset {
            self.crypt_state.write().await.reset();
        }

        let setup: CryptSetup = self.crypt_state.read().await.get_crypt_setup();
        self.send_message(MessageKind::CryptSetup, &setup).await
    }

    pub async fn send_server_sync(&self, welcome_text: &str, max_bandwidth: u32) -> Result<(), EdgeError> {
        let mut sync = ServerSync::new();
        sync.set_session(self.session_id);
        sync.set_max_bandwidth(max_bandwidth as i32);
        sync.set_welcome_text(welcome_text.to_string());

        self.send_message(MessageKind::ServerSync, &sync).await
    }

    pub async fn send_server_config(&self, config: &EdgeConfig) -> Result<(), EdgeError> {
        let mut server_config = ServerConfig::new();
        server_config.set_max_bandwidth(config.bandwidth);
        server_config.set_allow_html(config.allow_html);
        server_config.set_message_length(config.text_message_length);
        server_config.set_image_message_length(config.image_message_length);
        server_config.set_max_users(config.max_users);

        self.send_message(MessageKind::ServerConfig, &server_config).await
    }

    /// Renders a `Session` mirror entry into the wire `UserState` (spec
    /// §4.3 "SYNCHRONIZING": one `UserState` per known session).
    pub fn user_state_for(session: &Session) -> UserState {
        let mut state = UserState::new();
        state.set_session(session.session_id);
        state.set_name(session.username.clone());
        state.set_user_id(session.user_id);
        state.set_channel_id(session.channel_id);
        state.set_mute(session.flags.mute);
        state.set_deaf(session.flags.deaf);
        state.set_self_mute(session.flags.self_mute);
        state.set_self_deaf(session.flags.self_deaf);
        state.set_suppress(session.flags.suppress);
        state.set_priority_speaker(session.flags.priority_speaker);
        state.set_recording(session.flags.recording);
        state
    }

    fn channel_state_for(channel: &Channel, with_structure: bool) -> ChannelState {
        let mut state = ChannelState::new();
        state.set_channel_id(channel.id);
        state.set_name(channel.name.clone());
        state.set_description(channel.description.clone());
        state.set_temporary(channel.temporary);

        if with_structure {
            state.set_parent(channel.parent_id.unwrap_or(0));
            state.set_position(channel.position);
            state.set_max_users(channel.max_users);
            state.set_links(channel.links.iter().copied().collect());
        }

        state
    }

    /// Initial sync (spec §4.3 "two-pass channel tree send"): a first pass
    /// announces every non-root channel with no parent/position hint so the
    /// client can allocate them, then a second pass fills in the structural
    /// fields once every id is known client-side.
    pub async fn sync_channels_and_sessions(&self, state: &EdgeState) -> Result<(), EdgeError> {
        let channels = state.all_channels().await;

        for channel in &channels {
            if channel.id == mumble_core::channel::ROOT_CHANNEL_ID {
                continue;
            }
            self.send_message(MessageKind::ChannelState, &Self::channel_state_for(channel, false)).await?;
        }

        for channel in &channels {
            self.send_message(MessageKind::ChannelState, &Self::channel_state_for(channel, true)).await?;
        }

        for session in state.all_sessions() {
            self.send_message(MessageKind::UserState, &Self::user_state_for(&session)).await?;
        }

        Ok(())
    }

    pub async fn set_udp_addr(&self, addr: SocketAddr) {
        *self.udp_socket_addr.write().await = Some(addr);
    }

    pub async fn udp_addr(&self) -> Option<SocketAddr> {
        *self.udp_socket_addr.read().await
    }

    pub async fn set_target(&self, id: u8, target: VoiceTarget) {
        self.targets.write().await.set(id, target);
    }

    pub async fn target(&self, id: u8) -> Option<VoiceTarget> {
        self.targets.read().await.get(id).cloned()
    }

    /// Sends a clientbound voice packet, preferring the learned UDP
    /// endpoint and falling back to the TCP `UDPTunnel` carrier (spec
    /// §4.5 "TCP-tunnel fallback for listeners without a UDP endpoint").
    pub async fn send_voice_packet(&self, packet: VoicePacket<Clientbound>) -> Result<(), EdgeError> {
        if let Some(addr) = self.udp_addr().await {
            let mut encoded = BytesMut::new();
            encode_voice_packet(&packet, &mut encoded);

            let mut dest = BytesMut::new();
            self.crypt_state.write().await.encrypt(&encoded, &mut dest);

            match timeout(Duration::from_secs(1), self.udp_socket.send_to(&dest, addr)).await {
                Ok(Ok(_)) => {
                    crate::metrics::VOICE_PACKETS_TOTAL.with_label_values(&["udp-out"]).inc();
                    return Ok(());
                }
                Ok(Err(e)) => return Err(EdgeError::Io(e)),
                Err(_) => return Err(EdgeError::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "udp send timed out"))),
            }
        }

        let mut encoded = BytesMut::new();
        encode_voice_packet(&packet, &mut encoded);

        let mut tunnel = UDPTunnel::new();
        tunnel.set_packet(encoded.to_vec());

        crate::metrics::VOICE_PACKETS_TOTAL.with_label_values(&["tcp-tunnel-out"]).inc();
        self.send_message(MessageKind::UDPTunnel, &tunnel).await
    }

    pub async fn touch_ping(&self) {
        *self.last_ping.write().await = Instant::now();
    }

    pub async fn idle_for(&self) -> Duration {
        self.last_ping.read().await.elapsed()
    }

    pub async fn kick(&self, reason: String) {
        let _ = self.disconnect.send(reason).await;
    }

    /// Monotonic, locally-assigned correlation id for voice-packet
    /// diagnostics; unrelated to the wire `varint(sequence)` the client
    /// itself generates.
    pub fn next_local_sequence(&self) -> u32 {
        self.last_sequence.fetch_add(1, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn session(id: u32, channel_id: u32) -> Session {
        Session {
            session_id: id,
            edge_id: "edge-1".to_string(),
            user_id: 7,
            username: "alice".to_string(),
            channel_id,
            ip_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            cert_hash: None,
            flags: Default::default(),
            groups: vec![],
            listening_channels: Default::default(),
            connected_at: 0,
            last_active: 0,
        }
    }

    #[test]
    fn user_state_for_carries_flags_and_channel() {
        let mut s = session(3, 5);
        s.flags.mute = true;
        s.flags.priority_speaker = true;

        let state = Client::user_state_for(&s);
        assert_eq!(state.get_session(), 3);
        assert_eq!(state.get_channel_id(), 5);
        assert!(state.get_mute());
        assert!(state.get_priority_speaker());
        assert!(!state.get_deaf());
    }

    #[test]
    fn channel_state_without_structure_omits_parent_and_position() {
        let channel = Channel::new(4, 0, "Lobby".to_string(), String::new(), false);
        let state = Client::channel_state_for(&channel, false);
        assert_eq!(state.get_channel_id(), 4);
        assert!(!state.has_parent());
        assert!(!state.has_position());
    }

    #[test]
    fn channel_state_with_structure_includes_parent_and_position() {
        let mut channel = Channel::new(4, 0, "Lobby".to_string(), String::new(), false);
        channel.position = 2;
        let state = Client::channel_state_for(&channel, true);
        assert_eq!(state.get_parent(), 0);
        assert_eq!(state.get_position(), 2);
    }
}
