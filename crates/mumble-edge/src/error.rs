//! Edge-local error taxonomy (spec §7): transport/protocol/crypto failures
//! that never leave the Edge process, plus the few that do cross the wire
//! back to the client as a typed `Reject`/`PermissionDenied`.

use mumble_proto::FramingError;
use mumble_rpc::methods::RpcError;

#[derive(Debug, thiserror::Error)]
pub enum EdgeError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),
    #[error("crypto error: {0}")]
    Crypto(#[from] mumble_crypto::CryptoError),
    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError),
    #[error("hub unavailable")]
    HubUnavailable,
    #[error("authentication rejected: {0}")]
    AuthRejected(String),
    #[error("authentication service unavailable")]
    AuthUnavailable,
    #[error("banned")]
    Banned,
    #[error("session handshake timed out")]
    HandshakeTimeout,
    #[error("idle timeout")]
    IdleTimeout,
    #[error("protocol violation: {0}")]
    Protocol(String),
}
