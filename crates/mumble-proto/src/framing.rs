//! TCP control-channel framing: `type:u16be | length:u32be | payload`.
//!
//! `MessageKind` is the closed set of Mumble message types; its numeric
//! value is the `type` field. A typed `read_message`/`write_message` pair
//! does the length-prefixed I/O against an `AsyncRead + AsyncWrite` half,
//! mirroring the teacher's `proto::{expected_message, send_message,
//! message_to_bytes}` helpers.

use bytes::{Buf, BufMut, BytesMut};
use protobuf::Message;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Frames larger than this are a protocol violation; the connection is
/// dropped rather than risk unbounded allocation.
pub const MAX_FRAME_LEN: u32 = 10 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum FramingError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame of {0} bytes exceeds the {max} byte limit", max = MAX_FRAME_LEN)]
    FrameTooLarge(u32),
    #[error("unknown message type {0}")]
    UnknownKind(u16),
    #[error("protobuf decode error: {0}")]
    Protobuf(#[from] protobuf::ProtobufError),
}

macro_rules! message_kinds {
    ($($name:ident = $value:expr),* $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u16)]
        pub enum MessageKind {
            $($name = $value),*
        }

        impl MessageKind {
            pub fn from_u16(v: u16) -> Result<Self, FramingError> {
                match v {
                    $($value => Ok(MessageKind::$name),)*
                    other => Err(FramingError::UnknownKind(other)),
                }
            }
        }

        impl std::fmt::Display for MessageKind {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(MessageKind::$name => write!(f, stringify!($name)),)*
                }
            }
        }
    };
}

message_kinds! {
    Version = 0,
    UDPTunnel = 1,
    Authenticate = 2,
    Ping = 3,
    Reject = 4,
    ServerSync = 5,
    ChannelRemove = 6,
    ChannelState = 7,
    UserRemove = 8,
    UserState = 9,
    BanList = 10,
    TextMessage = 11,
    PermissionDenied = 12,
    ACL = 13,
    QueryUsers = 14,
    CryptSetup = 15,
    ContextActionModify = 16,
    ContextAction = 17,
    UserList = 18,
    VoiceTarget = 19,
    PermissionQuery = 20,
    CodecVersion = 21,
    UserStats = 22,
    RequestBlob = 23,
    ServerConfig = 24,
    SuggestConfig = 25,
    PluginDataTransmission = 26,
}

/// Serializes `message` into a ready-to-send frame (header + payload).
pub fn message_to_bytes<T: Message>(kind: MessageKind, message: &T) -> Result<BytesMut, FramingError> {
    let payload = message.write_to_bytes()?;

    if payload.len() as u64 > MAX_FRAME_LEN as u64 {
        return Err(FramingError::FrameTooLarge(payload.len() as u32));
    }

    let mut out = BytesMut::with_capacity(6 + payload.len());
    out.put_u16(kind as u16);
    out.put_u32(payload.len() as u32);
    out.put_slice(&payload);

    Ok(out)
}

pub async fn send_message<T: Message, W: AsyncWrite + Unpin>(
    kind: MessageKind,
    message: &T,
    writer: &mut W,
) -> Result<(), FramingError> {
    let bytes = message_to_bytes(kind, message)?;
    writer.write_all(&bytes).await?;
    Ok(())
}

/// Reads one frame header + payload from `reader`, returning the kind and
/// raw payload bytes. Oversized frames are rejected without reading the
/// (attacker-controlled) body.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<(MessageKind, BytesMut), FramingError> {
    let mut header = [0u8; 6];
    reader.read_exact(&mut header).await?;

    let mut header_buf = &header[..];
    let kind_raw = header_buf.get_u16();
    let len = header_buf.get_u32();

    if len > MAX_FRAME_LEN {
        return Err(FramingError::FrameTooLarge(len));
    }

    let kind = MessageKind::from_u16(kind_raw)?;

    let mut payload = BytesMut::with_capacity(len as usize);
    payload.resize(len as usize, 0);
    reader.read_exact(&mut payload).await?;

    Ok((kind, payload))
}

/// Reads one frame and parses it as `T`, failing if the wire `kind` does
/// not match `expected` (mirrors the teacher's `expected_message`, used
/// during the handshake where message order is fixed).
pub async fn expected_message<T: Message, R: AsyncRead + Unpin>(
    expected: MessageKind,
    reader: &mut R,
) -> Result<T, FramingError> {
    let (kind, mut payload) = read_frame(reader).await?;

    if kind != expected {
        return Err(FramingError::UnknownKind(kind as u16));
    }

    let message = T::parse_from_bytes(payload.split().as_ref())?;
    Ok(message)
}

pub fn parse_message<T: Message>(payload: &[u8]) -> Result<T, FramingError> {
    Ok(T::parse_from_bytes(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_roundtrips_through_u16() {
        for kind in [
            MessageKind::Version,
            MessageKind::UDPTunnel,
            MessageKind::ServerSync,
            MessageKind::PluginDataTransmission,
        ] {
            assert_eq!(MessageKind::from_u16(kind as u16).unwrap(), kind);
        }
    }

    #[test]
    fn unknown_kind_is_rejected() {
        assert!(matches!(MessageKind::from_u16(9999), Err(FramingError::UnknownKind(9999))));
    }
}
