//! The Edge↔Hub wire envelope (spec §4.6): one long-lived reliable stream
//! per Edge, length-prefixed, binary-encoded with `postcard` rather than
//! the client-facing protobuf framing in `mumble-proto` — there is no
//! interop requirement on this side of the cluster, and `postcard` is
//! already the wire format VoIPC's server crate reaches for on its
//! internal links.

use std::io;

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::methods::{EdgeNotification, HubNotification, RpcError, RpcRequest, RpcResponse};

pub const MAX_ENVELOPE_LEN: u32 = 16 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("envelope of {0} bytes exceeds the {1} byte limit")]
    TooLarge(u32, u32),
    #[error("connection closed")]
    Eof,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("encode error: {0}")]
    Encode(#[from] postcard::Error),
}

/// Carries a call id so a response can be matched to its request on the
/// side that issued it; notifications carry no id (spec §4.6: `id?`).
pub type CallId = u64;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Envelope {
    Request { id: CallId, method: RpcRequest },
    Response { id: CallId, result: Result<RpcResponse, RpcError> },
    EdgeNotify { method: EdgeNotification },
    HubNotify { method: HubNotification },
}

impl Envelope {
    pub fn request(id: CallId, method: RpcRequest) -> Self {
        Envelope::Request { id, method }
    }

    pub fn response(id: CallId, result: Result<RpcResponse, RpcError>) -> Self {
        Envelope::Response { id, result }
    }
}

/// Encodes `envelope` as `length:u32be | postcard(envelope)` into `dest`,
/// mirroring the length-prefixed shape of the client-facing Mumble framing
/// this cluster otherwise uses end to end.
pub fn encode(envelope: &Envelope, dest: &mut BytesMut) -> Result<(), EnvelopeError> {
    let body = postcard::to_allocvec(envelope)?;
    let len = u32::try_from(body.len()).map_err(|_| EnvelopeError::TooLarge(u32::MAX, MAX_ENVELOPE_LEN))?;
    if len > MAX_ENVELOPE_LEN {
        return Err(EnvelopeError::TooLarge(len, MAX_ENVELOPE_LEN));
    }

    dest.reserve(4 + body.len());
    dest.put_u32(len);
    dest.put_slice(&body);
    Ok(())
}

pub fn decode(buf: &[u8]) -> Result<Envelope, EnvelopeError> {
    Ok(postcard::from_bytes(buf)?)
}

/// Reads one length-prefixed envelope off `stream`, blocking until a full
/// frame is available. Returns [`EnvelopeError::Eof`] on a clean close
/// before any bytes of a new frame arrive.
pub async fn read_envelope<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Envelope, EnvelopeError> {
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Err(EnvelopeError::Eof),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf);
    if len > MAX_ENVELOPE_LEN {
        return Err(EnvelopeError::TooLarge(len, MAX_ENVELOPE_LEN));
    }

    let mut body = vec![0u8; len as usize];
    stream.read_exact(&mut body).await?;
    decode(&body)
}

pub async fn write_envelope<W: AsyncWrite + Unpin>(stream: &mut W, envelope: &Envelope) -> Result<(), EnvelopeError> {
    let mut buf = BytesMut::new();
    encode(envelope, &mut buf)?;
    stream.write_all(&buf).await?;
    Ok(())
}

/// Pulls one complete envelope out of `buf` if present, advancing `buf`
/// past it. Used by the Hub's per-Edge connection task, which reads into
/// an accumulating buffer rather than awaiting exact-length reads so a
/// slow Edge link doesn't stall the whole select loop.
pub fn try_decode_buffered(buf: &mut BytesMut) -> Result<Option<Envelope>, EnvelopeError> {
    if buf.len() < 4 {
        return Ok(None);
    }

    let len = u32::from_be_bytes(buf[..4].try_into().expect("checked above")) as usize;
    if len as u64 > MAX_ENVELOPE_LEN as u64 {
        return Err(EnvelopeError::TooLarge(len as u32, MAX_ENVELOPE_LEN));
    }

    if buf.len() < 4 + len {
        return Ok(None);
    }

    buf.advance(4);
    let body = buf.split_to(len);
    Ok(Some(decode(&body)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::methods::EdgeInfo;

    #[test]
    fn encode_decode_round_trips_a_request() {
        let envelope = Envelope::request(
            7,
            RpcRequest::EdgeRegister(EdgeInfo {
                edge_id: "edge-1".to_string(),
                name: "edge-1".to_string(),
                host: "10.0.0.1".to_string(),
                port: 64738,
                voice_port: 64739,
                region: "us-east".to_string(),
                capacity: 500,
            }),
        );

        let mut buf = BytesMut::new();
        encode(&envelope, &mut buf).unwrap();

        let decoded = try_decode_buffered(&mut buf).unwrap().unwrap();
        assert!(buf.is_empty());
        match decoded {
            Envelope::Request { id, method: RpcRequest::EdgeRegister(info) } => {
                assert_eq!(id, 7);
                assert_eq!(info.edge_id, "edge-1");
            }
            other => panic!("unexpected envelope: {other:?}"),
        }
    }

    #[test]
    fn try_decode_buffered_waits_for_a_complete_frame() {
        let envelope = Envelope::response(3, Err(RpcError::NotFound));
        let mut full = BytesMut::new();
        encode(&envelope, &mut full).unwrap();

        let mut partial = BytesMut::from(&full[..full.len() - 1]);
        assert!(try_decode_buffered(&mut partial).unwrap().is_none());

        partial.put_slice(&full[full.len() - 1..]);
        assert!(try_decode_buffered(&mut partial).unwrap().is_some());
    }

    #[test]
    fn oversized_length_prefix_is_rejected_before_allocating() {
        let mut buf = BytesMut::new();
        buf.put_u32(MAX_ENVELOPE_LEN + 1);
        buf.put_slice(&[0u8; 8]);

        assert!(matches!(try_decode_buffered(&mut buf), Err(EnvelopeError::TooLarge(_, _))));
    }
}
