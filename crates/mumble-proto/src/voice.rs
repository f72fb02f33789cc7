//! Voice sub-protocol shared by UDP and the TCP `UDPTunnel` carrier: a
//! 1-byte header `type:3 | target:5` followed by a codec-specific payload.
//! `type ∈ {0,2,3,4}` are codec packets (CELT alpha, speex, CELT beta,
//! opus); `type == 1` is the voice-channel Ping echo. `target` selects a
//! `VoiceTarget` slot (0 = current channel, 1..=30 = configured target,
//! 31 = server broadcast).

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

use crate::varint::{self, VarintError};

#[derive(Debug, Error)]
pub enum VoicePacketError {
    #[error("packet shorter than the 1-byte voice header")]
    Empty,
    #[error("varint error: {0}")]
    Varint(#[from] VarintError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceCodec {
    CeltAlpha,
    Ping,
    Speex,
    CeltBeta,
    Opus,
}

impl VoiceCodec {
    fn from_type_bits(bits: u8) -> Self {
        match bits {
            0 => VoiceCodec::CeltAlpha,
            1 => VoiceCodec::Ping,
            2 => VoiceCodec::Speex,
            3 => VoiceCodec::CeltBeta,
            _ => VoiceCodec::Opus,
        }
    }

    fn type_bits(self) -> u8 {
        match self {
            VoiceCodec::CeltAlpha => 0,
            VoiceCodec::Ping => 1,
            VoiceCodec::Speex => 2,
            VoiceCodec::CeltBeta => 3,
            VoiceCodec::Opus => 4,
        }
    }
}

/// Marker for a packet as received from the speaking client: header target
/// bits are meaningful and the payload starts with `varint(sequence)`.
#[derive(Debug, Clone, Copy)]
pub struct ServerBound;

/// Marker for a packet rewritten for delivery to a listener: target bits
/// are zeroed and the payload is prefixed with `varint(sender_session_id)`.
#[derive(Debug, Clone, Copy)]
pub struct Clientbound;

#[derive(Debug, Clone)]
pub struct VoicePacket<Bound> {
    pub codec: VoiceCodec,
    pub target: u8,
    /// For `ServerBound`: `varint(sequence) | frames`. For `Clientbound`:
    /// `varint(session_id) | varint(sequence) | frames`.
    pub payload: BytesMut,
    _bound: std::marker::PhantomData<Bound>,
}

impl VoicePacket<ServerBound> {
    pub fn decode(mut data: BytesMut) -> Result<Self, VoicePacketError> {
        if data.is_empty() {
            return Err(VoicePacketError::Empty);
        }

        let header = data.get_u8();
        let codec = VoiceCodec::from_type_bits(header >> 5);
        let target = header & 0x1F;

        Ok(Self {
            codec,
            target,
            payload: data,
            _bound: std::marker::PhantomData,
        })
    }

    /// Splits the sequence number off the front of the payload without
    /// consuming the codec frames, for sequence-validation/logging.
    pub fn peek_sequence(&self) -> Result<u64, VoicePacketError> {
        let mut cursor = self.payload.clone();
        Ok(varint::decode(&mut cursor)?)
    }

    /// Rewrites this sender-bound packet into one addressed to a listener:
    /// strip the target bits, prepend the sender's session id.
    pub fn rewrite_for_listener(&self, sender_session: u32) -> VoicePacket<Clientbound> {
        let mut payload = BytesMut::with_capacity(self.payload.len() + 5);
        varint::encode(sender_session as u64, &mut payload);
        payload.put_slice(&self.payload);

        VoicePacket {
            codec: self.codec,
            target: 0,
            payload,
            _bound: std::marker::PhantomData,
        }
    }
}

impl VoicePacket<Clientbound> {
    pub fn ping(payload: BytesMut) -> Self {
        Self {
            codec: VoiceCodec::Ping,
            target: 0,
            payload,
            _bound: std::marker::PhantomData,
        }
    }

    /// Reconstructs an already-rewritten clientbound packet from its wire
    /// form, used by the cross-Edge voice plane (spec §4.9) to hand a
    /// relayed frame back to [`encode_voice_packet`]/per-listener
    /// encryption without re-deriving the sender prefix.
    pub fn from_wire(mut data: BytesMut) -> Result<Self, VoicePacketError> {
        if data.is_empty() {
            return Err(VoicePacketError::Empty);
        }

        let header = data.get_u8();
        let codec = VoiceCodec::from_type_bits(header >> 5);

        Ok(Self {
            codec,
            target: 0,
            payload: data,
            _bound: std::marker::PhantomData,
        })
    }
}

/// Serializes a clientbound voice packet into its 1-byte-header wire form,
/// the format both the UDP socket and the `UDPTunnel` frame payload share.
pub fn encode_voice_packet<Bound>(packet: &VoicePacket<Bound>, out: &mut BytesMut)
where
    VoicePacket<Bound>: HeaderBits,
{
    let header = (packet.header_codec().type_bits() << 5) | packet.header_target();
    out.put_u8(header);
    out.put_slice(&packet.payload);
}

pub trait HeaderBits {
    fn header_codec(&self) -> VoiceCodec;
    fn header_target(&self) -> u8;
}

impl HeaderBits for VoicePacket<ServerBound> {
    fn header_codec(&self) -> VoiceCodec {
        self.codec
    }
    fn header_target(&self) -> u8 {
        self.target
    }
}

impl HeaderBits for VoicePacket<Clientbound> {
    fn header_codec(&self) -> VoiceCodec {
        self.codec
    }
    fn header_target(&self) -> u8 {
        // Clientbound packets always carry target 0; the listener derives
        // context (whisper vs. normal) out-of-band, per spec.
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_header_bits() {
        // type=4 (opus), target=3
        let mut data = BytesMut::new();
        data.put_u8((4 << 5) | 3);
        varint::encode(42, &mut data);
        data.put_slice(b"frame");

        let packet = VoicePacket::<ServerBound>::decode(data).unwrap();
        assert_eq!(packet.codec, VoiceCodec::Opus);
        assert_eq!(packet.target, 3);
        assert_eq!(packet.peek_sequence().unwrap(), 42);
    }

    #[test]
    fn from_wire_round_trips_through_encode() {
        let mut data = BytesMut::new();
        data.put_u8((4 << 5) | 0);
        varint::encode(9, &mut data);
        data.put_slice(b"relayed");

        let packet = VoicePacket::<Clientbound>::from_wire(data).unwrap();
        assert_eq!(packet.codec, VoiceCodec::Opus);

        let mut out = BytesMut::new();
        encode_voice_packet(&packet, &mut out);
        assert_eq!(out[0], 0x80);
    }

    #[test]
    fn rewrite_prepends_session_and_zeroes_target() {
        let mut data = BytesMut::new();
        data.put_u8((4 << 5) | 0);
        varint::encode(5, &mut data);
        data.put_slice(b"opusframe");

        let packet = VoicePacket::<ServerBound>::decode(data).unwrap();
        let rewritten = packet.rewrite_for_listener(1);

        let mut out = BytesMut::new();
        encode_voice_packet(&rewritten, &mut out);

        assert_eq!(out[0], 0x80); // type=4<<5 == 0x80, target=0
        let mut cursor = BytesMut::from(&out[1..]).freeze();
        let session = varint::decode(&mut cursor).unwrap();
        assert_eq!(session, 1);
        let seq = varint::decode(&mut cursor).unwrap();
        assert_eq!(seq, 5);
        assert_eq!(&cursor[..], b"opusframe");
    }
}
