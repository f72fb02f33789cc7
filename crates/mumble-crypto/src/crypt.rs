//! Per-session OCB2-AES128 crypto state: the symmetric key, both IV
//! counters, the replay-detection history, and the packet statistics
//! described in spec §4.1.

use bytes::{BufMut, BytesMut};
use mumble_proto::mumble::CryptSetup;
use rand::RngCore;
use thiserror::Error;

use crate::ocb2;

pub const KEY_LEN: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("packet shorter than the 4-byte crypto header")]
    TooShort,
    #[error("replayed or duplicate IV")]
    Replay,
    #[error("IV outside the acceptable reorder/loss window")]
    OutOfWindow,
    #[error("authentication tag mismatch")]
    TagMismatch,
}

/// Local and peer-reported packet statistics, mirroring the fields carried
/// in `Ping` messages.
#[derive(Debug, Clone, Default)]
pub struct CryptStats {
    pub good: u32,
    pub late: u32,
    pub lost: u32,
    pub resync: u32,
}

#[derive(Debug, Clone, Default)]
pub struct RemoteCryptStats {
    pub good: u32,
    pub late: u32,
    pub lost: u32,
    pub resync: u32,
}

pub struct CryptState {
    key: [u8; KEY_LEN],
    encrypt_iv: [u8; KEY_LEN],
    decrypt_iv: [u8; KEY_LEN],
    /// Indexed by the low IV byte; stores the second IV byte last accepted
    /// at that position, for O(1) replay rejection.
    decrypt_history: [u8; 256],
    pub stats: CryptStats,
    pub remote_stats: RemoteCryptStats,
}

impl Default for CryptState {
    fn default() -> Self {
        let mut key = [0u8; KEY_LEN];
        let mut encrypt_iv = [0u8; KEY_LEN];
        let mut decrypt_iv = [0u8; KEY_LEN];

        let mut rng = rand::thread_rng();
        rng.fill_bytes(&mut key);
        rng.fill_bytes(&mut encrypt_iv);
        rng.fill_bytes(&mut decrypt_iv);

        Self {
            key,
            encrypt_iv,
            decrypt_iv,
            decrypt_history: [0; 256],
            stats: CryptStats::default(),
            remote_stats: RemoteCryptStats::default(),
        }
    }
}

fn increment_iv(iv: &mut [u8; KEY_LEN]) {
    for byte in iv.iter_mut() {
        *byte = byte.wrapping_add(1);
        if *byte != 0 {
            break;
        }
    }
}

fn decrement_iv(iv: &mut [u8; KEY_LEN]) {
    for byte in iv.iter_mut() {
        let (next, borrow) = byte.overflowing_sub(1);
        *byte = next;
        if !borrow {
            break;
        }
    }
}

impl CryptState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets key and both IVs to fresh random values, as done after an
    /// unrecoverable desync (spec §4.3/4.4: `CryptSetup` with empty
    /// `client_nonce`, or the decrypt-side giving up after a long gap).
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn get_crypt_setup(&self) -> CryptSetup {
        let mut setup = CryptSetup::new();
        setup.set_key(self.key.to_vec());
        setup.set_server_nonce(self.encrypt_iv.to_vec());
        setup.set_client_nonce(self.decrypt_iv.to_vec());
        setup
    }

    /// Installs a client-provided decrypt nonce (non-empty `client_nonce`
    /// on an incoming `CryptSetup`), bumping the resync counter.
    pub fn set_decrypt_nonce(&mut self, nonce: &[u8]) {
        if nonce.len() == KEY_LEN {
            self.decrypt_iv.copy_from_slice(nonce);
            self.stats.resync += 1;
        }
    }

    pub fn encrypt_iv(&self) -> [u8; KEY_LEN] {
        self.encrypt_iv
    }

    /// Encrypts `plaintext`, returning a buffer of `plaintext.len() + 4`
    /// bytes: `iv_low_byte | tag[0..4] | ocb2_ciphertext`.
    pub fn encrypt(&mut self, plaintext: &[u8], dest: &mut BytesMut) {
        increment_iv(&mut self.encrypt_iv);

        let (cipher_text, tag) = ocb2::encrypt(&self.key, &self.encrypt_iv, plaintext);

        dest.reserve(plaintext.len() + 4);
        dest.put_u8(self.encrypt_iv[0]);
        dest.put_slice(&tag[..3]);
        dest.put_slice(&cipher_text);
    }

    /// Decrypts a packet produced by [`Self::encrypt`] on the peer side,
    /// applying the IV-window / replay logic from spec §4.1.
    pub fn decrypt(&mut self, packet: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if packet.len() < 4 {
            return Err(CryptoError::TooShort);
        }

        let iv_byte0 = packet[0];
        let saved_iv = self.decrypt_iv;
        let mut restore_after = false;
        let mut late_delta = 0u32;
        let mut lost_delta = 0u32;

        let expected = self.decrypt_iv[0].wrapping_add(1);

        if iv_byte0 == expected {
            increment_iv(&mut self.decrypt_iv);
        } else {
            let diff = signed_byte_diff(iv_byte0, expected);

            if (-30..0).contains(&diff) {
                // Late packet, already-advanced IV is further ahead; decode
                // against a reconstructed historical IV without advancing.
                let steps = (-diff) as u8;
                let mut temp = self.decrypt_iv;
                for _ in 0..steps {
                    decrement_iv(&mut temp);
                }
                self.decrypt_iv = temp;
                restore_after = true;
                late_delta = 1;
            } else if diff > 0 && diff < 128 {
                for _ in 0..diff {
                    increment_iv(&mut self.decrypt_iv);
                }
                lost_delta = (diff - 1) as u32;
            } else {
                return Err(CryptoError::OutOfWindow);
            }
        }

        let hist_index = self.decrypt_iv[0] as usize;
        if self.decrypt_history[hist_index] == self.decrypt_iv[1] {
            self.decrypt_iv = saved_iv;
            return Err(CryptoError::Replay);
        }

        let mut tag = [0u8; ocb2::BLOCK_SIZE];
        tag[..3].copy_from_slice(&packet[1..4]);

        let (plaintext, valid) = ocb2::decrypt(&self.key, &self.decrypt_iv, &packet[4..], &tag);

        if !valid {
            self.decrypt_iv = saved_iv;
            return Err(CryptoError::TagMismatch);
        }

        self.decrypt_history[hist_index] = self.decrypt_iv[1];
        self.stats.good += 1;
        self.stats.late += late_delta;
        self.stats.lost += lost_delta;

        if restore_after {
            self.decrypt_iv = saved_iv;
        }

        Ok(plaintext)
    }
}

/// Signed difference `a - b` over a byte counter, mapped into `-128..=127`
/// so that near values wrap correctly across the 256-counter boundary.
fn signed_byte_diff(a: u8, b: u8) -> i32 {
    let raw = a as i32 - b as i32;
    if raw > 127 {
        raw - 256
    } else if raw < -128 {
        raw + 256
    } else {
        raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback_pair() -> (CryptState, CryptState) {
        let sender = CryptState::default();
        let mut receiver = CryptState::default();
        receiver.key = sender.key;
        receiver.decrypt_iv = sender.encrypt_iv;
        (sender, receiver)
    }

    #[test]
    fn round_trip_is_valid_and_length_grows_by_four() {
        let (mut sender, mut receiver) = loopback_pair();
        let plain = b"opus-frame-payload".to_vec();

        let mut out = BytesMut::new();
        sender.encrypt(&plain, &mut out);
        assert_eq!(out.len(), plain.len() + 4);

        let decoded = receiver.decrypt(&out).unwrap();
        assert_eq!(decoded, plain);
    }

    #[test]
    fn replay_of_same_packet_is_rejected() {
        let (mut sender, mut receiver) = loopback_pair();
        let plain = b"frame".to_vec();

        let mut out = BytesMut::new();
        sender.encrypt(&plain, &mut out);

        receiver.decrypt(&out).unwrap();
        assert_eq!(receiver.decrypt(&out), Err(CryptoError::Replay));
    }

    #[test]
    fn tampering_ciphertext_byte_is_rejected_without_advancing_iv() {
        let (mut sender, mut receiver) = loopback_pair();
        let plain = b"frame".to_vec();

        let mut out = BytesMut::new();
        sender.encrypt(&plain, &mut out);
        let iv_before = receiver.decrypt_iv;

        let mut tampered = out.to_vec();
        let last = tampered.len() - 1;
        tampered[last] ^= 0x01;

        assert_eq!(receiver.decrypt(&tampered), Err(CryptoError::TagMismatch));
        assert_eq!(receiver.decrypt_iv, iv_before);
    }

    #[test]
    fn out_of_order_within_window_is_accepted_as_late() {
        let (mut sender, mut receiver) = loopback_pair();

        let mut p1 = BytesMut::new();
        sender.encrypt(b"one", &mut p1);
        let mut p2 = BytesMut::new();
        sender.encrypt(b"two", &mut p2);

        // Deliver p2 first, then p1 late.
        receiver.decrypt(&p2).unwrap();
        let iv_after_p2 = receiver.decrypt_iv;

        let decoded = receiver.decrypt(&p1).unwrap();
        assert_eq!(decoded, b"one".to_vec());
        assert_eq!(receiver.stats.late, 1);
        // IV restored to the post-p2 value after processing the late packet.
        assert_eq!(receiver.decrypt_iv, iv_after_p2);
    }
}
