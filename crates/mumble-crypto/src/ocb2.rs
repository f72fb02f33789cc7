//! OCB2 authenticated-encryption mode over AES-128-ECB, the block primitive
//! Mumble voice packets are encrypted with (spec §4.1). This is a direct
//! port of the classic Mumble `CryptState::ocb_encrypt`/`ocb_decrypt`
//! construction: a running XOR checksum of plaintext blocks, a per-block
//! "delta" derived by repeatedly doubling the AES encryption of the nonce
//! in GF(2^128), and a final tag block keyed by a second doubling (`S3`).

use aes::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;

pub const BLOCK_SIZE: usize = 16;

type Block = [u8; BLOCK_SIZE];

fn aes_encrypt_block(cipher: &Aes128, block: &mut Block) {
    let mut ga = GenericArray::clone_from_slice(block);
    cipher.encrypt_block(&mut ga);
    block.copy_from_slice(&ga);
}

fn aes_decrypt_block(cipher: &Aes128, block: &mut Block) {
    let mut ga = GenericArray::clone_from_slice(block);
    cipher.decrypt_block(&mut ga);
    block.copy_from_slice(&ga);
}

fn xor(dst: &mut Block, a: &Block, b: &Block) {
    for i in 0..BLOCK_SIZE {
        dst[i] = a[i] ^ b[i];
    }
}

fn xor_in_place(dst: &mut Block, b: &Block) {
    for i in 0..BLOCK_SIZE {
        dst[i] ^= b[i];
    }
}

/// Doubles `block` in GF(2^128) with the 0x87 reduction polynomial.
fn double(block: &mut Block) {
    let carry = block[0] >> 7;
    for i in 0..BLOCK_SIZE - 1 {
        block[i] = (block[i] << 1) | (block[i + 1] >> 7);
    }
    block[BLOCK_SIZE - 1] <<= 1;
    if carry == 1 {
        block[BLOCK_SIZE - 1] ^= 0x87;
    }
}

/// `S2(x) = double(x)`, `S3(x) = double(x) XOR x`.
fn s2(block: &mut Block) {
    double(block);
}

fn s3(block: &mut Block) {
    let before = *block;
    double(block);
    xor_in_place(block, &before);
}

/// Encrypts `plain` under `key`/`nonce`, writing ciphertext of the same
/// length into `out` (caller-sized) and a 16-byte authentication tag.
/// Returns `out.len() == plain.len()`.
pub fn encrypt(key: &[u8; BLOCK_SIZE], nonce: &Block, plain: &[u8]) -> (Vec<u8>, Block) {
    let cipher = Aes128::new(GenericArray::from_slice(key));

    let mut delta = *nonce;
    aes_encrypt_block(&cipher, &mut delta);

    let mut checksum: Block = [0; BLOCK_SIZE];
    let mut out = Vec::with_capacity(plain.len());

    let mut remaining = plain;
    while remaining.len() > BLOCK_SIZE {
        s2(&mut delta);
        let mut tmp: Block = [0; BLOCK_SIZE];
        tmp.copy_from_slice(&remaining[..BLOCK_SIZE]);
        let plain_block = tmp;

        xor_in_place(&mut tmp, &delta);
        aes_encrypt_block(&cipher, &mut tmp);
        xor_in_place(&mut tmp, &delta);
        out.extend_from_slice(&tmp);

        xor_in_place(&mut checksum, &plain_block);
        remaining = &remaining[BLOCK_SIZE..];
    }

    // Final (possibly partial) block.
    s2(&mut delta);
    let len = remaining.len();
    let mut length_block: Block = [0; BLOCK_SIZE];
    length_block[12..16].copy_from_slice(&((len as u32) * 8).to_be_bytes());
    xor_in_place(&mut length_block, &delta);

    let mut pad = length_block;
    aes_encrypt_block(&cipher, &mut pad);

    let mut padded_plain: Block = [0; BLOCK_SIZE];
    padded_plain[..len].copy_from_slice(remaining);
    padded_plain[len..].copy_from_slice(&pad[len..]);

    xor_in_place(&mut checksum, &padded_plain);

    let mut final_cipher = pad;
    xor_in_place(&mut final_cipher, &padded_plain);
    out.extend_from_slice(&final_cipher[..len]);

    s3(&mut delta);
    xor_in_place(&mut checksum, &delta);
    aes_encrypt_block(&cipher, &mut checksum);

    (out, checksum)
}

/// Inverse of [`encrypt`]. Returns the recovered plaintext and whether the
/// tag matched; callers must discard the plaintext when `false`.
pub fn decrypt(key: &[u8; BLOCK_SIZE], nonce: &Block, cipher_text: &[u8], tag: &Block) -> (Vec<u8>, bool) {
    let cipher = Aes128::new(GenericArray::from_slice(key));

    let mut delta = *nonce;
    aes_encrypt_block(&cipher, &mut delta);

    let mut checksum: Block = [0; BLOCK_SIZE];
    let mut out = Vec::with_capacity(cipher_text.len());

    let mut remaining = cipher_text;
    while remaining.len() > BLOCK_SIZE {
        s2(&mut delta);
        let mut block: Block = [0; BLOCK_SIZE];
        block.copy_from_slice(&remaining[..BLOCK_SIZE]);

        xor_in_place(&mut block, &delta);
        aes_decrypt_block(&cipher, &mut block);
        xor_in_place(&mut block, &delta);

        xor_in_place(&mut checksum, &block);
        out.extend_from_slice(&block);
        remaining = &remaining[BLOCK_SIZE..];
    }

    s2(&mut delta);
    let len = remaining.len();
    let mut length_block: Block = [0; BLOCK_SIZE];
    length_block[12..16].copy_from_slice(&((len as u32) * 8).to_be_bytes());
    xor_in_place(&mut length_block, &delta);

    let mut pad = length_block;
    aes_encrypt_block(&cipher, &mut pad);

    let mut plain_block: Block = [0; BLOCK_SIZE];
    for i in 0..len {
        plain_block[i] = remaining[i] ^ pad[i];
    }
    plain_block[len..].copy_from_slice(&pad[len..]);

    xor_in_place(&mut checksum, &plain_block);
    out.extend_from_slice(&plain_block[..len]);

    s3(&mut delta);
    xor_in_place(&mut checksum, &delta);
    aes_encrypt_block(&cipher, &mut checksum);

    let ok = constant_time_eq(&checksum, tag);

    (out, ok)
}

fn constant_time_eq(a: &Block, b: &Block) -> bool {
    let mut diff = 0u8;
    for i in 0..BLOCK_SIZE {
        diff |= a[i] ^ b[i];
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_arbitrary_length() {
        let key = [7u8; BLOCK_SIZE];
        let nonce = [3u8; BLOCK_SIZE];

        for len in [0usize, 1, 15, 16, 17, 40, 160] {
            let plain: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let (cipher_text, tag) = encrypt(&key, &nonce, &plain);
            assert_eq!(cipher_text.len(), plain.len());

            let (decoded, ok) = decrypt(&key, &nonce, &cipher_text, &tag);
            assert!(ok, "tag mismatch for len {len}");
            assert_eq!(decoded, plain);
        }
    }

    #[test]
    fn tampering_ciphertext_fails_tag() {
        let key = [1u8; BLOCK_SIZE];
        let nonce = [2u8; BLOCK_SIZE];
        let plain = b"short voice frame".to_vec();

        let (mut cipher_text, tag) = encrypt(&key, &nonce, &plain);
        cipher_text[0] ^= 0x01;

        let (_decoded, ok) = decrypt(&key, &nonce, &cipher_text, &tag);
        assert!(!ok);
    }
}
