//! Rotating-XOR block cipher with the subtractive running checksum.
//!
//! A block body starts with two header bytes `e1 e2`. Their XOR seeds
//! the key, their little-endian word is the stored end checksum. Each
//! encrypted byte is XORed with the key, which then advances by 0x1F
//! (mod 256). The checksum accumulates by subtracting every plaintext
//! byte, wrapping at 16 bits.
//!
//! Only a prefix of the body is encrypted; the suffix is stored in the
//! clear. The boundary is not recorded in the container; it falls out
//! of already-decoded content, so decoding needs an unchecked full
//! first pass before the real, checksum-verified pass.

use crate::error::{Error, Result};

/// Key increment applied after every encrypted byte.
pub const KEY_STEP: u8 = 0x1F;

/// Size of the `e1 e2` checksum/key header.
pub const HEADER_SIZE: usize = 2;

/// Running checksum over a plaintext region: start at zero, subtract
/// every byte, wrap at 16 bits.
pub fn checksum(plain: &[u8]) -> u16 {
    plain
        .iter()
        .fold(0u16, |sum, &b| sum.wrapping_sub(b as u16))
}

/// Decrypts an entire block body as if all of it were encrypted,
/// without validating the checksum.
///
/// Used for the classification and map-size passes, which run before
/// the encrypted length is knowable. Bytes beyond the real boundary
/// come out as garbage; callers only look at the prefix.
pub fn decrypt_unchecked(body: &[u8]) -> Result<Vec<u8>> {
    if body.len() < HEADER_SIZE {
        return Err(Error::truncated(0, "block body shorter than xor header"));
    }
    let mut key = body[0] ^ body[1];
    let mut plain = Vec::with_capacity(body.len() - HEADER_SIZE);
    for &c in &body[HEADER_SIZE..] {
        plain.push(c ^ key);
        key = key.wrapping_add(KEY_STEP);
    }
    Ok(plain)
}

/// Decrypts the first `encrypted_len` content bytes of a block body and
/// verifies the running checksum against the stored header word; the
/// remaining bytes are passed through in the clear.
///
/// `body` includes the two header bytes; the returned plaintext does
/// not, so its length is `body.len() - 2` and `encrypted_len` indexes
/// into it directly.
pub fn decrypt(body: &[u8], encrypted_len: usize) -> Result<Vec<u8>> {
    if body.len() < HEADER_SIZE {
        return Err(Error::truncated(0, "block body shorter than xor header"));
    }
    let content = &body[HEADER_SIZE..];
    if encrypted_len > content.len() {
        return Err(Error::truncated(
            content.len(),
            format!("encrypted region claims {encrypted_len} bytes"),
        ));
    }

    let (e1, e2) = (body[0], body[1]);
    let expected = e1 as u16 | (e2 as u16) << 8;
    let mut key = e1 ^ e2;
    let mut sum = 0u16;

    let mut plain = Vec::with_capacity(content.len());
    for &c in &content[..encrypted_len] {
        let p = c ^ key;
        sum = sum.wrapping_sub(p as u16);
        key = key.wrapping_add(KEY_STEP);
        plain.push(p);
    }
    if sum != expected {
        return Err(Error::Checksum {
            offset: encrypted_len,
            expected,
            actual: sum,
        });
    }

    plain.extend_from_slice(&content[encrypted_len..]);
    Ok(plain)
}

/// Encrypts the first `encrypted_len` bytes of a plaintext block and
/// prepends the derived header.
///
/// The header is not free: the stored word must equal the checksum of
/// the encrypted plaintext, which in turn fixes the starting key as
/// `e1 ^ e2`. Re-encrypting unchanged plaintext therefore reproduces
/// the original cipher bytes exactly.
pub fn encrypt(plain: &[u8], encrypted_len: usize) -> Result<Vec<u8>> {
    if encrypted_len > plain.len() {
        return Err(Error::truncated(
            plain.len(),
            format!("encrypted region claims {encrypted_len} bytes"),
        ));
    }

    let sum = checksum(&plain[..encrypted_len]);
    let e1 = sum as u8;
    let e2 = (sum >> 8) as u8;
    let mut key = e1 ^ e2;

    let mut body = Vec::with_capacity(plain.len() + HEADER_SIZE);
    body.push(e1);
    body.push(e2);
    for &p in &plain[..encrypted_len] {
        body.push(p ^ key);
        key = key.wrapping_add(KEY_STEP);
    }
    body.extend_from_slice(&plain[encrypted_len..]);
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_full_block() {
        let plain: Vec<u8> = (0u16..300).map(|i| (i * 7) as u8).collect();
        let body = encrypt(&plain, plain.len()).unwrap();
        assert_eq!(body.len(), plain.len() + HEADER_SIZE);
        assert_eq!(decrypt(&body, plain.len()).unwrap(), plain);
    }

    #[test]
    fn round_trip_with_clear_suffix() {
        let plain = b"encrypted prefix....clear suffix".to_vec();
        let body = encrypt(&plain, 20).unwrap();
        // Suffix is stored verbatim.
        assert_eq!(&body[HEADER_SIZE + 20..], &plain[20..]);
        assert_eq!(decrypt(&body, 20).unwrap(), plain);
    }

    #[test]
    fn corrupted_cipher_byte_breaks_checksum() {
        let plain = vec![0x11u8; 64];
        let mut body = encrypt(&plain, 64).unwrap();
        body[10] ^= 0x40;
        match decrypt(&body, 64) {
            Err(Error::Checksum { expected, actual, .. }) => assert_ne!(expected, actual),
            other => panic!("expected checksum error, got {other:?}"),
        }
    }

    #[test]
    fn unchecked_prefix_matches_checked_decrypt() {
        let plain: Vec<u8> = (0u8..200).collect();
        let body = encrypt(&plain, 150).unwrap();
        let guess = decrypt_unchecked(&body).unwrap();
        assert_eq!(&guess[..150], &plain[..150]);
    }

    #[test]
    fn checksum_is_subtractive_and_wraps() {
        assert_eq!(checksum(&[]), 0);
        assert_eq!(checksum(&[1]), 0xFFFF);
        assert_eq!(checksum(&[0xFF, 0xFF]), 0xFE02);
    }

    #[test]
    fn header_word_stores_checksum_little_endian() {
        let plain = vec![3u8; 5];
        let body = encrypt(&plain, 5).unwrap();
        let stored = body[0] as u16 | (body[1] as u16) << 8;
        assert_eq!(stored, checksum(&plain));
    }

    #[test]
    fn empty_body_is_truncated() {
        assert!(matches!(decrypt(&[0x12], 0), Err(Error::Truncated { .. })));
    }
}
