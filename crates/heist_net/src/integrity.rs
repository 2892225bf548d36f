//! Checksum envelope for datagrams.
//!
//! Every datagram is framed as `checksum (4 bytes, big-endian) || payload`,
//! where the checksum is a 32-bit FNV-1 hash of the payload. This detects
//! corruption and foreign traffic; it is not authentication, anyone on the
//! path can recompute it.

use crate::error::NetError;

/// FNV offset basis.
pub const FNV_OFFSET: u64 = 0xCBF2_9CE4_8422_2325;

/// FNV prime.
pub const FNV_PRIME: u64 = 0x0000_0100_0000_01B3;

/// Size of the checksum header in bytes.
pub const CHECKSUM_LEN: usize = 4;

/// 32-bit FNV-1 hash of `payload`.
///
/// Each byte is folded as `hash = ((hash * prime) ^ byte) & 0xFFFF_FFFF`,
/// starting from the 64-bit offset basis. An empty payload hashes to the
/// low 32 bits of the offset basis.
#[must_use]
pub fn fnv1_hash(payload: &[u8]) -> u32 {
    let hash = payload.iter().fold(FNV_OFFSET, |hash, &byte| {
        (hash.wrapping_mul(FNV_PRIME) ^ u64::from(byte)) & 0xFFFF_FFFF
    });
    (hash & 0xFFFF_FFFF) as u32
}

/// Frame `payload` with its checksum.
#[must_use]
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(CHECKSUM_LEN + payload.len());
    framed.extend_from_slice(&fnv1_hash(payload).to_be_bytes());
    framed.extend_from_slice(payload);
    framed
}

/// Verify a framed datagram and return its payload.
///
/// # Errors
///
/// Returns [`NetError::IntegrityFailure`] if the buffer is shorter than the
/// checksum or the checksum does not match.
pub fn decode(framed: &[u8]) -> Result<&[u8], NetError> {
    let Some((header, payload)) = framed.split_first_chunk::<CHECKSUM_LEN>() else {
        return Err(NetError::IntegrityFailure);
    };
    if u32::from_be_bytes(*header) == fnv1_hash(payload) {
        Ok(payload)
    } else {
        Err(NetError::IntegrityFailure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic() {
        assert_eq!(fnv1_hash(b"hello"), fnv1_hash(b"hello"));
        assert_ne!(fnv1_hash(b"hello!"), fnv1_hash(b"hello"));
    }

    #[test]
    fn test_empty_payload_hash() {
        assert_eq!(fnv1_hash(&[]), 0x8422_2325);
        assert_eq!(encode(&[]), vec![0x84, 0x22, 0x23, 0x25]);
    }

    #[test]
    fn test_single_byte_hash() {
        // (0xCBF29CE484222325 * 0x100000001B3) mod 2^32 = 0x8601B7DF
        let expected = 0x8601_B7DF_u32 ^ 0x61;
        assert_eq!(fnv1_hash(b"a"), expected);
    }

    #[test]
    fn test_decode_returns_payload() {
        let payloads: [&[u8]; 4] = [b"", b"\x05", b"hello world", &[0xFF; 64]];
        for payload in payloads {
            assert_eq!(decode(&encode(payload)).ok(), Some(payload));
        }
    }

    #[test]
    fn test_flipped_byte_fails() {
        let framed = encode(b"\x01\x02\x03\x04\x05");
        for i in CHECKSUM_LEN..framed.len() {
            let mut corrupted = framed.clone();
            corrupted[i] ^= 0x01;
            assert!(matches!(decode(&corrupted), Err(NetError::IntegrityFailure)));
        }
        let mut bad_header = framed;
        bad_header[0] ^= 0x80;
        assert!(decode(&bad_header).is_err());
    }

    #[test]
    fn test_short_buffers_fail() {
        for len in 0..CHECKSUM_LEN {
            assert!(decode(&vec![0; len]).is_err());
        }
    }
}
