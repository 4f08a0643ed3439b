//! Unstructured ciphertext header codec.
//!
//! Wire layout (version 0, big-endian), from spec §3 "Header":
//! ```text
//! u8 version=0 | u8 flags | u8 algo_id | u8 iv_len | u16 key_enc_len
//! | iv[iv_len] | key_enc[key_enc_len] | ciphertext || tag
//! ```
//! `flags` bit 0 (`AAD`) marks that the prefix through `key_enc` is the AEAD
//! associated data. Hand-rolled big-endian packing, not a serde wire format —
//! grounded on the teacher's `pae.rs`, which builds its own AAD framing by hand
//! rather than going through `postcard` for a frame a non-Rust server parses.

use crate::error::{Error, Result};

pub const AAD_FLAG: u8 = 0b0000_0001;
const FIXED_PREFIX_LEN: usize = 6; // version + flags + algo_id + iv_len + key_enc_len(u16)

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedHeader {
    pub version: u8,
    pub flags: u8,
    pub algo_id: u8,
    pub iv: Vec<u8>,
    pub key_enc: Vec<u8>,
    /// The raw bytes from `version` through the end of `key_enc` — this slice
    /// is the AEAD associated data when `flags & AAD_FLAG` is set.
    pub header_bytes: Vec<u8>,
}

impl DecodedHeader {
    pub fn has_aad(&self) -> bool {
        self.flags & AAD_FLAG != 0
    }
}

pub struct HeaderCodec;

impl HeaderCodec {
    pub fn encode(algo_id: u8, iv: &[u8], key_enc: &[u8], flags: u8) -> Result<Vec<u8>> {
        if iv.len() > u8::MAX as usize {
            return Err(Error::BadHeader(format!("iv too long: {}", iv.len())));
        }
        if key_enc.len() > u16::MAX as usize {
            return Err(Error::BadHeader(format!("key_enc too long: {}", key_enc.len())));
        }
        let mut out = Vec::with_capacity(FIXED_PREFIX_LEN + iv.len() + key_enc.len());
        out.push(0); // version
        out.push(flags);
        out.push(algo_id);
        out.push(iv.len() as u8);
        out.extend_from_slice(&(key_enc.len() as u16).to_be_bytes());
        out.extend_from_slice(iv);
        out.extend_from_slice(key_enc);
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<DecodedHeader> {
        if bytes.len() < FIXED_PREFIX_LEN {
            return Err(Error::BadHeader("truncated fixed prefix".into()));
        }
        let version = bytes[0];
        if version != 0 {
            return Err(Error::BadHeader(format!("unsupported version {version}")));
        }
        let flags = bytes[1];
        let algo_id = bytes[2];
        let iv_len = bytes[3] as usize;
        let key_enc_len = u16::from_be_bytes([bytes[4], bytes[5]]) as usize;

        let needed = FIXED_PREFIX_LEN + iv_len + key_enc_len;
        if bytes.len() < needed {
            return Err(Error::BadHeader(format!(
                "declared field widths ({iv_len}, {key_enc_len}) exceed available bytes"
            )));
        }

        let iv = bytes[FIXED_PREFIX_LEN..FIXED_PREFIX_LEN + iv_len].to_vec();
        let key_enc = bytes[FIXED_PREFIX_LEN + iv_len..needed].to_vec();
        let header_bytes = bytes[..needed].to_vec();

        Ok(DecodedHeader {
            version,
            flags,
            algo_id,
            iv,
            key_enc,
            header_bytes,
        })
    }
}
