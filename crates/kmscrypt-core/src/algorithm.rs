//! Algorithm registry: names, numeric IDs, and key/IV/tag lengths.
//!
//! Mirrors the teacher's `SuiteId` enum-over-match-arms style (see the packaged
//! `qsfs-core` `suite.rs`): a small closed set of variants, looked up by numeric
//! id or case-insensitive name, never a runtime table.

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    Aes256Gcm,
    Aes128Gcm,
    Ff1,
}

impl Algorithm {
    pub const fn id(self) -> u8 {
        match self {
            Algorithm::Aes256Gcm => 0,
            Algorithm::Aes128Gcm => 1,
            Algorithm::Ff1 => 2,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Algorithm::Aes256Gcm => "AES256_GCM",
            Algorithm::Aes128Gcm => "AES128_GCM",
            Algorithm::Ff1 => "FF1",
        }
    }

    pub const fn key_len(self) -> usize {
        match self {
            Algorithm::Aes256Gcm => 32,
            Algorithm::Aes128Gcm => 16,
            Algorithm::Ff1 => 0,
        }
    }

    pub const fn iv_len(self) -> usize {
        match self {
            Algorithm::Aes256Gcm | Algorithm::Aes128Gcm => 12,
            Algorithm::Ff1 => 0,
        }
    }

    pub const fn tag_len(self) -> usize {
        match self {
            Algorithm::Aes256Gcm | Algorithm::Aes128Gcm => 16,
            Algorithm::Ff1 => 0,
        }
    }

    pub fn from_id(id: u8) -> Result<Self> {
        match id {
            0 => Ok(Algorithm::Aes256Gcm),
            1 => Ok(Algorithm::Aes128Gcm),
            2 => Ok(Algorithm::Ff1),
            other => Err(Error::InputInvalid(format!("unknown algorithm id {other}"))),
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        let norm = name.trim().to_ascii_uppercase().replace('-', "_");
        match norm.as_str() {
            "AES256_GCM" | "AES_256_GCM" => Ok(Algorithm::Aes256Gcm),
            "AES128_GCM" | "AES_128_GCM" => Ok(Algorithm::Aes128Gcm),
            "FF1" => Ok(Algorithm::Ff1),
            other => Err(Error::InputInvalid(format!("unknown algorithm name {other}"))),
        }
    }

    /// Picks the AES-GCM variant matching a raw key's length; used when the KMS
    /// response only carries key bytes and a `security_model.algorithm` hint.
    pub fn from_key_len(len: usize) -> Result<Self> {
        match len {
            32 => Ok(Algorithm::Aes256Gcm),
            16 => Ok(Algorithm::Aes128Gcm),
            other => Err(Error::InputInvalid(format!("unsupported key length {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_by_id() {
        for a in [Algorithm::Aes256Gcm, Algorithm::Aes128Gcm, Algorithm::Ff1] {
            assert_eq!(Algorithm::from_id(a.id()).unwrap(), a);
        }
    }

    #[test]
    fn name_lookup_is_case_insensitive() {
        assert_eq!(Algorithm::from_name("aes_256_gcm").unwrap(), Algorithm::Aes256Gcm);
        assert_eq!(Algorithm::from_name("AES-128-GCM").unwrap(), Algorithm::Aes128Gcm);
        assert_eq!(Algorithm::from_name("ff1").unwrap(), Algorithm::Ff1);
    }

    #[test]
    fn unknown_id_is_input_invalid() {
        assert!(matches!(Algorithm::from_id(99), Err(Error::InputInvalid(_))));
    }
}
