//! Key fetch/unwrap/cache, spec.md §4.4.
//!
//! Every key the KMS hands back arrives with an `enc_private_key` (an RSA
//! private key PEM, itself passphrase-encrypted under the caller's `srsa`).
//! Unwrapping means: decrypt that PEM with `srsa`, then RSA-OAEP-decrypt the
//! wrapped data key with the resulting private key. `rsa`/`pkcs8` are pulled
//! in for this (enrichment — the teacher's own key-wrap path is X25519/ML-KEM,
//! not RSA, since QSFS is a hybrid PQ scheme rather than an RSA-wrapped one,
//! but `rsa` is the ecosystem's de facto RSA-OAEP implementation).

use crate::algorithm::Algorithm;
use crate::context::Context;
use crate::dataset::{Dataset, DatasetKind};
use crate::error::{Error, Result};
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use rsa::pkcs8::DecodePrivateKey;
use rsa::{Oaep, RsaPrivateKey};
use secrecy::ExposeSecret;
use serde::Deserialize;
use sha2::Sha256;
use std::time::Duration;
use tracing::debug;
use zeroize::Zeroize;

/// A key entry ready for use: `raw_key` is always the plaintext data key
/// regardless of whether the cache stores it wrapped (spec.md §4.4: "the
/// KeyEntry returned to the caller contains the plaintext raw key").
#[derive(Debug, Clone)]
pub struct KeyEntry {
    pub key_idx: u64,
    pub enc_data_key: Vec<u8>,
    pub enc_private_key: String,
    pub raw_key: Vec<u8>,
    pub algorithm: Algorithm,
    pub session: Option<String>,
    pub fingerprint: Option<String>,
    pub fragment: Option<bool>,
}

impl Drop for KeyEntry {
    fn drop(&mut self) {
        self.raw_key.zeroize();
    }
}

/// The cached representation: `raw_key_material` is plaintext when
/// `key_caching.encrypt == false` (unwrapped once at cache time) and still
/// RSA-OAEP-wrapped otherwise (unwrapped on every read).
#[derive(Debug, Clone)]
pub struct CachedKey {
    key_idx: u64,
    enc_data_key: Vec<u8>,
    enc_private_key: String,
    raw_key_material: Vec<u8>,
    already_plain: bool,
    algorithm: Algorithm,
    session: Option<String>,
    fingerprint: Option<String>,
    fragment: Option<bool>,
}

impl Drop for CachedKey {
    fn drop(&mut self) {
        self.raw_key_material.zeroize();
    }
}

impl CachedKey {
    fn resolve(&self, srsa: &str) -> Result<KeyEntry> {
        let raw_key = if self.already_plain {
            self.raw_key_material.clone()
        } else {
            unwrap_rsa_oaep(&self.enc_private_key, srsa, &self.raw_key_material)?
        };
        Ok(KeyEntry {
            key_idx: self.key_idx,
            enc_data_key: self.enc_data_key.clone(),
            enc_private_key: self.enc_private_key.clone(),
            raw_key,
            algorithm: self.algorithm,
            session: self.session.clone(),
            fingerprint: self.fingerprint.clone(),
            fragment: self.fragment,
        })
    }
}

// `CachedKey` is what actually lives in `Cache::keys`; `KeyEntry` (with a
// plaintext key) is re-derived on every read via `resolve`. We keep the cache
// bucket typed over `CachedKey` to avoid ever storing a plaintext key for
// longer than necessary when `key_caching.encrypt` is set.

fn unwrap_rsa_oaep(enc_private_key_pem: &str, srsa: &str, wrapped: &[u8]) -> Result<Vec<u8>> {
    let private_key = RsaPrivateKey::from_pkcs8_encrypted_pem(enc_private_key_pem, srsa.as_bytes())
        .map_err(|e| Error::Unwrap(format!("decrypting private key PEM: {e}")))?;
    let padding = Oaep::new::<Sha256>();
    private_key
        .decrypt(padding, wrapped)
        .map_err(|e| Error::Unwrap(format!("RSA-OAEP unwrap: {e}")))
}

#[derive(Deserialize)]
struct SecurityModel {
    algorithm: Option<String>,
    #[serde(default)]
    enable_data_fragmentation: bool,
}

#[derive(Deserialize)]
struct EncryptionKeyResponse {
    encrypted_data_key: Option<String>,
    encrypted_private_key: String,
    wrapped_data_key: String,
    encryption_session: Option<String>,
    key_fingerprint: Option<String>,
    security_model: Option<SecurityModel>,
}

#[derive(Deserialize)]
struct DecryptionKeyResponse {
    encrypted_private_key: String,
    wrapped_data_key: String,
    encryption_session: Option<String>,
    key_fingerprint: Option<String>,
}

#[derive(Deserialize)]
struct FpeKeyResponse {
    key_number: u64,
    encrypted_private_key: String,
    wrapped_data_key: String,
}

#[derive(Deserialize)]
struct DefKeysDataset {
    #[allow(dead_code)]
    ffs: Option<String>,
    encrypted_private_key: String,
    keys: std::collections::BTreeMap<String, String>,
}

/// Discriminates which lookup a decryption request uses to find a cached
/// entry/KMS record: the wrapped data key for unstructured ciphertext, or the
/// embedded key number for structured datasets.
pub enum DecryptionLocator {
    EncDataKey(Vec<u8>),
    KeyNumber(u64),
}

pub struct KeyManager;

impl KeyManager {
    pub fn get_encryption_key(ctx: &Context, dataset: &Dataset, no_cache: bool) -> Result<KeyEntry> {
        let caching_enabled = caching_enabled_for(ctx, dataset);
        let default_key = format!("{}-keys-default", dataset.name);

        if !no_cache && caching_enabled {
            if let Some(cached) = ctx.cache.lock().unwrap().keys.get(&default_key) {
                debug!(dataset = %dataset.name, "encryption key cache hit (default alias)");
                return cached.resolve(ctx.credentials.srsa.expose_secret());
            }
        }

        let (cached, cache_key) = match dataset.kind {
            DatasetKind::Unstructured => {
                let url = format!("{}/api/v0/encryption/key", ctx.credentials.host);
                let resp = ctx.http.post(&url, br#"{"uses":1}"#, "application/json")?;
                if !resp.success() {
                    return Err(kms_error(&resp));
                }
                let wire: EncryptionKeyResponse = serde_json::from_slice(&resp.content)?;
                let enc_data_key = wire
                    .encrypted_data_key
                    .clone()
                    .ok_or_else(|| Error::Kms { status: resp.status, body: "missing encrypted_data_key".into() })?;
                let enc_data_key_bytes = B64.decode(enc_data_key.as_bytes())?;
                let algorithm = wire
                    .security_model
                    .as_ref()
                    .and_then(|s| s.algorithm.as_deref())
                    .map(Algorithm::from_name)
                    .transpose()?
                    .unwrap_or(Algorithm::Aes256Gcm);
                let fragment = wire.security_model.as_ref().map(|s| s.enable_data_fragmentation);
                let wrapped = B64.decode(wire.wrapped_data_key.as_bytes())?;
                let cache_key = format!("{}-keys-{}", dataset.name, md5_hex(enc_data_key.as_bytes()));
                let cached = build_cached(
                    ctx,
                    0,
                    enc_data_key_bytes,
                    wire.encrypted_private_key,
                    wrapped,
                    algorithm,
                    wire.encryption_session,
                    wire.key_fingerprint,
                    fragment,
                )?;
                (cached, cache_key)
            }
            DatasetKind::Structured => {
                let url = format!(
                    "{}/api/v0/fpe/key?papi={}&ffs_name={}",
                    ctx.credentials.host, ctx.credentials.papi, dataset.name
                );
                let resp = ctx.http.get(&url)?;
                if !resp.success() {
                    return Err(kms_error(&resp));
                }
                let wire: FpeKeyResponse = serde_json::from_slice(&resp.content)?;
                let wrapped = B64.decode(wire.wrapped_data_key.as_bytes())?;
                let cache_key = format!(
                    "{}-keys-{}",
                    dataset.name,
                    md5_hex(B64.encode(wire.key_number.to_string()).as_bytes())
                );
                let cached = build_cached(
                    ctx,
                    wire.key_number,
                    Vec::new(),
                    wire.encrypted_private_key,
                    wrapped,
                    Algorithm::Ff1,
                    None,
                    None,
                    None,
                )?;
                (cached, cache_key)
            }
        };

        if caching_enabled {
            let ttl = Duration::from_secs(ctx.config.key_caching.ttl_seconds);
            let mut cache = ctx.cache.lock().unwrap();
            cache.keys.set(cache_key.clone(), cached.clone(), Some(ttl));
            if !no_cache {
                cache.keys.copy(&cache_key, default_key, Some(ttl));
            }
        }

        cached.resolve(ctx.credentials.srsa.expose_secret())
    }

    pub fn get_decryption_key(ctx: &Context, dataset: &Dataset, locator: DecryptionLocator) -> Result<KeyEntry> {
        let caching_enabled = caching_enabled_for(ctx, dataset);

        let cache_key = match &locator {
            DecryptionLocator::EncDataKey(bytes) => {
                format!("{}-keys-{}", dataset.name, md5_hex(B64.encode(bytes).as_bytes()))
            }
            DecryptionLocator::KeyNumber(n) => {
                format!("{}-keys-{}", dataset.name, md5_hex(B64.encode(n.to_string()).as_bytes()))
            }
        };

        if caching_enabled {
            if let Some(cached) = ctx.cache.lock().unwrap().keys.get(&cache_key) {
                debug!(dataset = %dataset.name, "decryption key cache hit");
                return cached.resolve(ctx.credentials.srsa.expose_secret());
            }
        }

        let cached = match locator {
            DecryptionLocator::EncDataKey(enc_data_key) => {
                let url = format!("{}/api/v0/decryption/key", ctx.credentials.host);
                let body = serde_json::json!({ "encrypted_data_key": B64.encode(&enc_data_key) });
                let resp = ctx.http.post(&url, body.to_string().as_bytes(), "application/json")?;
                if !resp.success() {
                    return Err(kms_error(&resp));
                }
                let wire: DecryptionKeyResponse = serde_json::from_slice(&resp.content)?;
                let wrapped = B64.decode(wire.wrapped_data_key.as_bytes())?;
                build_cached(
                    ctx,
                    0,
                    enc_data_key,
                    wire.encrypted_private_key,
                    wrapped,
                    Algorithm::Aes256Gcm,
                    wire.encryption_session,
                    wire.key_fingerprint,
                    None,
                )?
            }
            DecryptionLocator::KeyNumber(key_number) => {
                let url = format!(
                    "{}/api/v0/fpe/key?papi={}&ffs_name={}&key_number={}",
                    ctx.credentials.host, ctx.credentials.papi, dataset.name, key_number
                );
                let resp = ctx.http.get(&url)?;
                if !resp.success() {
                    return Err(kms_error(&resp));
                }
                let wire: FpeKeyResponse = serde_json::from_slice(&resp.content)?;
                let wrapped = B64.decode(wire.wrapped_data_key.as_bytes())?;
                build_cached(ctx, wire.key_number, Vec::new(), wire.encrypted_private_key, wrapped, Algorithm::Ff1, None, None, None)?
            }
        };

        if caching_enabled {
            let ttl = Duration::from_secs(ctx.config.key_caching.ttl_seconds);
            ctx.cache.lock().unwrap().keys.set(cache_key, cached.clone(), Some(ttl));
        }

        cached.resolve(ctx.credentials.srsa.expose_secret())
    }

    /// Fetches every active key version for a set of structured datasets in
    /// one call, used by `encryptForSearch` and `primeKeyCache`.
    pub fn get_all_encryption_keys(ctx: &Context, dataset_names: &[String]) -> Result<Vec<(String, KeyEntry)>> {
        if dataset_names.is_empty() {
            return Ok(Vec::new());
        }
        let joined = dataset_names.join(",");
        let url = format!(
            "{}/api/v0/fpe/def_keys?papi={}&ffs_name={}",
            ctx.credentials.host, ctx.credentials.papi, joined
        );
        let resp = ctx.http.get(&url)?;
        if !resp.success() {
            return Err(kms_error(&resp));
        }
        let wire: std::collections::BTreeMap<String, DefKeysDataset> = serde_json::from_slice(&resp.content)?;

        let caching_enabled = ctx.config.key_caching.structured;
        let ttl = Duration::from_secs(ctx.config.key_caching.ttl_seconds);
        let mut out = Vec::new();

        for (dataset_name, entry) in wire {
            for (key_number_str, wrapped_b64) in entry.keys {
                let key_number: u64 = key_number_str
                    .parse()
                    .map_err(|_| Error::Kms { status: resp.status, body: format!("bad key number {key_number_str}") })?;
                let wrapped = B64.decode(wrapped_b64.as_bytes())?;
                let cached = build_cached(
                    ctx,
                    key_number,
                    Vec::new(),
                    entry.encrypted_private_key.clone(),
                    wrapped,
                    Algorithm::Ff1,
                    None,
                    None,
                    None,
                )?;
                if caching_enabled {
                    let cache_key = format!(
                        "{}-keys-{}",
                        dataset_name,
                        md5_hex(B64.encode(key_number.to_string()).as_bytes())
                    );
                    ctx.cache.lock().unwrap().keys.set(cache_key, cached.clone(), Some(ttl));
                }
                out.push((dataset_name.clone(), cached.resolve(ctx.credentials.srsa.expose_secret())?));
            }
        }
        Ok(out)
    }

    /// Optional usage callback (spec.md §6.1 PATCH endpoint); best-effort, no
    /// response dependence.
    pub fn report_usage(ctx: &Context, fingerprint: &str, session: &str, uses: u64) {
        let url = format!("{}/api/v0/decryption/key/{}/{}", ctx.credentials.host, fingerprint, session);
        let body = serde_json::json!({ "uses": uses });
        let _ = ctx.http.patch(&url, body.to_string().as_bytes(), "application/json");
    }
}

#[allow(clippy::too_many_arguments)]
fn build_cached(
    ctx: &Context,
    key_idx: u64,
    enc_data_key: Vec<u8>,
    enc_private_key: String,
    wrapped_raw_key: Vec<u8>,
    algorithm: Algorithm,
    session: Option<String>,
    fingerprint: Option<String>,
    fragment: Option<bool>,
) -> Result<CachedKey> {
    if ctx.config.key_caching.encrypt {
        Ok(CachedKey {
            key_idx,
            enc_data_key,
            enc_private_key,
            raw_key_material: wrapped_raw_key,
            already_plain: false,
            algorithm,
            session,
            fingerprint,
            fragment,
        })
    } else {
        let plain = unwrap_rsa_oaep(&enc_private_key, ctx.credentials.srsa.expose_secret(), &wrapped_raw_key)?;
        Ok(CachedKey {
            key_idx,
            enc_data_key,
            enc_private_key,
            raw_key_material: plain,
            already_plain: true,
            algorithm,
            session,
            fingerprint,
            fragment,
        })
    }
}

fn caching_enabled_for(ctx: &Context, dataset: &Dataset) -> bool {
    match dataset.kind {
        DatasetKind::Structured => ctx.config.key_caching.structured,
        DatasetKind::Unstructured => ctx.config.key_caching.unstructured,
    }
}

fn kms_error(resp: &crate::http::HttpResponse) -> Error {
    Error::Kms { status: resp.status, body: resp.text().unwrap_or_default() }
}

fn md5_hex(bytes: &[u8]) -> String {
    use md5::{Digest, Md5};
    let digest = Md5::digest(bytes);
    hex::encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_hex_is_stable() {
        assert_eq!(md5_hex(b"abc"), "900150983cd24fb0d6963f7d28e17f72");
    }
}
