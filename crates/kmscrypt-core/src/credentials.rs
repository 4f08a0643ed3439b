//! Credentials: `{papi, sapi, srsa, host}`, immutable once constructed.
//!
//! `papi` is the public API identifier (HMAC key id), `sapi` the HMAC signing
//! secret, `srsa` the passphrase protecting the RSA private key PEM blobs the
//! KMS hands back alongside wrapped data keys. Loaded from explicit fields,
//! environment variables, or an INI-style credentials file (spec.md §6.4); the
//! credentials-file *discovery* logic (searching `~/.kms/credentials` etc.) is
//! out of scope per spec.md §1 — only the `{profile} -> {papi,sapi,srsa,host}`
//! parse is implemented here.

use crate::error::{Error, Result};
use secrecy::Secret;
use std::collections::HashMap;

const DEFAULT_HOST: &str = "https://api.ubiqsecurity.com";

/// `srsa` is the passphrase guarding the RSA private keys the KMS hands back;
/// it's wrapped in [`Secret`] so it never prints via `{:?}` and is zeroized
/// on drop.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub papi: String,
    pub sapi: String,
    pub srsa: Secret<String>,
    pub host: String,
}

impl Credentials {
    pub fn new(papi: impl Into<String>, sapi: impl Into<String>, srsa: impl Into<String>, host: impl Into<String>) -> Result<Self> {
        let papi = papi.into();
        let sapi = sapi.into();
        let srsa = srsa.into();
        if papi.is_empty() || sapi.is_empty() || srsa.is_empty() {
            return Err(Error::Credentials("papi/sapi/srsa must be non-empty".into()));
        }
        Ok(Credentials { papi, sapi, srsa: Secret::new(srsa), host: normalize_host(host.into()) })
    }

    pub fn from_env() -> Result<Self> {
        let get = |name: &str| {
            std::env::var(name).map_err(|_| Error::Credentials(format!("missing env var {name}")))
        };
        let papi = get("UBIQ_ACCESS_KEY_ID")?;
        let sapi = get("UBIQ_SECRET_SIGNING_KEY")?;
        let srsa = get("UBIQ_SECRET_CRYPTO_ACCESS_KEY")?;
        let host = std::env::var("UBIQ_SERVER").unwrap_or_default();
        Credentials::new(papi, sapi, srsa, host)
    }

    /// Parses an INI-style credentials file:
    /// ```ini
    /// [default]
    /// ACCESS_KEY_ID = ...
    /// SECRET_SIGNING_KEY = ...
    /// SECRET_CRYPTO_ACCESS_KEY = ...
    /// SERVER = ...
    /// ```
    /// Keys are matched case-insensitively; `#`/`;` prefixed lines are comments.
    pub fn from_file(contents: &str, profile: &str) -> Result<Self> {
        let sections = parse_ini(contents);
        let section = sections
            .get(profile)
            .ok_or_else(|| Error::Credentials(format!("no [{profile}] section in credentials file")))?;

        let field = |names: &[&str]| -> Option<String> {
            for (k, v) in section {
                if names.iter().any(|n| n.eq_ignore_ascii_case(k)) {
                    return Some(v.clone());
                }
            }
            None
        };

        let papi = field(&["access_key_id"])
            .ok_or_else(|| Error::Credentials("missing ACCESS_KEY_ID".into()))?;
        let sapi = field(&["secret_signing_key"])
            .ok_or_else(|| Error::Credentials("missing SECRET_SIGNING_KEY".into()))?;
        let srsa = field(&["secret_crypto_access_key"])
            .ok_or_else(|| Error::Credentials("missing SECRET_CRYPTO_ACCESS_KEY".into()))?;
        let host = field(&["server"]).unwrap_or_default();

        Credentials::new(papi, sapi, srsa, host)
    }
}

/// Applies the host-normalization quirks noted in spec.md §9: an empty host
/// defaults to the public API; a "bare" host (no scheme) gets `https://`
/// prepended; an explicit `http://` host is preserved as-is.
fn normalize_host(host: String) -> String {
    let trimmed = host.trim();
    if trimmed.is_empty() {
        return DEFAULT_HOST.to_string();
    }
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.trim_end_matches('/').to_string()
    } else {
        format!("https://{}", trimmed.trim_end_matches('/'))
    }
}

fn parse_ini(contents: &str) -> HashMap<String, Vec<(String, String)>> {
    let mut sections: HashMap<String, Vec<(String, String)>> = HashMap::new();
    let mut current: Option<String> = None;

    for raw_line in contents.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if line.starts_with('[') && line.ends_with(']') {
            current = Some(line[1..line.len() - 1].trim().to_string());
            sections.entry(current.clone().unwrap()).or_default();
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            if let Some(section) = &current {
                sections
                    .entry(section.clone())
                    .or_default()
                    .push((key.trim().to_string(), value.trim().to_string()));
            }
        }
    }
    sections
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn normalizes_missing_host_to_default() {
        let c = Credentials::new("p", "s", "r", "").unwrap();
        assert_eq!(c.host, DEFAULT_HOST);
    }

    #[test]
    fn bare_host_gets_https_prefix() {
        let c = Credentials::new("p", "s", "r", "kms.example.com").unwrap();
        assert_eq!(c.host, "https://kms.example.com");
    }

    #[test]
    fn http_host_is_preserved() {
        let c = Credentials::new("p", "s", "r", "http://kms.local:8080").unwrap();
        assert_eq!(c.host, "http://kms.local:8080");
    }

    #[test]
    fn parses_ini_profile() {
        let ini = "\
[default]
ACCESS_KEY_ID = abc
SECRET_SIGNING_KEY = def
SECRET_CRYPTO_ACCESS_KEY = ghi
SERVER = https://example.com

[other]
ACCESS_KEY_ID = xyz
SECRET_SIGNING_KEY = uvw
SECRET_CRYPTO_ACCESS_KEY = rst
";
        let c = Credentials::from_file(ini, "default").unwrap();
        assert_eq!(c.papi, "abc");
        assert_eq!(c.sapi, "def");
        assert_eq!(c.srsa.expose_secret(), "ghi");
        assert_eq!(c.host, "https://example.com");

        let other = Credentials::from_file(ini, "other").unwrap();
        assert_eq!(other.papi, "xyz");
        assert_eq!(other.host, DEFAULT_HOST);
    }

    #[test]
    fn missing_profile_errors() {
        assert!(Credentials::from_file("[default]\n", "missing").is_err());
    }
}
