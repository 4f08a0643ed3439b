//! Client-side cryptography against a remote key-management service: AEAD
//! encryption of arbitrary bytes, and NIST SP 800-38G (FF1) format-preserving
//! encryption of strings scoped to named datasets.
//!
//! [`Encryption`] is the top-level entry point; everything else is reachable
//! through it or through an explicit [`Context`] for callers who want to drive
//! [`structured`]/[`unstructured`] directly.

pub mod algorithm;
pub mod bigint;
pub mod cache;
pub mod config;
pub mod context;
pub mod credentials;
pub mod dataset;
pub mod error;
pub mod events;
pub mod ff1;
pub mod header;
pub mod http;
pub mod keymanager;
pub mod structured;
pub mod unstructured;

pub use algorithm::Algorithm;
pub use config::Config;
pub use context::Context;
pub use credentials::Credentials;
pub use dataset::{Dataset, DatasetManager, DatasetRef};
pub use error::{Error, Result};
pub use keymanager::KeyManager;
pub use unstructured::{PiecewiseOpen, PiecewiseSeal};

/// Top-level facade, spec.md §2 "Facade": `encrypt`/`decrypt` dispatch to the
/// structured or unstructured pipeline depending on the resolved dataset kind,
/// and every successful call enqueues a usage event that `Drop` flushes on
/// teardown (spec.md §4.9 "at facade teardown").
pub struct Encryption {
    ctx: Context,
}

impl Encryption {
    pub fn new(credentials: Credentials, config: Config, transport: Box<dyn http::Transport>) -> Self {
        Encryption { ctx: Context::new(credentials, config, transport) }
    }

    #[cfg(feature = "http")]
    pub fn with_reqwest(credentials: Credentials, config: Config) -> Self {
        Encryption { ctx: Context::with_reqwest(credentials, config) }
    }

    /// Access to the underlying context, for callers who need to call
    /// [`structured`]/[`unstructured`] functions directly (e.g. to hold a
    /// [`Dataset`] across several calls without re-resolving it each time).
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn encrypt(&self, plaintext: &[u8], dataset: impl Into<DatasetRef>) -> Result<Vec<u8>> {
        let dataset = DatasetManager::get_dataset(&self.ctx, dataset)?;
        if dataset.is_structured() {
            let text = std::str::from_utf8(plaintext).map_err(|e| Error::InputInvalid(e.to_string()))?;
            structured::encrypt(&self.ctx, &dataset, text).map(String::into_bytes)
        } else {
            unstructured::seal(&self.ctx, &dataset, plaintext)
        }
    }

    pub fn decrypt(&self, ciphertext: &[u8], dataset: impl Into<DatasetRef>) -> Result<Vec<u8>> {
        let dataset = DatasetManager::get_dataset(&self.ctx, dataset)?;
        if dataset.is_structured() {
            let text = std::str::from_utf8(ciphertext).map_err(|e| Error::InputInvalid(e.to_string()))?;
            structured::decrypt(&self.ctx, &dataset, text).map(String::into_bytes)
        } else {
            unstructured::open(&self.ctx, &dataset, ciphertext)
        }
    }

    /// Encrypts `plaintext` under every active key version of a structured
    /// dataset, so the caller can search ciphertext encrypted under an
    /// earlier key version (spec.md §4.4/§4.7 `encryptForSearch`).
    pub fn encrypt_for_search(&self, plaintext: &str, dataset: impl Into<DatasetRef>) -> Result<Vec<String>> {
        let dataset = DatasetManager::get_dataset(&self.ctx, dataset)?;
        structured::encrypt_for_search(&self.ctx, &dataset, plaintext)
    }

    /// Warms the key cache for a batch of structured datasets ahead of time
    /// (spec.md §4.4 `get_all_encryption_keys`, "used by ... primeKeyCache").
    pub fn prime_key_cache(&self, dataset_names: &[String]) -> Result<()> {
        KeyManager::get_all_encryption_keys(&self.ctx, dataset_names)?;
        Ok(())
    }

    /// Attaches caller-supplied metadata to every usage event reported from
    /// here on (spec.md §4.9 `add_user_metadata`).
    pub fn add_reporting_user_metadata(&self, json: &str) -> Result<()> {
        self.ctx.events.lock().unwrap().add_user_metadata(json)
    }

    /// Begins a piecewise seal; only unstructured datasets support it
    /// (spec.md §4.8, §1 Non-goals).
    pub fn begin_seal(&self, dataset: impl Into<DatasetRef>) -> Result<PiecewiseSeal<'_>> {
        let dataset = DatasetManager::get_dataset(&self.ctx, dataset)?;
        if dataset.is_structured() {
            return Err(Error::State("piecewise encryption is unstructured-only".into()));
        }
        Ok(PiecewiseSeal::new(&self.ctx, dataset))
    }

    pub fn begin_open(&self, dataset: impl Into<DatasetRef>) -> Result<PiecewiseOpen<'_>> {
        let dataset = DatasetManager::get_dataset(&self.ctx, dataset)?;
        if dataset.is_structured() {
            return Err(Error::State("piecewise decryption is unstructured-only".into()));
        }
        Ok(PiecewiseOpen::new(&self.ctx, dataset))
    }
}

impl Drop for Encryption {
    fn drop(&mut self) {
        let mut events = self.ctx.events.lock().unwrap();
        let _ = events.process(&self.ctx);
    }
}
