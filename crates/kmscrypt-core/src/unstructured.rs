//! Unstructured AEAD pipeline, spec.md §4.8.
//!
//! `seal`/`open` are the single-shot primitives; `PiecewiseSeal`/`PiecewiseOpen`
//! wrap them in the `begin`/`update`/`end` shape spec.md §9 says to keep for API
//! compatibility while noting the underlying AEAD can't actually stream —
//! `update` is single-shot, and a second call is rejected rather than silently
//! accepted.

use crate::algorithm::Algorithm;
use crate::context::Context;
use crate::dataset::Dataset;
use crate::error::{Error, Result};
use crate::events::Action;
use crate::header::{DecodedHeader, HeaderCodec, AAD_FLAG};
use crate::keymanager::{DecryptionLocator, KeyEntry, KeyManager};
use aead::{Aead, Payload};
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::{Aes128Gcm, Aes256Gcm, KeyInit};
use rand::RngCore;

pub fn seal(ctx: &Context, dataset: &Dataset, plaintext: &[u8]) -> Result<Vec<u8>> {
    let key = KeyManager::get_encryption_key(ctx, dataset, false)?;
    let result = seal_with_key(&key, plaintext)?;
    record_event(ctx, dataset, Action::Encrypt);
    Ok(result)
}

pub fn open(ctx: &Context, dataset: &Dataset, ciphertext: &[u8]) -> Result<Vec<u8>> {
    let decoded = HeaderCodec::decode(ciphertext)?;
    let key = KeyManager::get_decryption_key(ctx, dataset, DecryptionLocator::EncDataKey(decoded.key_enc.clone()))?;
    let body = &ciphertext[decoded.header_bytes.len()..];
    let result = open_with_key(&decoded, body, &key)?;
    record_event(ctx, dataset, Action::Decrypt);
    Ok(result)
}

fn seal_with_key(key: &KeyEntry, plaintext: &[u8]) -> Result<Vec<u8>> {
    let algo = key.algorithm;
    let mut iv = vec![0u8; algo.iv_len()];
    rand::rngs::OsRng.fill_bytes(&mut iv);

    let flags = if algo.tag_len() > 0 { AAD_FLAG } else { 0 };
    let header = HeaderCodec::encode(algo.id(), &iv, &key.enc_data_key, flags)?;
    let aad: &[u8] = if flags & AAD_FLAG != 0 { &header } else { &[] };

    let ciphertext = aead_encrypt(algo, &key.raw_key, &iv, plaintext, aad)?;

    let mut out = header;
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn open_with_key(decoded: &DecodedHeader, body: &[u8], key: &KeyEntry) -> Result<Vec<u8>> {
    let algo = Algorithm::from_id(decoded.algo_id)?;
    let aad: &[u8] = if decoded.has_aad() { &decoded.header_bytes } else { &[] };
    aead_decrypt(algo, &key.raw_key, &decoded.iv, body, aad)
}

fn aead_encrypt(algo: Algorithm, key: &[u8], iv: &[u8], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    match algo {
        Algorithm::Aes256Gcm => {
            let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| Error::InputInvalid(e.to_string()))?;
            let nonce = GenericArray::from_slice(iv);
            cipher.encrypt(nonce, Payload { msg: plaintext, aad }).map_err(|_| Error::AuthFailure)
        }
        Algorithm::Aes128Gcm => {
            let cipher = Aes128Gcm::new_from_slice(key).map_err(|e| Error::InputInvalid(e.to_string()))?;
            let nonce = GenericArray::from_slice(iv);
            cipher.encrypt(nonce, Payload { msg: plaintext, aad }).map_err(|_| Error::AuthFailure)
        }
        Algorithm::Ff1 => Err(Error::InputInvalid("FF1 is not an AEAD algorithm".into())),
    }
}

fn aead_decrypt(algo: Algorithm, key: &[u8], iv: &[u8], ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    match algo {
        Algorithm::Aes256Gcm => {
            let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| Error::InputInvalid(e.to_string()))?;
            let nonce = GenericArray::from_slice(iv);
            cipher.decrypt(nonce, Payload { msg: ciphertext, aad }).map_err(|_| Error::AuthFailure)
        }
        Algorithm::Aes128Gcm => {
            let cipher = Aes128Gcm::new_from_slice(key).map_err(|e| Error::InputInvalid(e.to_string()))?;
            let nonce = GenericArray::from_slice(iv);
            cipher.decrypt(nonce, Payload { msg: ciphertext, aad }).map_err(|_| Error::AuthFailure)
        }
        Algorithm::Ff1 => Err(Error::InputInvalid("FF1 is not an AEAD algorithm".into())),
    }
}

fn record_event(ctx: &Context, dataset: &Dataset, action: Action) {
    let mut events = ctx.events.lock().unwrap();
    events.add_or_increment(dataset.name.clone(), dataset.group_name.clone(), action, "unstructured", None);
    if events.should_process() {
        let _ = events.process(ctx);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PiecewiseState {
    NotStarted,
    Begun,
    Updated,
    Ended,
}

/// `begin`/`update`/`end` wrapper over [`seal`], preserved for API shape per
/// spec.md §9 even though the single underlying `update` call does all the
/// real work.
pub struct PiecewiseSeal<'a> {
    ctx: &'a Context,
    dataset: Dataset,
    state: PiecewiseState,
    buffer: Option<Vec<u8>>,
}

impl<'a> PiecewiseSeal<'a> {
    pub fn new(ctx: &'a Context, dataset: Dataset) -> Self {
        PiecewiseSeal { ctx, dataset, state: PiecewiseState::NotStarted, buffer: None }
    }

    pub fn begin(&mut self) -> Result<()> {
        if self.state != PiecewiseState::NotStarted {
            return Err(Error::State("begin called more than once".into()));
        }
        self.state = PiecewiseState::Begun;
        Ok(())
    }

    pub fn update(&mut self, plaintext: &[u8]) -> Result<()> {
        match self.state {
            PiecewiseState::Begun => {
                self.buffer = Some(plaintext.to_vec());
                self.state = PiecewiseState::Updated;
                Ok(())
            }
            PiecewiseState::NotStarted => Err(Error::State("update called before begin".into())),
            PiecewiseState::Updated | PiecewiseState::Ended => {
                Err(Error::State("update called more than once; the underlying AEAD does not support streaming".into()))
            }
        }
    }

    pub fn end(&mut self) -> Result<Vec<u8>> {
        match self.state {
            PiecewiseState::Updated => {
                self.state = PiecewiseState::Ended;
                let data = self.buffer.take().unwrap_or_default();
                seal(self.ctx, &self.dataset, &data)
            }
            _ => Err(Error::State("end called before update".into())),
        }
    }
}

/// `begin`/`update`/`end` wrapper over [`open`], mirroring [`PiecewiseSeal`].
pub struct PiecewiseOpen<'a> {
    ctx: &'a Context,
    dataset: Dataset,
    state: PiecewiseState,
    buffer: Option<Vec<u8>>,
}

impl<'a> PiecewiseOpen<'a> {
    pub fn new(ctx: &'a Context, dataset: Dataset) -> Self {
        PiecewiseOpen { ctx, dataset, state: PiecewiseState::NotStarted, buffer: None }
    }

    pub fn begin(&mut self) -> Result<()> {
        if self.state != PiecewiseState::NotStarted {
            return Err(Error::State("begin called more than once".into()));
        }
        self.state = PiecewiseState::Begun;
        Ok(())
    }

    pub fn update(&mut self, ciphertext: &[u8]) -> Result<()> {
        match self.state {
            PiecewiseState::Begun => {
                self.buffer = Some(ciphertext.to_vec());
                self.state = PiecewiseState::Updated;
                Ok(())
            }
            PiecewiseState::NotStarted => Err(Error::State("update called before begin".into())),
            PiecewiseState::Updated | PiecewiseState::Ended => {
                Err(Error::State("update called more than once; the underlying AEAD does not support streaming".into()))
            }
        }
    }

    pub fn end(&mut self) -> Result<Vec<u8>> {
        match self.state {
            PiecewiseState::Updated => {
                self.state = PiecewiseState::Ended;
                let data = self.buffer.take().unwrap_or_default();
                open(self.ctx, &self.dataset, &data)
            }
            _ => Err(Error::State("end called before update".into())),
        }
    }
}
