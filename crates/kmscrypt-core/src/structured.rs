//! Structured (format-preserving) pipeline, spec.md §4.7.
//!
//! `deconstruct`/`reconstruct` strip and restore the parts of a string that
//! never go through FF1 (fixed prefixes/suffixes, passthrough characters),
//! key-number embedding smuggles the FF1 key version into the high bits of
//! the first output character, and `encrypt`/`decrypt` glue those together
//! with [`crate::ff1::Ff1`] and [`crate::keymanager::KeyManager`].

use crate::bigint::{biguint_to_string, string_to_biguint};
use crate::cache::Cache;
use crate::context::Context;
use crate::dataset::{Dataset, RuleKind, StructuredConfig};
use crate::error::{Error, Result};
use crate::events::Action;
use crate::ff1::Ff1;
use crate::keymanager::{DecryptionLocator, KeyEntry, KeyManager};
use std::sync::Arc;

/// One reversible transformation applied during `deconstruct`, recorded so
/// `reconstruct` can undo them in reverse application order.
#[derive(Debug, Clone)]
enum Step {
    Prefix(String),
    Suffix(String),
    /// The full string as it stood just before passthrough characters were
    /// stripped out of it — used to restore them at their original positions.
    Passthrough(String),
}

#[derive(Debug, Clone)]
pub struct Deconstructed {
    steps: Vec<Step>,
    pub core: String,
}

impl Deconstructed {
    pub fn core_len(&self) -> usize {
        self.core.chars().count()
    }
}

/// Applies `cfg.passthrough_rules` in priority order, recording each step so
/// it can be undone. If no explicit `passthrough` rule fired and
/// `cfg.passthrough` is non-empty, the passthrough step still runs, last
/// (spec.md §4.7 "legacy default").
pub fn deconstruct(s: &str, cfg: &StructuredConfig) -> Deconstructed {
    let mut current: Vec<char> = s.chars().collect();
    let mut steps = Vec::new();
    let mut passthrough_applied = false;

    for rule in &cfg.passthrough_rules {
        match rule.kind {
            RuleKind::Prefix => {
                let k = rule.value.unwrap_or(0).max(0) as usize;
                let k = k.min(current.len());
                let prefix: String = current[..k].iter().collect();
                current = current[k..].to_vec();
                steps.push(Step::Prefix(prefix));
            }
            RuleKind::Suffix => {
                let k = rule.value.unwrap_or(0).max(0) as usize;
                let k = k.min(current.len());
                let split = current.len() - k;
                let suffix: String = current[split..].iter().collect();
                current.truncate(split);
                steps.push(Step::Suffix(suffix));
            }
            RuleKind::Passthrough => {
                let mask: String = current.iter().collect();
                current.retain(|c| !cfg.passthrough.contains(c));
                steps.push(Step::Passthrough(mask));
                passthrough_applied = true;
            }
        }
    }

    if !passthrough_applied && !cfg.passthrough.is_empty() {
        let mask: String = current.iter().collect();
        current.retain(|c| !cfg.passthrough.contains(c));
        steps.push(Step::Passthrough(mask));
    }

    Deconstructed { steps, core: current.into_iter().collect() }
}

/// Undoes `parts.steps` in reverse order, splicing `core_prime` (the
/// FF1-transformed core) back into its original shape.
pub fn reconstruct(core_prime: &str, parts: &Deconstructed, cfg: &StructuredConfig) -> String {
    let mut current: Vec<char> = core_prime.chars().collect();
    for step in parts.steps.iter().rev() {
        match step {
            Step::Passthrough(mask) => {
                let mut out = Vec::with_capacity(mask.chars().count());
                let mut rest = current.into_iter();
                for mc in mask.chars() {
                    if cfg.passthrough.contains(&mc) {
                        out.push(mc);
                    } else {
                        out.push(rest.next().expect("mask/core length mismatch in reconstruct"));
                    }
                }
                current = out;
            }
            Step::Suffix(suffix) => current.extend(suffix.chars()),
            Step::Prefix(prefix) => {
                let mut out: Vec<char> = prefix.chars().collect();
                out.extend(current);
                current = out;
            }
        }
    }
    current.into_iter().collect()
}

/// Embeds `key_number` into the high `msb_bits` bits of `s`'s first
/// character, in place. `s` must be non-empty and its first character must
/// belong to `alphabet`.
pub fn encode_key_number(s: &mut String, alphabet: &[char], key_number: u64, msb_bits: u32) -> Result<()> {
    let mut chars: Vec<char> = s.chars().collect();
    let first = *chars.first().ok_or_else(|| Error::InputInvalid("cannot embed key number into empty string".into()))?;
    let idx = alphabet
        .iter()
        .position(|&c| c == first)
        .ok_or_else(|| Error::InputInvalid(format!("character '{first}' not in output alphabet")))?;
    let shifted = idx as u64 + (key_number << msb_bits);
    if shifted as usize >= alphabet.len() {
        return Err(Error::FF1Overflow);
    }
    chars[0] = alphabet[shifted as usize];
    *s = chars.into_iter().collect();
    Ok(())
}

/// Extracts the key number from `s`'s first character and rewrites that
/// character back to its alphabet-valid (unshifted) form, in place, ready for
/// the big-integer alphabet translation that follows.
pub fn decode_key_number(s: &mut String, alphabet: &[char], msb_bits: u32) -> Result<u64> {
    let mut chars: Vec<char> = s.chars().collect();
    let first = *chars.first().ok_or_else(|| Error::InputInvalid("cannot decode key number from empty string".into()))?;
    let idx = alphabet
        .iter()
        .position(|&c| c == first)
        .ok_or_else(|| Error::InputInvalid(format!("character '{first}' not in output alphabet")))?;
    let key_number = (idx as u64) >> msb_bits;
    let restored = idx as u64 - (key_number << msb_bits);
    chars[0] = *alphabet.get(restored as usize).ok_or(Error::FF1Overflow)?;
    *s = chars.into_iter().collect();
    Ok(key_number)
}

/// Re-renders `s` (a string over `from`, radix `from.len()`) as an
/// equal-length string over `to`, treating both as positional numerals of the
/// same radix — spec.md §4.7's "big-integer-translate".
fn translate_alphabet(s: &str, from: &[char], to: &[char]) -> Result<String> {
    let len = s.chars().count();
    let n = string_to_biguint(s, from)?;
    biguint_to_string(n, to, len)
}

fn validate_core(core: &str, cfg: &StructuredConfig, dataset_name: &str) -> Result<()> {
    if let Some(bad) = core.chars().find(|c| !cfg.input_character_set.contains(c)) {
        return Err(Error::InputInvalid(format!("character '{bad}' not in input_character_set for dataset {dataset_name}")));
    }
    let len = core.chars().count();
    if len < cfg.min_input_length || len > cfg.max_input_length {
        return Err(Error::InputInvalid(format!(
            "input length {len} outside [{}, {}] for dataset {dataset_name}",
            cfg.min_input_length, cfg.max_input_length
        )));
    }
    Ok(())
}

/// Builds or reuses a cached FF1 object for `dataset`'s `key_number`. Reuse is
/// skipped when `key_caching.encrypt` is set (spec.md §9 "optimization gap,
/// not a requirement") since the raw key itself isn't cached plaintext in
/// that mode, so there would be nothing to safely retain across calls.
fn get_or_build_ff1(ctx: &Context, dataset: &Dataset, key_number: u64, key: &KeyEntry, cfg: &StructuredConfig) -> Result<Arc<Ff1>> {
    let cache_key = format!("{}-{}", dataset.name, key_number);
    let skip_cache = ctx.config.key_caching.encrypt;

    if !skip_cache {
        let hit = { let mut c: std::sync::MutexGuard<Cache> = ctx.cache.lock().unwrap(); c.ff1_objects.get(&cache_key) };
        if let Some(ff1) = hit {
            return Ok(ff1);
        }
    }

    let ff1 = Ff1::new(&key.raw_key, cfg.tweak.clone(), cfg.input_character_set.clone())?
        .with_verbose(ctx.config.logging.verbose);
    let ff1 = Arc::new(ff1);
    if !skip_cache {
        ctx.cache.lock().unwrap().ff1_objects.set(cache_key, ff1.clone(), None);
    }
    Ok(ff1)
}

fn encrypt_with_key(ctx: &Context, dataset: &Dataset, plaintext: &str, key: &KeyEntry) -> Result<String> {
    let cfg = dataset.config()?;
    let parts = deconstruct(plaintext, cfg);
    validate_core(&parts.core, cfg, &dataset.name)?;

    let ff1 = get_or_build_ff1(ctx, dataset, key.key_idx, key, cfg)?;
    let encrypted_core = ff1.encrypt(&parts.core)?;
    let mut rendered = translate_alphabet(&encrypted_core, &cfg.input_character_set, &cfg.output_character_set)?;
    encode_key_number(&mut rendered, &cfg.output_character_set, key.key_idx, cfg.msb_encoding_bits)?;
    Ok(reconstruct(&rendered, &parts, cfg))
}

pub fn encrypt(ctx: &Context, dataset: &Dataset, plaintext: &str) -> Result<String> {
    let key = KeyManager::get_encryption_key(ctx, dataset, false)?;
    let result = encrypt_with_key(ctx, dataset, plaintext, &key)?;
    record_event(ctx, dataset, Action::Encrypt, Some(key.key_idx));
    Ok(result)
}

pub fn decrypt(ctx: &Context, dataset: &Dataset, ciphertext: &str) -> Result<String> {
    let cfg = dataset.config()?;
    let parts = deconstruct(ciphertext, cfg);
    let mut core = parts.core.clone();
    let key_number = decode_key_number(&mut core, &cfg.output_character_set, cfg.msb_encoding_bits)?;

    let key = KeyManager::get_decryption_key(ctx, dataset, DecryptionLocator::KeyNumber(key_number))?;
    let translated = translate_alphabet(&core, &cfg.output_character_set, &cfg.input_character_set)?;
    let ff1 = get_or_build_ff1(ctx, dataset, key_number, &key, cfg)?;
    let plain_core = ff1.decrypt(&translated)?;
    record_event(ctx, dataset, Action::Decrypt, Some(key_number));
    Ok(reconstruct(&plain_core, &parts, cfg))
}

/// Produces one ciphertext per currently active key version for `dataset`,
/// so a caller can search encrypted storage without knowing which key
/// version a stored ciphertext used (spec.md §4.7, §8 scenario 3).
pub fn encrypt_for_search(ctx: &Context, dataset: &Dataset, plaintext: &str) -> Result<Vec<String>> {
    let keys = KeyManager::get_all_encryption_keys(ctx, std::slice::from_ref(&dataset.name))?;
    keys.into_iter()
        .filter(|(name, _)| name == &dataset.name)
        .map(|(_, key)| {
            let result = encrypt_with_key(ctx, dataset, plaintext, &key)?;
            record_event(ctx, dataset, Action::Encrypt, Some(key.key_idx));
            Ok(result)
        })
        .collect()
}

fn record_event(ctx: &Context, dataset: &Dataset, action: Action, key_number: Option<u64>) {
    let mut events = ctx.events.lock().unwrap();
    events.add_or_increment(dataset.name.clone(), dataset.group_name.clone(), action, "structured", key_number);
    if events.should_process() {
        let _ = events.process(ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::PassthroughRule;

    fn ssn_config() -> StructuredConfig {
        StructuredConfig {
            input_character_set: "0123456789".chars().collect(),
            output_character_set: "0123456789".chars().collect(),
            passthrough: vec!['-'],
            passthrough_rules: vec![],
            tweak: vec![0u8; 4],
            min_input_length: 9,
            max_input_length: 9,
            msb_encoding_bits: 3,
        }
    }

    #[test]
    fn deconstruct_reconstruct_round_trips_legacy_passthrough() {
        let cfg = ssn_config();
        let parts = deconstruct("123-45-6789", &cfg);
        assert_eq!(parts.core, "123456789");
        let back = reconstruct(&parts.core, &parts, &cfg);
        assert_eq!(back, "123-45-6789");
    }

    #[test]
    fn explicit_prefix_and_suffix_rules_round_trip() {
        let mut cfg = ssn_config();
        cfg.passthrough = vec![];
        cfg.passthrough_rules = vec![
            PassthroughRule { kind: RuleKind::Prefix, value: Some(2), priority: 0 },
            PassthroughRule { kind: RuleKind::Suffix, value: Some(1), priority: 1 },
        ];
        let parts = deconstruct("XY123456789Z", &cfg);
        assert_eq!(parts.core, "123456789");
        assert_eq!(reconstruct(&parts.core, &parts, &cfg), "XY123456789Z");
    }

    #[test]
    fn key_number_embedding_round_trips() {
        let alphabet: Vec<char> = "0123456789".chars().collect();
        let mut s = "5000000000".to_string();
        encode_key_number(&mut s, &alphabet, 3, 3).unwrap();
        let decoded = decode_key_number(&mut s, &alphabet, 3).unwrap();
        assert_eq!(decoded, 3);
        assert_eq!(s, "5000000000");
    }

    #[test]
    fn validate_core_rejects_out_of_alphabet_character() {
        let cfg = ssn_config();
        assert!(validate_core("12345678A", &cfg, "SSN").is_err());
    }

    #[test]
    fn validate_core_rejects_wrong_length() {
        let cfg = ssn_config();
        assert!(validate_core("12345", &cfg, "SSN").is_err());
    }

    #[test]
    fn translate_alphabet_is_identity_for_equal_alphabets() {
        let alphabet: Vec<char> = "0123456789".chars().collect();
        let out = translate_alphabet("123456789", &alphabet, &alphabet).unwrap();
        assert_eq!(out, "123456789");
    }
}
