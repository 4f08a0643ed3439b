//! Dataset definitions and the manager that fetches/caches them, spec.md §4.5.

use crate::context::Context;
use crate::error::{Error, Result};
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    Prefix,
    Suffix,
    Passthrough,
}

#[derive(Debug, Clone)]
pub struct PassthroughRule {
    pub kind: RuleKind,
    /// Number of characters for `Prefix`/`Suffix`; unused for `Passthrough`.
    pub value: Option<i64>,
    pub priority: i64,
}

#[derive(Debug, Clone)]
pub struct StructuredConfig {
    pub input_character_set: Vec<char>,
    pub output_character_set: Vec<char>,
    pub passthrough: Vec<char>,
    pub passthrough_rules: Vec<PassthroughRule>,
    pub tweak: Vec<u8>,
    pub min_input_length: usize,
    pub max_input_length: usize,
    pub msb_encoding_bits: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetKind {
    Structured,
    Unstructured,
}

#[derive(Debug, Clone)]
pub struct Dataset {
    pub name: String,
    pub group_name: String,
    pub kind: DatasetKind,
    pub config: Option<StructuredConfig>,
}

impl Dataset {
    pub fn unstructured(name: impl Into<String>) -> Self {
        let name = name.into();
        Dataset { group_name: name.clone(), name, kind: DatasetKind::Unstructured, config: None }
    }

    pub fn is_structured(&self) -> bool {
        self.kind == DatasetKind::Structured
    }

    pub fn config(&self) -> Result<&StructuredConfig> {
        self.config
            .as_ref()
            .ok_or_else(|| Error::DatasetInvalid(format!("dataset {} has no structured config", self.name)))
    }
}

/// What callers may pass to [`DatasetManager::get_dataset`]: either a name to
/// resolve, or an already-resolved `Dataset` passed through unchanged. This is
/// the REDESIGN FLAG §9 replacement for a runtime `isDataset` class-name check.
pub enum DatasetRef {
    Name(String),
    Resolved(Dataset),
}

impl From<&str> for DatasetRef {
    fn from(s: &str) -> Self {
        DatasetRef::Name(s.to_string())
    }
}

impl From<String> for DatasetRef {
    fn from(s: String) -> Self {
        DatasetRef::Name(s)
    }
}

impl From<Dataset> for DatasetRef {
    fn from(d: Dataset) -> Self {
        DatasetRef::Resolved(d)
    }
}

#[derive(Deserialize)]
struct WireRule {
    #[serde(rename = "type")]
    kind: String,
    value: Option<i64>,
    priority: i64,
}

#[derive(Deserialize)]
struct WireConfig {
    ffs_name: Option<String>,
    group_name: Option<String>,
    input_character_set: String,
    output_character_set: String,
    #[serde(default)]
    passthrough_character_set: String,
    #[serde(default)]
    passthrough_rules: Vec<WireRule>,
    tweak: String,
    min_input_length: usize,
    max_input_length: usize,
    #[serde(default)]
    msb_encoding_bits: u32,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

pub struct DatasetManager;

impl DatasetManager {
    pub fn get_dataset(ctx: &Context, dataset: impl Into<DatasetRef>) -> Result<Dataset> {
        match dataset.into() {
            DatasetRef::Resolved(d) => Ok(d),
            DatasetRef::Name(name) => {
                if name.is_empty() {
                    return Ok(Dataset::unstructured(name));
                }
                Self::fetch_or_cached(ctx, &name)
            }
        }
    }

    fn fetch_or_cached(ctx: &Context, name: &str) -> Result<Dataset> {
        if ctx.config.dataset_caching.0 {
            if let Some(d) = ctx.cache.lock().unwrap().datasets.get(name) {
                debug!(dataset = name, "dataset cache hit");
                return Ok(d);
            }
        }

        let url = format!("{}/api/v0/ffs?papi={}&ffs_name={}", ctx.credentials.host, ctx.credentials.papi, name);
        let resp = ctx.http.get(&url)?;

        let dataset = if resp.success() {
            let wire: WireConfig = serde_json::from_slice(&resp.content)?;
            parse_structured(name, wire)?
        } else {
            let body: std::result::Result<ErrorBody, _> = serde_json::from_slice(&resp.content);
            match body {
                Ok(ErrorBody { message: Some(m) }) if m.contains("Invalid Dataset name") => {
                    Dataset::unstructured(name)
                }
                _ => {
                    return Err(Error::DatasetInvalid(format!(
                        "ffs lookup for {name} failed with status {}",
                        resp.status
                    )))
                }
            }
        };

        if ctx.config.dataset_caching.0 {
            ctx.cache.lock().unwrap().datasets.set(name.to_string(), dataset.clone(), None);
        }
        Ok(dataset)
    }
}

fn parse_structured(name: &str, wire: WireConfig) -> Result<Dataset> {
    let input_character_set: Vec<char> = wire.input_character_set.chars().collect();
    let output_character_set: Vec<char> = wire.output_character_set.chars().collect();
    if output_character_set.len() != input_character_set.len() {
        return Err(Error::DatasetInvalid(format!(
            "dataset {name}: output_character_set length {} != input_character_set length {}",
            output_character_set.len(),
            input_character_set.len()
        )));
    }

    let mut passthrough_rules: Vec<PassthroughRule> = wire
        .passthrough_rules
        .into_iter()
        .map(|r| {
            let kind = match r.kind.as_str() {
                "prefix" => RuleKind::Prefix,
                "suffix" => RuleKind::Suffix,
                "passthrough" => RuleKind::Passthrough,
                other => return Err(Error::DatasetInvalid(format!("unknown passthrough rule type {other}"))),
            };
            Ok(PassthroughRule { kind, value: r.value, priority: r.priority })
        })
        .collect::<Result<Vec<_>>>()?;
    passthrough_rules.sort_by_key(|r| r.priority);

    let tweak = B64.decode(wire.tweak.as_bytes())?;

    Ok(Dataset {
        name: name.to_string(),
        group_name: wire.group_name.or(wire.ffs_name).unwrap_or_else(|| name.to_string()),
        kind: DatasetKind::Structured,
        config: Some(StructuredConfig {
            input_character_set,
            output_character_set,
            passthrough: wire.passthrough_character_set.chars().collect(),
            passthrough_rules,
            tweak,
            min_input_length: wire.min_input_length,
            max_input_length: wire.max_input_length,
            msb_encoding_bits: wire.msb_encoding_bits,
        }),
    })
}
