//! Runtime configuration, spec.md §6.3.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimestampGranularity {
    Micros,
    Millis,
    Seconds,
    Minutes,
    Hours,
    HalfDays,
    Days,
}

impl Default for TimestampGranularity {
    fn default() -> Self {
        TimestampGranularity::Seconds
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventReportingConfig {
    pub minimum_count: u64,
    pub flush_interval_seconds: u64,
    pub trap_exceptions: bool,
    pub timestamp_granularity: TimestampGranularity,
    pub destroy_report_async: bool,
}

impl Default for EventReportingConfig {
    fn default() -> Self {
        EventReportingConfig {
            minimum_count: 5,
            flush_interval_seconds: 2,
            trap_exceptions: false,
            timestamp_granularity: TimestampGranularity::default(),
            destroy_report_async: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyCachingConfig {
    pub unstructured: bool,
    pub structured: bool,
    /// Store keys wrapped at rest; unwrap on every cache hit.
    pub encrypt: bool,
    pub ttl_seconds: u64,
}

impl Default for KeyCachingConfig {
    fn default() -> Self {
        KeyCachingConfig {
            unstructured: true,
            structured: true,
            encrypt: false,
            ttl_seconds: 1800,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub verbose: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig { verbose: false }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub event_reporting: EventReportingConfig,
    pub key_caching: KeyCachingConfig,
    pub dataset_caching: DatasetCachingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetCachingConfig(pub bool);

impl Default for DatasetCachingConfig {
    fn default() -> Self {
        DatasetCachingConfig(true)
    }
}

impl Config {
    pub fn from_json(s: &str) -> crate::error::Result<Self> {
        Ok(serde_json::from_str(s)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let c = Config::default();
        assert_eq!(c.event_reporting.minimum_count, 5);
        assert_eq!(c.event_reporting.flush_interval_seconds, 2);
        assert!(!c.event_reporting.trap_exceptions);
        assert!(!c.event_reporting.destroy_report_async);
        assert!(c.key_caching.unstructured);
        assert!(c.key_caching.structured);
        assert!(!c.key_caching.encrypt);
        assert_eq!(c.key_caching.ttl_seconds, 1800);
        assert!(c.dataset_caching.0);
        assert!(!c.logging.verbose);
    }

    #[test]
    fn parses_partial_json_with_defaults() {
        let c = Config::from_json(r#"{"key_caching": {"encrypt": true}}"#).unwrap();
        assert!(c.key_caching.encrypt);
        assert_eq!(c.key_caching.ttl_seconds, 1800);
    }
}
