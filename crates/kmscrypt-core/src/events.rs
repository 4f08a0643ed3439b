//! Usage-event aggregation and batched flush, spec.md §4.9.
//!
//! Every encrypt/decrypt call contributes one event keyed by an identity
//! tuple; events sharing a tuple merge by summing `count` and widening the
//! `[first_ts, last_ts]` window instead of multiplying entries. A flush fires
//! when either the queued count or the elapsed interval crosses the
//! configured threshold (`EventReportingConfig`), posting the whole batch to
//! `/api/v3/tracking/events` in one request.

use crate::config::{EventReportingConfig, TimestampGranularity};
use crate::context::Context;
use crate::error::{Error, Result};
use chrono::{DateTime, Timelike, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Instant, SystemTime};
use tracing::{debug, warn};

const PRODUCT: &str = "kmscrypt";
const PRODUCT_VERSION: &str = env!("CARGO_PKG_VERSION");
const USER_AGENT: &str = concat!("kmscrypt-core/", env!("CARGO_PKG_VERSION"));
const API_VERSION: &str = "v3";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Encrypt,
    Decrypt,
}

impl Action {
    fn as_str(self) -> &'static str {
        match self {
            Action::Encrypt => "encrypt",
            Action::Decrypt => "decrypt",
        }
    }
}

/// Identity tuple two events are considered "the same" under for merge
/// purposes; everything outside this tuple (`count`, the timestamps) is
/// accumulated rather than compared.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EventKey {
    api_key: String,
    dataset_name: String,
    dataset_group: String,
    action: Action,
    dataset_type: String,
    key_number: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Event {
    pub api_key: String,
    pub dataset_name: String,
    pub dataset_group: String,
    pub action: Action,
    pub dataset_type: String,
    pub key_number: Option<u64>,
    pub count: u64,
    pub first_ts: SystemTime,
    pub last_ts: SystemTime,
}

impl Event {
    fn key(&self) -> EventKey {
        EventKey {
            api_key: self.api_key.clone(),
            dataset_name: self.dataset_name.clone(),
            dataset_group: self.dataset_group.clone(),
            action: self.action,
            dataset_type: self.dataset_type.clone(),
            key_number: self.key_number,
        }
    }
}

#[derive(Serialize)]
struct WireEvent {
    api_key: String,
    datasets: String,
    dataset_groups: String,
    action: &'static str,
    dataset_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    key_number: Option<u64>,
    count: u64,
    first_call_timestamp: String,
    last_call_timestamp: String,
    product: &'static str,
    product_version: &'static str,
    #[serde(rename = "user-agent")]
    user_agent: &'static str,
    api_version: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_defined: Option<Value>,
}

#[derive(Serialize)]
struct WirePayload {
    usage: Vec<WireEvent>,
}

fn format_ts(t: SystemTime, granularity: TimestampGranularity) -> String {
    let dt: DateTime<Utc> = t.into();
    let truncated = match granularity {
        TimestampGranularity::Micros => dt,
        TimestampGranularity::Millis => dt.with_nanosecond((dt.nanosecond() / 1_000_000) * 1_000_000).unwrap_or(dt),
        TimestampGranularity::Seconds => dt.with_nanosecond(0).unwrap_or(dt),
        TimestampGranularity::Minutes => dt.with_second(0).and_then(|d| d.with_nanosecond(0)).unwrap_or(dt),
        TimestampGranularity::Hours => dt
            .with_minute(0)
            .and_then(|d| d.with_second(0))
            .and_then(|d| d.with_nanosecond(0))
            .unwrap_or(dt),
        TimestampGranularity::HalfDays => {
            let hour = (dt.hour() / 12) * 12;
            dt.with_hour(hour)
                .and_then(|d| d.with_minute(0))
                .and_then(|d| d.with_second(0))
                .and_then(|d| d.with_nanosecond(0))
                .unwrap_or(dt)
        }
        TimestampGranularity::Days => dt
            .with_hour(0)
            .and_then(|d| d.with_minute(0))
            .and_then(|d| d.with_second(0))
            .and_then(|d| d.with_nanosecond(0))
            .unwrap_or(dt),
    };
    truncated.to_rfc3339()
}

/// Buffers events in memory and decides when to flush them, spec.md §4.9.
/// `processing` is a re-entrancy guard: a flush in flight does not start a
/// second one even if `should_process` would otherwise say yes.
pub struct EventAggregator {
    config: EventReportingConfig,
    api_key: String,
    events: HashMap<EventKey, Event>,
    queued_count: u64,
    last_reported: Instant,
    processing: bool,
    user_defined: Option<Value>,
}

impl EventAggregator {
    pub fn new(config: EventReportingConfig, api_key: String) -> Self {
        EventAggregator {
            config,
            api_key,
            events: HashMap::new(),
            queued_count: 0,
            last_reported: Instant::now(),
            processing: false,
            user_defined: None,
        }
    }

    /// Validates and stores metadata attached to every subsequent event:
    /// must be <= 1024 characters and parse to a non-null, non-empty JSON
    /// object (spec.md §4.9).
    pub fn add_user_metadata(&mut self, json: &str) -> Result<()> {
        if json.len() > 1024 {
            return Err(Error::InputInvalid("user metadata exceeds 1024 characters".into()));
        }
        let value: Value = serde_json::from_str(json)?;
        match &value {
            Value::Object(map) if !map.is_empty() => {
                self.user_defined = Some(value);
                Ok(())
            }
            _ => Err(Error::InputInvalid("user metadata must be a non-empty JSON object".into())),
        }
    }

    pub fn add_or_increment(
        &mut self,
        dataset_name: impl Into<String>,
        dataset_group: impl Into<String>,
        action: Action,
        dataset_type: impl Into<String>,
        key_number: Option<u64>,
    ) {
        let now = SystemTime::now();
        let candidate = Event {
            api_key: self.api_key.clone(),
            dataset_name: dataset_name.into(),
            dataset_group: dataset_group.into(),
            action,
            dataset_type: dataset_type.into(),
            key_number,
            count: 1,
            first_ts: now,
            last_ts: now,
        };
        let key = candidate.key();
        self.events
            .entry(key)
            .and_modify(|e| {
                e.count += 1;
                if candidate.last_ts > e.last_ts {
                    e.last_ts = candidate.last_ts;
                }
                if candidate.first_ts < e.first_ts {
                    e.first_ts = candidate.first_ts;
                }
            })
            .or_insert(candidate);
        self.queued_count += 1;
    }

    /// Strict `>` on both thresholds, matching the documented source behavior
    /// (spec.md §9 open question) rather than `>=` — see DESIGN.md.
    pub fn should_process(&self) -> bool {
        if self.processing || self.events.is_empty() {
            return false;
        }
        self.queued_count > self.config.minimum_count
            || self.last_reported.elapsed().as_secs() > self.config.flush_interval_seconds
    }

    /// Flushes the current batch to the KMS, synchronously or fire-and-forget
    /// depending on `destroy_report_async`. Failures are swallowed when
    /// `trap_exceptions` is set, per spec.md §4.9.
    pub fn process(&mut self, ctx: &Context) -> Result<()> {
        if self.processing || self.events.is_empty() {
            return Ok(());
        }
        self.processing = true;
        let result = self.do_process(ctx);
        self.processing = false;
        match result {
            Ok(()) => {
                self.events.clear();
                self.queued_count = 0;
                self.last_reported = Instant::now();
                Ok(())
            }
            Err(e) if self.config.trap_exceptions => {
                warn!(error = %e, "event reporting failed, trapped per configuration");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn do_process(&self, ctx: &Context) -> Result<()> {
        let wire_events: Vec<WireEvent> = self
            .events
            .values()
            .map(|e| WireEvent {
                api_key: e.api_key.clone(),
                datasets: e.dataset_name.clone(),
                dataset_groups: e.dataset_group.clone(),
                action: e.action.as_str(),
                dataset_type: e.dataset_type.clone(),
                key_number: e.key_number,
                count: e.count,
                first_call_timestamp: format_ts(e.first_ts, self.config.timestamp_granularity),
                last_call_timestamp: format_ts(e.last_ts, self.config.timestamp_granularity),
                product: PRODUCT,
                product_version: PRODUCT_VERSION,
                user_agent: USER_AGENT,
                api_version: API_VERSION,
                user_defined: self.user_defined.clone(),
            })
            .collect();
        let payload = WirePayload { usage: wire_events };
        let body = serde_json::to_vec(&payload)?;

        let url = format!("{}/api/v3/tracking/events", ctx.credentials.host);
        debug!(count = self.events.len(), "flushing usage events");
        if self.config.destroy_report_async {
            ctx.http.post_async(&url, &body, "application/json")
        } else {
            ctx.http.post(&url, &body, "application/json").map(|_| ())
        }
    }

    #[cfg(test)]
    fn queued_count(&self) -> u64 {
        self.queued_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merges_events_with_matching_identity() {
        let mut agg = EventAggregator::new(EventReportingConfig::default(), "key".into());
        agg.add_or_increment("SSN", "SSN", Action::Encrypt, "structured", Some(1));
        agg.add_or_increment("SSN", "SSN", Action::Encrypt, "structured", Some(1));
        assert_eq!(agg.events.len(), 1);
        assert_eq!(agg.queued_count(), 2);
        let (_, e) = agg.events.iter().next().unwrap();
        assert_eq!(e.count, 2);
        assert!(e.last_ts >= e.first_ts);
    }

    #[test]
    fn distinct_key_numbers_do_not_merge() {
        let mut agg = EventAggregator::new(EventReportingConfig::default(), "key".into());
        agg.add_or_increment("SSN", "SSN", Action::Encrypt, "structured", Some(1));
        agg.add_or_increment("SSN", "SSN", Action::Encrypt, "structured", Some(2));
        assert_eq!(agg.events.len(), 2);
    }

    #[test]
    fn should_process_triggers_strictly_above_minimum_count() {
        let config = EventReportingConfig { minimum_count: 2, flush_interval_seconds: 3600, ..Default::default() };
        let mut agg = EventAggregator::new(config, "key".into());
        agg.add_or_increment("SSN", "SSN", Action::Encrypt, "structured", None);
        agg.add_or_increment("SSN", "SSN", Action::Decrypt, "structured", None);
        // 2 events, minimum_count = 2: strict `>` means this does NOT trigger yet.
        assert!(!agg.should_process());
        agg.add_or_increment("SSN2", "SSN2", Action::Encrypt, "structured", None);
        assert!(agg.should_process());
    }

    #[test]
    fn should_process_false_when_already_processing() {
        let mut agg = EventAggregator::new(EventReportingConfig::default(), "key".into());
        agg.add_or_increment("SSN", "SSN", Action::Encrypt, "structured", None);
        agg.processing = true;
        assert!(!agg.should_process());
    }

    #[test]
    fn user_metadata_rejects_non_object_and_oversized() {
        let mut agg = EventAggregator::new(EventReportingConfig::default(), "key".into());
        assert!(agg.add_user_metadata("[]").is_err());
        assert!(agg.add_user_metadata("null").is_err());
        assert!(agg.add_user_metadata("{}").is_err());
        assert!(agg.add_user_metadata(r#"{"a":1}"#).is_ok());
        let oversized = format!(r#"{{"a":"{}"}}"#, "x".repeat(2000));
        assert!(agg.add_user_metadata(&oversized).is_err());
    }

    #[test]
    fn timestamp_truncation_zeros_out_minutes_granularity() {
        let t = SystemTime::now();
        let formatted = format_ts(t, TimestampGranularity::Minutes);
        let parsed = DateTime::parse_from_rfc3339(&formatted).unwrap();
        assert_eq!(parsed.second(), 0);
    }
}
