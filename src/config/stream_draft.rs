//! Stream definitions typed in by the operator.
//!
//! The JSON document is decoded into [`StreamDraft`], whose fields are all
//! optional, and then converted field by field into a [`StreamConfig`].
//! Every failure surfaces as one [`ConfigError`].

use std::time::Duration;

use serde::Deserialize;

use super::ConfigError;
use crate::broker::{DiscardPolicy, RetentionPolicy, StorageType, StreamConfig};
use crate::subject::is_valid_subject;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StreamDraft {
    pub name: Option<String>,
    pub description: Option<String>,
    pub subjects: Option<Vec<String>>,
    pub retention: Option<String>,
    pub max_consumers: Option<i64>,
    pub max_msgs: Option<i64>,
    pub max_bytes: Option<i64>,
    pub discard: Option<String>,
    /// Duration string such as `"24h"` or `"1h30m"`.
    pub max_age: Option<String>,
    pub max_msgs_per_subject: Option<i64>,
    pub max_msg_size: Option<i32>,
    pub storage: Option<String>,
    pub num_replicas: Option<u32>,
}

/// Template shown to the operator when adding a stream.
pub const TEMPLATE: &str = r#"{"name":"orders","subjects":["orders.>"],"retention":"limits","max_age":"24h","storage":"file"}"#;

impl StreamDraft {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn into_config(self) -> Result<StreamConfig, ConfigError> {
        let name = self
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .ok_or(ConfigError::Invalid {
                field: "name",
                reason: "required".to_string(),
            })?;

        let subjects = self.subjects.unwrap_or_default();
        if let Some(bad) = subjects.iter().find(|s| !is_valid_subject(s)) {
            return Err(ConfigError::Invalid {
                field: "subjects",
                reason: format!("'{bad}' is not a valid subject"),
            });
        }

        let max_age = match self.max_age.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(parse_duration(raw)?).filter(|d| !d.is_zero()),
        };

        let mut config = StreamConfig::new(&name, &[]);
        config.description = self.description.unwrap_or_default();
        config.subjects = subjects;
        config.retention = parse_retention(self.retention.as_deref())?;
        config.discard = parse_discard(self.discard.as_deref())?;
        config.storage = parse_storage(self.storage.as_deref())?;
        config.max_age = max_age;
        config.max_consumers = self.max_consumers.unwrap_or(-1);
        config.max_msgs = self.max_msgs.unwrap_or(-1);
        config.max_bytes = self.max_bytes.unwrap_or(-1);
        config.max_msgs_per_subject = self.max_msgs_per_subject.unwrap_or(-1);
        config.max_msg_size = self.max_msg_size.unwrap_or(-1);
        config.replicas = match self.num_replicas {
            None => 1,
            Some(n @ 1..=5) => n,
            Some(n) => {
                return Err(ConfigError::Invalid {
                    field: "num_replicas",
                    reason: format!("{n} is outside 1..=5"),
                });
            }
        };
        Ok(config)
    }
}

fn parse_retention(raw: Option<&str>) -> Result<RetentionPolicy, ConfigError> {
    match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        None | Some("") | Some("limits") => Ok(RetentionPolicy::Limits),
        Some("interest") => Ok(RetentionPolicy::Interest),
        Some("workqueue") | Some("work_queue") => Ok(RetentionPolicy::WorkQueue),
        Some(other) => Err(ConfigError::Invalid {
            field: "retention",
            reason: format!("unknown policy '{other}'"),
        }),
    }
}

fn parse_discard(raw: Option<&str>) -> Result<DiscardPolicy, ConfigError> {
    match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        None | Some("") | Some("old") => Ok(DiscardPolicy::Old),
        Some("new") => Ok(DiscardPolicy::New),
        Some(other) => Err(ConfigError::Invalid {
            field: "discard",
            reason: format!("unknown policy '{other}'"),
        }),
    }
}

fn parse_storage(raw: Option<&str>) -> Result<StorageType, ConfigError> {
    match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        None | Some("") | Some("file") => Ok(StorageType::File),
        Some("memory") => Ok(StorageType::Memory),
        Some(other) => Err(ConfigError::Invalid {
            field: "storage",
            reason: format!("unknown storage '{other}'"),
        }),
    }
}

/// Parse a duration written as a sequence of `<number><unit>` pairs, e.g.
/// `"1h30m"`, `"1.5h"`, `"250ms"`. Units: ns, us, µs, ms, s, m, h.
/// A bare `"0"` is zero.
pub fn parse_duration(raw: &str) -> Result<Duration, ConfigError> {
    let bad = || ConfigError::Duration(raw.to_string());
    let s = raw.trim();
    if s == "0" {
        return Ok(Duration::ZERO);
    }
    if s.is_empty() {
        return Err(bad());
    }

    let mut total = 0f64;
    let mut rest = s;
    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(bad)?;
        if num_len == 0 {
            return Err(bad());
        }
        let value: f64 = rest[..num_len].parse().map_err(|_| bad())?;
        rest = &rest[num_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let seconds_per_unit = match &rest[..unit_len] {
            "ns" => 1e-9,
            "us" | "µs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            _ => return Err(bad()),
        };
        rest = &rest[unit_len..];
        total += value * seconds_per_unit;
    }

    Duration::try_from_secs_f64(total).map_err(|_| bad())
}
