//! Wire-format decoders.
//!
//! Each agency publishes alerts in one of three formats. A decoder turns the
//! raw payload into [`RawRecord`]s; the [`AlertMapper`](crate::mapper::AlertMapper)
//! turns those into normalized alerts. Malformed individual records are
//! skipped, while a payload that cannot be read at all fails the decode.

pub mod binary;
pub mod bulletin;
pub mod json;

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::AgencyConfig;
use crate::error::{AlertError, Result};
use crate::gtfs_rt::alert::{Cause, Effect};

pub use binary::ProtobufDecoder;
pub use bulletin::{BulletinDecoder, BulletinRecord};
pub use json::JsonDecoder;

/// Wire format an agency publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FeedFormat {
    GtfsRtProtobuf,
    GtfsRtJson,
    Bulletin,
}

impl FeedFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedFormat::GtfsRtProtobuf => "gtfs-rt-protobuf",
            FeedFormat::GtfsRtJson => "gtfs-rt-json",
            FeedFormat::Bulletin => "bulletin",
        }
    }
}

/// A decoded record, prior to normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum RawRecord {
    Gtfs(GtfsAlertRecord),
    Bulletin(BulletinRecord),
}

/// The alert fields of a GTFS-Realtime entity, independent of encoding.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GtfsAlertRecord {
    pub entity_id: String,
    pub header: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub active_periods: Vec<ActivePeriod>,
    pub informed_entities: Vec<InformedEntity>,
    pub cause: Option<Cause>,
    pub effect: Option<Effect>,
}

/// Active window in POSIX seconds; a missing bound is open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActivePeriod {
    pub start: Option<u64>,
    pub end: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InformedEntity {
    pub route_id: Option<String>,
    pub route_type: Option<i32>,
}

/// Turns a raw payload into records.
pub trait AlertDecoder: Send + Sync {
    fn format(&self) -> FeedFormat;

    fn decode(&self, raw: &[u8]) -> Result<Vec<RawRecord>>;
}

/// Decoders keyed by agency id, built once from configuration.
#[derive(Clone, Default)]
pub struct DecoderRegistry {
    decoders: HashMap<String, Arc<dyn AlertDecoder>>,
}

impl DecoderRegistry {
    pub fn from_agencies(agencies: &[AgencyConfig]) -> Result<Self> {
        let mut registry = Self::default();

        for agency in agencies {
            let decoder: Arc<dyn AlertDecoder> = match agency.format {
                FeedFormat::GtfsRtProtobuf => Arc::new(ProtobufDecoder),
                FeedFormat::GtfsRtJson => Arc::new(JsonDecoder),
                FeedFormat::Bulletin => Arc::new(BulletinDecoder::from_agency(agency)?),
            };
            registry.insert(&agency.id, decoder);
        }

        Ok(registry)
    }

    pub fn insert(&mut self, agency_id: &str, decoder: Arc<dyn AlertDecoder>) {
        self.decoders.insert(agency_id.to_string(), decoder);
    }

    pub fn get(&self, agency_id: &str) -> Option<Arc<dyn AlertDecoder>> {
        self.decoders.get(agency_id).cloned()
    }
}

/// Renders a JSON id (string or number) as text.
pub(crate) fn value_to_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// JavaScript-style truthiness, used for loosely typed flag fields.
pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Fails with [`AlertError::Upstream`] when a JSON payload is an error
/// envelope of the form `{"error": ..., "message": ...}`.
pub(crate) fn check_upstream_error(payload: &Value) -> Result<()> {
    let Some(error) = payload.get("error") else {
        return Ok(());
    };
    if !is_truthy(error) {
        return Ok(());
    }

    let message = payload
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| error.as_str().map(str::to_string))
        .unwrap_or_else(|| error.to_string());

    Err(AlertError::Upstream(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_to_id() {
        assert_eq!(value_to_id(&json!("abc")), Some("abc".to_string()));
        assert_eq!(value_to_id(&json!(42)), Some("42".to_string()));
        assert_eq!(value_to_id(&json!("  ")), None);
        assert_eq!(value_to_id(&json!(null)), None);
    }

    #[test]
    fn test_truthiness() {
        assert!(is_truthy(&json!(true)));
        assert!(is_truthy(&json!(1)));
        assert!(is_truthy(&json!("Y")));
        assert!(!is_truthy(&json!(false)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!(null)));
    }

    #[test]
    fn test_upstream_error_envelope() {
        let payload = json!({"error": "Failed to fetch", "message": "HTTP 502"});
        let err = check_upstream_error(&payload).unwrap_err();
        assert_eq!(err.to_string(), "Upstream error: HTTP 502");

        let payload = json!({"error": true});
        assert!(check_upstream_error(&payload).is_err());

        assert!(check_upstream_error(&json!({"entity": []})).is_ok());
        assert!(check_upstream_error(&json!({"error": null})).is_ok());
    }

    #[test]
    fn test_feed_format_names() {
        let format: FeedFormat = serde_json::from_str("\"gtfs-rt-json\"").unwrap();
        assert_eq!(format, FeedFormat::GtfsRtJson);
        assert_eq!(FeedFormat::GtfsRtProtobuf.as_str(), "gtfs-rt-protobuf");
    }
}
