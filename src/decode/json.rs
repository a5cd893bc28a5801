//! Decoder for GTFS-Realtime feeds published as JSON.
//!
//! Producers disagree on the JSON mapping: some emit the protobuf field
//! names (`header_text`, enum values as numbers), others the proto3 JSON
//! mapping (`headerText`, enum values as names, 64-bit integers as strings).
//! Both are accepted.

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::{
    ActivePeriod, AlertDecoder, FeedFormat, GtfsAlertRecord, InformedEntity, RawRecord,
    check_upstream_error, value_to_id,
};
use crate::error::{AlertError, Result};
use crate::gtfs_rt::alert::{Cause, Effect};

#[derive(Debug, Deserialize)]
struct JsonEntity {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default, alias = "isDeleted")]
    is_deleted: Option<bool>,
    #[serde(default)]
    alert: Option<JsonAlert>,
}

#[derive(Debug, Deserialize)]
struct JsonAlert {
    #[serde(default, alias = "activePeriod")]
    active_period: Option<Vec<JsonTimeRange>>,
    #[serde(default, alias = "informedEntity")]
    informed_entity: Option<Vec<JsonEntitySelector>>,
    #[serde(default)]
    cause: Option<EnumCode>,
    #[serde(default)]
    effect: Option<EnumCode>,
    #[serde(default)]
    url: Option<JsonTranslatedString>,
    #[serde(default, alias = "headerText")]
    header_text: Option<JsonTranslatedString>,
    #[serde(default, alias = "descriptionText")]
    description_text: Option<JsonTranslatedString>,
}

#[derive(Debug, Deserialize)]
struct JsonTimeRange {
    #[serde(default)]
    start: Option<Uint>,
    #[serde(default)]
    end: Option<Uint>,
}

#[derive(Debug, Deserialize)]
struct JsonEntitySelector {
    #[serde(default, alias = "routeId")]
    route_id: Option<String>,
    #[serde(default, alias = "routeType")]
    route_type: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct JsonTranslatedString {
    #[serde(default)]
    translation: Option<Vec<JsonTranslation>>,
}

#[derive(Debug, Deserialize)]
struct JsonTranslation {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EnumCode {
    Number(i32),
    Name(String),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Uint {
    Number(u64),
    Text(String),
}

impl Uint {
    fn value(&self) -> Option<u64> {
        match self {
            Uint::Number(n) => Some(*n),
            Uint::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl EnumCode {
    fn cause(&self) -> Option<Cause> {
        match self {
            EnumCode::Number(n) => Cause::try_from(*n).ok(),
            EnumCode::Name(name) => Cause::from_str_name(&name.trim().to_ascii_uppercase()),
        }
    }

    fn effect(&self) -> Option<Effect> {
        match self {
            EnumCode::Number(n) => Effect::try_from(*n).ok(),
            EnumCode::Name(name) => Effect::from_str_name(&name.trim().to_ascii_uppercase()),
        }
    }
}

impl JsonTranslatedString {
    fn first(&self) -> Option<String> {
        self.translation
            .as_deref()?
            .iter()
            .filter_map(|t| t.text.as_deref())
            .map(str::trim)
            .find(|t| !t.is_empty())
            .map(str::to_string)
    }
}

/// Decodes GTFS-RT JSON alert feeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDecoder;

impl JsonDecoder {
    /// Decodes an already-parsed JSON feed.
    pub fn decode_value(&self, payload: Value) -> Result<Vec<RawRecord>> {
        check_upstream_error(&payload)?;

        let Value::Object(mut feed) = payload else {
            return Err(AlertError::Upstream(
                "expected a GTFS-RT feed object".to_string(),
            ));
        };

        let entities = match feed.remove("entity") {
            Some(Value::Array(entities)) => entities,
            Some(Value::Null) | None => Vec::new(),
            Some(other) => {
                return Err(AlertError::Upstream(format!(
                    "expected an entity array, got {}",
                    json_kind(&other)
                )));
            }
        };
        debug!(entity_count = entities.len(), "JSON feed parsed");

        let mut records = Vec::with_capacity(entities.len());

        for (index, value) in entities.into_iter().enumerate() {
            let entity: JsonEntity = match serde_json::from_value(value) {
                Ok(entity) => entity,
                Err(e) => {
                    warn!(index, error = %e, "Skipping malformed feed entity");
                    continue;
                }
            };

            if entity.is_deleted.unwrap_or(false) {
                continue;
            }
            let Some(alert) = entity.alert else {
                continue;
            };

            let entity_id = entity
                .id
                .as_ref()
                .and_then(value_to_id)
                .unwrap_or_else(|| index.to_string());

            records.push(RawRecord::Gtfs(record_from_alert(entity_id, alert)));
        }

        Ok(records)
    }
}

impl AlertDecoder for JsonDecoder {
    fn format(&self) -> FeedFormat {
        FeedFormat::GtfsRtJson
    }

    fn decode(&self, raw: &[u8]) -> Result<Vec<RawRecord>> {
        let payload: Value = serde_json::from_slice(raw)?;
        self.decode_value(payload)
    }
}

fn record_from_alert(entity_id: String, alert: JsonAlert) -> GtfsAlertRecord {
    GtfsAlertRecord {
        entity_id,
        header: alert.header_text.as_ref().and_then(JsonTranslatedString::first),
        description: alert
            .description_text
            .as_ref()
            .and_then(JsonTranslatedString::first),
        url: alert.url.as_ref().and_then(JsonTranslatedString::first),
        active_periods: alert
            .active_period
            .unwrap_or_default()
            .into_iter()
            .map(|p| ActivePeriod {
                start: p.start.as_ref().and_then(Uint::value),
                end: p.end.as_ref().and_then(Uint::value),
            })
            .collect(),
        informed_entities: alert
            .informed_entity
            .unwrap_or_default()
            .into_iter()
            .map(|e| InformedEntity {
                route_id: e.route_id.filter(|id| !id.is_empty()),
                route_type: e.route_type,
            })
            .collect(),
        cause: alert.cause.as_ref().and_then(EnumCode::cause),
        effect: alert.effect.as_ref().and_then(EnumCode::effect),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
