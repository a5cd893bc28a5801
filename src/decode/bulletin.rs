//! Decoder for agency bulletin lists with free-text HTML bodies.
//!
//! Bulletins carry no structured cause, effect or route fields, so those
//! are recovered from the text: HTML is flattened, the first sentence
//! becomes the title, ordered keyword rules pick the alert type and
//! severity, and a list of route-name patterns picks out affected routes.

use std::sync::LazyLock;

use chrono::{DateTime, Months, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use scraper::Html;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::{AlertDecoder, FeedFormat, RawRecord, check_upstream_error, is_truthy, value_to_id};
use crate::config::AgencyConfig;
use crate::error::{AlertError, Result};
use crate::model::{AlertType, Severity};

const TITLE_MAX_CHARS: usize = 100;
const DESCRIPTION_MAX_CHARS: usize = 500;

const DEFAULT_FALLBACK_TITLE: &str = "Ferry Service Alert";
const DEFAULT_FALLBACK_ROUTE: &str = "Ferry Routes";

/// Ferry route patterns for the Puget Sound crossings.
pub const FERRY_ROUTE_PATTERNS: &[&str] = &[
    r"seattle[- ]?(?:to[- ]?)?bainbridge",
    r"bainbridge[- ]?(?:to[- ]?)?seattle",
    r"edmonds[- ]?(?:to[- ]?)?kingston",
    r"kingston[- ]?(?:to[- ]?)?edmonds",
    r"mukilteo[- ]?(?:to[- ]?)?clinton",
    r"clinton[- ]?(?:to[- ]?)?mukilteo",
    r"fauntleroy[- ]?(?:to[- ]?)?vashon",
    r"vashon[- ]?(?:to[- ]?)?fauntleroy",
    r"point[- ]?defiance[- ]?(?:to[- ]?)?tahlequah",
    r"tahlequah[- ]?(?:to[- ]?)?point[- ]?defiance",
    r"anacortes",
    r"san[- ]?juan",
    r"lopez",
    r"orcas",
    r"friday[- ]?harbor",
];

/// Keyword rules, evaluated in order; the first rule with a hit wins.
static KEYWORD_RULES: &[(&[&str], AlertType, Severity)] = &[
    (
        &["cancel", "suspend", "no service"],
        AlertType::Cancellation,
        Severity::Critical,
    ),
    (
        &["delay", "late", "behind schedule"],
        AlertType::Delay,
        Severity::High,
    ),
    (
        &["detour", "alternate", "reroute"],
        AlertType::Detour,
        Severity::Medium,
    ),
    (
        &["maintenance", "repair", "construction"],
        AlertType::Maintenance,
        Severity::Medium,
    ),
    (
        &["weather", "wind", "fog"],
        AlertType::Weather,
        Severity::Medium,
    ),
    (
        &["reminder", "notice", "information"],
        AlertType::Incident,
        Severity::Low,
    ),
];

static FERRY_ROUTES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    FERRY_ROUTE_PATTERNS
        .iter()
        .map(|p| Regex::new(&format!("(?i){p}")).expect("ferry route pattern"))
        .collect()
});

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static SENTENCE_END: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[.!?]+").unwrap());
static ROUTE_SEPARATORS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[- ]+").unwrap());
static DOTNET_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/Date\((-?\d+)(?:[+-]\d{4})?\)/$").unwrap());

#[derive(Debug, Deserialize)]
struct BulletinItem {
    #[serde(rename = "BulletinID", default)]
    bulletin_id: Option<Value>,
    #[serde(rename = "BulletinText", default)]
    bulletin_text: Option<String>,
    #[serde(rename = "BulletinFlag", default)]
    bulletin_flag: Option<Value>,
    #[serde(rename = "PublishDate", default)]
    publish_date: Option<Value>,
    #[serde(rename = "ExpireDate", default)]
    expire_date: Option<Value>,
}

/// A bulletin after text cleanup and classification.
#[derive(Debug, Clone, PartialEq)]
pub struct BulletinRecord {
    pub bulletin_id: String,
    pub title: String,
    pub description: String,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub routes: Vec<String>,
    pub publish_date: Option<DateTime<Utc>>,
    pub expire_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct BulletinDecoder {
    route_patterns: Vec<Regex>,
    fallback_title: String,
    fallback_route: String,
}

impl Default for BulletinDecoder {
    fn default() -> Self {
        BulletinDecoder {
            route_patterns: FERRY_ROUTES.clone(),
            fallback_title: DEFAULT_FALLBACK_TITLE.to_string(),
            fallback_route: DEFAULT_FALLBACK_ROUTE.to_string(),
        }
    }
}

impl BulletinDecoder {
    /// Builds a decoder from patterns that are matched case-insensitively.
    pub fn new(patterns: &[String], fallback_title: &str, fallback_route: &str) -> Result<Self> {
        let route_patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(&format!("(?i){p}")).map_err(|e| {
                    AlertError::Config(format!("invalid route pattern '{p}': {e}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(BulletinDecoder {
            route_patterns,
            fallback_title: fallback_title.to_string(),
            fallback_route: fallback_route.to_string(),
        })
    }

    /// Uses the agency's own patterns and labels, or the ferry defaults.
    pub fn from_agency(agency: &AgencyConfig) -> Result<Self> {
        let mut decoder = match &agency.route_patterns {
            Some(patterns) => Self::new(patterns, DEFAULT_FALLBACK_TITLE, DEFAULT_FALLBACK_ROUTE)?,
            None => Self::default(),
        };
        if let Some(title) = &agency.fallback_title {
            decoder.fallback_title = title.clone();
        }
        if let Some(route) = &agency.fallback_route {
            decoder.fallback_route = route.clone();
        }
        Ok(decoder)
    }

    /// Decodes a bulletin list, validating dates against `now`.
    pub fn decode_at(&self, raw: &[u8], now: DateTime<Utc>) -> Result<Vec<RawRecord>> {
        let payload: Value = serde_json::from_slice(raw)?;
        check_upstream_error(&payload)?;

        let Value::Array(items) = payload else {
            debug!("Bulletin payload is not a list, treating as empty");
            return Ok(Vec::new());
        };
        debug!(bulletin_count = items.len(), "Bulletin list parsed");

        let mut records = Vec::with_capacity(items.len());

        for (index, value) in items.into_iter().enumerate() {
            let item: BulletinItem = match serde_json::from_value(value) {
                Ok(item) => item,
                Err(e) => {
                    warn!(index, error = %e, "Skipping malformed bulletin");
                    continue;
                }
            };

            if let Some(record) = self.record_from_item(index, item, now) {
                records.push(RawRecord::Bulletin(record));
            }
        }

        Ok(records)
    }

    fn record_from_item(
        &self,
        index: usize,
        item: BulletinItem,
        now: DateTime<Utc>,
    ) -> Option<BulletinRecord> {
        let text = item.bulletin_text.filter(|t| !t.trim().is_empty())?;
        if !item.bulletin_flag.as_ref().is_some_and(is_truthy) {
            return None;
        }

        let clean = clean_html(&text);
        let (alert_type, severity) = classify(&clean);

        Some(BulletinRecord {
            bulletin_id: item
                .bulletin_id
                .as_ref()
                .and_then(value_to_id)
                .unwrap_or_else(|| index.to_string()),
            title: extract_title(&clean, &self.fallback_title),
            description: truncate(&clean, DESCRIPTION_MAX_CHARS),
            alert_type,
            severity,
            routes: self.extract_routes(&clean),
            publish_date: item
                .publish_date
                .as_ref()
                .and_then(|v| parse_bulletin_date(v, now)),
            expire_date: item
                .expire_date
                .as_ref()
                .and_then(|v| parse_bulletin_date(v, now)),
        })
    }

    /// Route names mentioned in `text`, title-cased and deduplicated in
    /// pattern order.
    pub fn extract_routes(&self, text: &str) -> Vec<String> {
        let mut routes: Vec<String> = Vec::new();

        for pattern in &self.route_patterns {
            if let Some(found) = pattern.find(text) {
                let route = title_case(&ROUTE_SEPARATORS.replace_all(found.as_str(), " "));
                if !routes.contains(&route) {
                    routes.push(route);
                }
            }
        }

        if routes.is_empty() {
            routes.push(self.fallback_route.clone());
        }
        routes
    }
}

impl AlertDecoder for BulletinDecoder {
    fn format(&self) -> FeedFormat {
        FeedFormat::Bulletin
    }

    fn decode(&self, raw: &[u8]) -> Result<Vec<RawRecord>> {
        self.decode_at(raw, Utc::now())
    }
}

/// Flattens HTML to plain text with entities decoded and whitespace
/// collapsed.
pub fn clean_html(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let text = fragment.root_element().text().collect::<Vec<_>>().join(" ");
    WHITESPACE.replace_all(&text, " ").trim().to_string()
}

/// First sentence of `text`, or `fallback` when there is none.
pub fn extract_title(text: &str, fallback: &str) -> String {
    let first = SENTENCE_END
        .split(text)
        .next()
        .map(str::trim)
        .unwrap_or_default();

    if first.is_empty() {
        fallback.to_string()
    } else {
        truncate(first, TITLE_MAX_CHARS)
    }
}

/// Caps `text` at `max_chars` characters, ending in `...` when cut.
pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{kept}...")
}

/// Alert type and severity from keywords in `text` (case-insensitive).
pub fn classify(text: &str) -> (AlertType, Severity) {
    let lower = text.to_lowercase();

    KEYWORD_RULES
        .iter()
        .find(|(keywords, _, _)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(_, alert_type, severity)| (*alert_type, *severity))
        .unwrap_or((AlertType::Incident, Severity::Medium))
}

fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parses a bulletin date, rejecting anything unreadable or more than a
/// year away from `now`.
///
/// Accepts RFC 3339, naive ISO date-times and dates (as UTC), epoch
/// milliseconds (integer or float) and the `/Date(<millis>)/` form.
pub fn parse_bulletin_date(value: &Value, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let parsed = match value {
        Value::String(s) => parse_date_str(s.trim()),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
            .and_then(DateTime::<Utc>::from_timestamp_millis),
        _ => None,
    };

    let Some(date) = parsed else {
        if !value.is_null() {
            warn!(value = %value, "Invalid bulletin date");
        }
        return None;
    };

    let earliest = now.checked_sub_months(Months::new(12))?;
    let latest = now.checked_add_months(Months::new(12))?;
    if date < earliest || date > latest {
        warn!(value = %value, date = %date, "Bulletin date outside reasonable range");
        return None;
    }

    Some(date)
}

fn parse_date_str(s: &str) -> Option<DateTime<Utc>> {
    if s.is_empty() {
        return None;
    }

    if let Some(caps) = DOTNET_DATE.captures(s) {
        let millis: i64 = caps[1].parse().ok()?;
        return DateTime::<Utc>::from_timestamp_millis(millis);
    }

    if let Ok(date) = DateTime::parse_from_rfc3339(s) {
        return Some(date.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
    }

    s.parse::<i64>()
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
}
