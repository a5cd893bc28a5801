//! Normalized alert schema shared by every decoder.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier prefix reserved for synthetic "no alerts" records.
pub const PLACEHOLDER_PREFIX: &str = "no-alerts-";

/// Route label used when a GTFS-RT alert names no route.
pub const MULTIPLE_ROUTES: &str = "Multiple Routes";

/// Route label carried by placeholders.
pub const ALL_ROUTES: &str = "All Routes";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertType {
    Delay,
    Cancellation,
    Detour,
    Maintenance,
    Weather,
    Incident,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceMode {
    Bus,
    LightRail,
    CommuterRail,
    Ferry,
    Streetcar,
}

impl ServiceMode {
    /// Maps a GTFS `route_type` code onto a service mode.
    ///
    /// Codes outside 0..=4 are treated as bus.
    pub fn from_route_type(code: i32) -> Self {
        match code {
            0 => ServiceMode::Streetcar,
            1 => ServiceMode::LightRail,
            2 => ServiceMode::CommuterRail,
            3 => ServiceMode::Bus,
            4 => ServiceMode::Ferry,
            _ => ServiceMode::Bus,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceMode::Bus => "bus",
            ServiceMode::LightRail => "light-rail",
            ServiceMode::CommuterRail => "commuter-rail",
            ServiceMode::Ferry => "ferry",
            ServiceMode::Streetcar => "streetcar",
        }
    }
}

/// A service alert after normalization.
///
/// Alerts are rebuilt on every refresh and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAlert {
    pub id: String,
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub alert_type: AlertType,
    pub affected_routes: Vec<String>,
    pub affected_services: Vec<ServiceMode>,
    pub affected_agencies: Vec<String>,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub is_active: bool,
}

impl ServiceAlert {
    pub fn is_placeholder(&self) -> bool {
        self.id.starts_with(PLACEHOLDER_PREFIX)
    }
}

/// Per-agency outcome of the last aggregation cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgencyStatus {
    pub name: String,
    pub has_live_data: bool,
    pub alert_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgencyStatus {
    pub fn live(name: &str, alert_count: usize) -> Self {
        AgencyStatus {
            name: name.to_string(),
            has_live_data: true,
            alert_count,
            error: None,
        }
    }

    pub fn failed(name: &str, error: &str) -> Self {
        AgencyStatus {
            name: name.to_string(),
            has_live_data: false,
            alert_count: 0,
            error: Some(error.to_string()),
        }
    }
}
