//! Agency configuration.
//!
//! Stored as JSON on disk; when no file is given the built-in Puget Sound
//! agencies are used:
//! ```json
//! {
//!   "refresh_interval_secs": 180,
//!   "agencies": [{
//!     "id": "king-county-metro",
//!     "name": "King County Metro",
//!     "services": ["bus"],
//!     "alerts_url": "https://kingcounty.gov/en/dept/metro/travel-options/bus/alerts-advisories",
//!     "feed_url": "https://s3.amazonaws.com/kcm-alerts-realtime-prod/alerts.pb",
//!     "format": "gtfs-rt-protobuf",
//!     "gtfs_agency_id": "1"
//!   }]
//! }
//! ```

use serde::Deserialize;
use std::collections::HashSet;

use crate::decode::FeedFormat;
use crate::error::{AlertError, Result};
use crate::model::ServiceMode;

/// Describes how a feed requires authentication.
///
/// Keys are never stored in the file; `key_env` names the environment
/// variable holding the secret.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedAuth {
    /// No authentication required.
    #[default]
    None,
    /// API key appended as a URL query parameter with the given name.
    UrlParam { param_name: String, key_env: String },
    /// API key sent as an HTTP header with the given name.
    Header { header_name: String, key_env: String },
}

impl FeedAuth {
    /// Returns `true` if any authentication credentials are needed.
    pub fn requires_auth(&self) -> bool {
        !matches!(self, FeedAuth::None)
    }

    /// Reads the key from the configured environment variable.
    pub fn resolve_key(&self) -> Result<Option<String>> {
        let key_env = match self {
            FeedAuth::None => return Ok(None),
            FeedAuth::UrlParam { key_env, .. } | FeedAuth::Header { key_env, .. } => key_env,
        };
        std::env::var(key_env)
            .map(Some)
            .map_err(|_| AlertError::Config(format!("{key_env} must be set")))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgencyConfig {
    pub id: String,
    pub name: String,
    /// Service modes assumed when an alert names none.
    pub services: Vec<ServiceMode>,
    /// Agency alert-center page, used when an alert carries no URL.
    pub alerts_url: String,
    pub feed_url: String,
    pub format: FeedFormat,
    /// Agency id used in the route table.
    #[serde(default)]
    pub gtfs_agency_id: Option<String>,
    #[serde(default)]
    pub auth: FeedAuth,
    /// Bulletin feeds only: route-name patterns matched against the text.
    #[serde(default)]
    pub route_patterns: Option<Vec<String>>,
    #[serde(default)]
    pub fallback_title: Option<String>,
    #[serde(default)]
    pub fallback_route: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub agencies: Vec<AgencyConfig>,
    /// Seconds between refresh cycles in `watch` mode (default: 180)
    #[serde(default = "AppConfig::default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
}

impl AppConfig {
    fn default_refresh_interval_secs() -> u64 {
        180
    }

    /// Loads the config from a JSON file at `path`.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let config: AppConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.agencies.is_empty() {
            return Err(AlertError::Config("no agencies configured".to_string()));
        }
        if self.refresh_interval_secs == 0 {
            return Err(AlertError::Config(
                "refresh_interval_secs must be positive".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for agency in &self.agencies {
            if agency.id.trim().is_empty() {
                return Err(AlertError::Config("agency id must not be empty".to_string()));
            }
            if !seen.insert(agency.id.as_str()) {
                return Err(AlertError::Config(format!(
                    "duplicate agency id '{}'",
                    agency.id
                )));
            }
            if agency.services.is_empty() {
                return Err(AlertError::Config(format!(
                    "agency '{}' needs at least one service mode",
                    agency.id
                )));
            }
        }
        Ok(())
    }

    pub fn agency(&self, agency_id: &str) -> Option<&AgencyConfig> {
        self.agencies.iter().find(|a| a.id == agency_id)
    }

    /// Sound Transit, King County Metro, Community Transit and Washington
    /// State Ferries.
    pub fn puget_sound() -> Self {
        let agency = |id: &str,
                      name: &str,
                      services: &[ServiceMode],
                      alerts_url: &str,
                      feed_url: &str,
                      format: FeedFormat,
                      gtfs_agency_id: &str| AgencyConfig {
            id: id.to_string(),
            name: name.to_string(),
            services: services.to_vec(),
            alerts_url: alerts_url.to_string(),
            feed_url: feed_url.to_string(),
            format,
            gtfs_agency_id: Some(gtfs_agency_id.to_string()),
            auth: FeedAuth::None,
            route_patterns: None,
            fallback_title: None,
            fallback_route: None,
        };

        let mut ferries = agency(
            "washington-state-ferries",
            "Washington State Ferries",
            &[ServiceMode::Ferry],
            "https://wsdot.wa.gov/travel/washington-state-ferries/service-alerts",
            "https://www.wsdot.wa.gov/ferries/api/schedule/rest/alerts",
            FeedFormat::Bulletin,
            "95",
        );
        ferries.auth = FeedAuth::UrlParam {
            param_name: "apiaccesscode".to_string(),
            key_env: "WSF_API_ACCESS_CODE".to_string(),
        };

        AppConfig {
            agencies: vec![
                agency(
                    "sound-transit",
                    "Sound Transit",
                    &[
                        ServiceMode::LightRail,
                        ServiceMode::CommuterRail,
                        ServiceMode::Bus,
                    ],
                    "https://www.soundtransit.org/ride-with-us/service-alerts",
                    "https://s3.amazonaws.com/st-service-alerts-prod/alerts_pb.json",
                    FeedFormat::GtfsRtJson,
                    "40",
                ),
                agency(
                    "king-county-metro",
                    "King County Metro",
                    &[ServiceMode::Bus],
                    "https://kingcounty.gov/en/dept/metro/travel-options/bus/alerts-advisories",
                    "https://s3.amazonaws.com/kcm-alerts-realtime-prod/alerts.pb",
                    FeedFormat::GtfsRtProtobuf,
                    "1",
                ),
                agency(
                    "community-transit",
                    "Community Transit",
                    &[ServiceMode::Bus],
                    "https://www.communitytransit.org/alerts",
                    "https://s3.amazonaws.com/commtrans-realtime-prod/alerts.pb",
                    FeedFormat::GtfsRtProtobuf,
                    "29",
                ),
                ferries,
            ],
            refresh_interval_secs: Self::default_refresh_interval_secs(),
        }
    }
}
