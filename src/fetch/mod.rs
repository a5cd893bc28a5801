//! Retrieval of raw agency payloads.
//!
//! [`HttpClient`] is the transport seam; authentication is layered on by
//! wrapping a client. [`FeedFetcher`] is what the aggregator depends on, so
//! tests can substitute canned payloads for the network.

mod basic;
mod client;
pub mod auth;

pub use basic::BasicClient;
pub use client::HttpClient;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::{AgencyConfig, FeedAuth};
use crate::error::{AlertError, Result};
use auth::{ApiKey, UrlParam};

/// Default per-request timeout for agency feeds.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Fetches `url` and returns the response body.
///
/// A non-success status is an error; the reported URL is the one given,
/// so credentials added by auth wrappers never appear in messages.
pub async fn fetch_bytes<C: HttpClient + ?Sized>(client: &C, url: &str) -> Result<Vec<u8>> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| AlertError::Config(format!("invalid feed URL '{url}': {e}")))?;
    let req = reqwest::Request::new(reqwest::Method::GET, parsed);

    let resp = client.execute(req).await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(AlertError::Status {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }

    let bytes = resp.bytes().await?;
    debug!(url, bytes = bytes.len(), "Feed bytes received");
    Ok(bytes.to_vec())
}

/// Source of raw payloads for an agency.
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn fetch(&self, agency: &AgencyConfig) -> Result<Vec<u8>>;
}

/// Fetches agency feeds over HTTP, with each agency's credentials applied.
pub struct HttpFetcher {
    /// Per-agency client, or the reason one could not be built.
    clients: HashMap<String, std::result::Result<Arc<dyn HttpClient>, String>>,
    default_client: Arc<dyn HttpClient>,
}

impl HttpFetcher {
    /// Builds one client per agency. Keys are resolved from the environment
    /// here; an agency whose credential is missing or invalid fails on every
    /// fetch while the other agencies are unaffected.
    pub fn from_agencies(agencies: &[AgencyConfig], timeout: Duration) -> Result<Self> {
        let base = BasicClient::with_timeout(timeout)?;
        let mut clients = HashMap::new();

        for agency in agencies {
            let client = Self::agency_client(&base, agency).map_err(|e| {
                warn!(agency_id = %agency.id, error = %e, "Agency credentials unavailable");
                match e {
                    AlertError::Config(reason) => reason,
                    other => other.to_string(),
                }
            });
            clients.insert(agency.id.clone(), client);
        }

        Ok(Self {
            clients,
            default_client: Arc::new(base),
        })
    }

    fn agency_client(base: &BasicClient, agency: &AgencyConfig) -> Result<Arc<dyn HttpClient>> {
        let client: Arc<dyn HttpClient> = match (&agency.auth, agency.auth.resolve_key()?) {
            (FeedAuth::UrlParam { param_name, .. }, Some(key)) => Arc::new(UrlParam {
                inner: base.clone(),
                param_name: param_name.clone(),
                key,
            }),
            (FeedAuth::Header { header_name, .. }, Some(key)) => {
                Arc::new(ApiKey::new(base.clone(), header_name, &key)?)
            }
            _ => Arc::new(base.clone()),
        };
        Ok(client)
    }
}

#[async_trait]
impl FeedFetcher for HttpFetcher {
    async fn fetch(&self, agency: &AgencyConfig) -> Result<Vec<u8>> {
        let client = match self.clients.get(&agency.id) {
            Some(Ok(client)) => client,
            Some(Err(reason)) => return Err(AlertError::Config(reason.clone())),
            None => &self.default_client,
        };
        fetch_bytes(client.as_ref(), &agency.feed_url).await
    }
}

/// Loads a payload from a local file path or fetches it over HTTP.
#[tracing::instrument(skip(client))]
pub async fn load_source<C: HttpClient + ?Sized>(client: &C, source: &str) -> Result<Vec<u8>> {
    if source.starts_with("http://") || source.starts_with("https://") {
        fetch_bytes(client, source).await
    } else {
        Ok(tokio::fs::read(source).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[tokio::test]
    async fn test_invalid_url_is_config_error() {
        let err = fetch_bytes(&BasicClient::new(), "not a url").await.unwrap_err();
        assert!(matches!(err, AlertError::Config(_)));
    }

    #[tokio::test]
    async fn test_load_source_reads_local_file() {
        let path = std::env::temp_dir().join("transit_alerts_load_source.json");
        std::fs::write(&path, b"{\"entity\": []}").unwrap();

        let bytes = load_source(&BasicClient::new(), path.to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(bytes, b"{\"entity\": []}");

        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn test_load_source_missing_file() {
        let err = load_source(&BasicClient::new(), "/nonexistent/alerts.pb")
            .await
            .unwrap_err();
        assert!(matches!(err, AlertError::Io(_)));
    }

    #[tokio::test]
    async fn test_missing_credential_only_fails_its_agency() {
        let mut config = AppConfig::puget_sound();
        config.agencies[3].auth = FeedAuth::UrlParam {
            param_name: "apiaccesscode".to_string(),
            key_env: "TRANSIT_ALERTS_TEST_MISSING_CODE".to_string(),
        };
        let fetcher = HttpFetcher::from_agencies(&config.agencies, DEFAULT_TIMEOUT).unwrap();

        assert_eq!(fetcher.clients.len(), 4);
        assert_eq!(fetcher.clients.values().filter(|c| c.is_ok()).count(), 3);

        // no request is attempted for the agency without credentials
        let err = fetcher.fetch(&config.agencies[3]).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid configuration: TRANSIT_ALERTS_TEST_MISSING_CODE must be set"
        );
    }

    #[test]
    fn test_invalid_header_only_fails_its_agency() {
        let mut config = AppConfig::puget_sound();
        config.agencies[0].auth = FeedAuth::Header {
            header_name: "bad header".to_string(),
            key_env: "PATH".to_string(),
        };
        config.agencies[3].auth = FeedAuth::None;

        let fetcher = HttpFetcher::from_agencies(&config.agencies, DEFAULT_TIMEOUT).unwrap();
        assert!(fetcher.clients["sound-transit"].is_err());
        assert!(fetcher.clients["king-county-metro"].is_ok());
    }

    #[test]
    fn test_open_feeds_need_no_credentials() {
        let config = AppConfig::puget_sound();
        let open: Vec<_> = config
            .agencies
            .into_iter()
            .filter(|a| !a.auth.requires_auth())
            .collect();
        let fetcher = HttpFetcher::from_agencies(&open, DEFAULT_TIMEOUT).unwrap();
        assert_eq!(fetcher.clients.len(), 3);
    }
}
