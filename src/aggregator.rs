//! Concurrent collection of alerts from every configured agency.
//!
//! Each agency is fetched, decoded and mapped in its own task. Tasks share
//! nothing mutable: each returns its own outcome and the results are folded
//! together once all of them have settled.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, debug, error, info, warn};

use crate::config::AgencyConfig;
use crate::decode::{AlertDecoder, DecoderRegistry};
use crate::error::{AlertError, Result};
use crate::fetch::FeedFetcher;
use crate::mapper::AlertMapper;
use crate::model::{AgencyStatus, ServiceAlert};
use crate::stats::AlertStats;

/// Result of one aggregation cycle.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateReport {
    pub generated_at: DateTime<Utc>,
    /// Alerts in agency configuration order, placeholders included.
    pub alerts: Vec<ServiceAlert>,
    pub statuses: BTreeMap<String, AgencyStatus>,
    pub stats: AlertStats,
}

impl AggregateReport {
    /// Whether any agency returned live data this cycle.
    pub fn has_live_data(&self) -> bool {
        self.statuses.values().any(|s| s.has_live_data)
    }

    pub fn alerts_for_agency<'a>(
        &'a self,
        agency_id: &'a str,
    ) -> impl Iterator<Item = &'a ServiceAlert> + 'a {
        self.alerts
            .iter()
            .filter(move |a| a.affected_agencies.iter().any(|id| id == agency_id))
    }
}

struct AgencyOutcome {
    alerts: Vec<ServiceAlert>,
    status: AgencyStatus,
}

pub struct Aggregator {
    agencies: Vec<AgencyConfig>,
    registry: DecoderRegistry,
    mapper: AlertMapper,
    fetcher: Arc<dyn FeedFetcher>,
}

impl Aggregator {
    pub fn new(
        agencies: Vec<AgencyConfig>,
        registry: DecoderRegistry,
        mapper: AlertMapper,
        fetcher: Arc<dyn FeedFetcher>,
    ) -> Self {
        Aggregator {
            agencies,
            registry,
            mapper,
            fetcher,
        }
    }

    /// Runs one aggregation cycle. Never fails: an agency that cannot be
    /// fetched or decoded contributes a placeholder and a failed status.
    #[tracing::instrument(skip(self), fields(agencies = self.agencies.len()))]
    pub async fn fetch_all(&self) -> AggregateReport {
        let now = Utc::now();
        let mut tasks = Vec::with_capacity(self.agencies.len());

        for agency in &self.agencies {
            let agency = agency.clone();
            let decoder = self.registry.get(&agency.id);
            let fetcher = self.fetcher.clone();
            let mapper = self.mapper.clone();

            let span = tracing::info_span!(
                "fetch_agency",
                agency_id = %agency.id,
                format = agency.format.as_str(),
            );

            tasks.push(tokio::spawn(
                async move { fetch_agency(fetcher.as_ref(), decoder, &mapper, &agency, now).await }
                    .instrument(span),
            ));
        }

        let results = join_all(tasks).await;

        let mut alerts = Vec::new();
        let mut statuses = BTreeMap::new();

        for (agency, result) in self.agencies.iter().zip(results) {
            let outcome = match result {
                Ok(Ok(agency_alerts)) => {
                    let status = AgencyStatus::live(&agency.name, agency_alerts.len());
                    AgencyOutcome {
                        alerts: agency_alerts,
                        status,
                    }
                }
                Ok(Err(e)) => {
                    error!(agency_id = %agency.id, error = %e, "Agency fetch failed");
                    AgencyOutcome {
                        alerts: Vec::new(),
                        status: AgencyStatus::failed(&agency.name, &e.to_string()),
                    }
                }
                Err(join_err) => {
                    let e = AlertError::from(join_err);
                    error!(agency_id = %agency.id, error = %e, "Agency task did not complete");
                    AgencyOutcome {
                        alerts: Vec::new(),
                        status: AgencyStatus::failed(&agency.name, &e.to_string()),
                    }
                }
            };

            if outcome.alerts.is_empty() {
                debug!(agency_id = %agency.id, "No alerts, adding placeholder");
                alerts.push(self.mapper.placeholder(agency, now));
            } else {
                alerts.extend(outcome.alerts);
            }
            statuses.insert(agency.id.clone(), outcome.status);
        }

        let stats = AlertStats::from_alerts(&alerts);
        info!(
            alerts = stats.total,
            active = stats.active,
            live_agencies = statuses.values().filter(|s| s.has_live_data).count(),
            "Aggregation cycle complete"
        );

        AggregateReport {
            generated_at: now,
            alerts,
            statuses,
            stats,
        }
    }

    /// Refreshes every `interval` and hands each report to `on_report`,
    /// until `cycles` reports are done (0 means no limit) or Ctrl-C.
    pub async fn watch<F>(&self, interval: Duration, cycles: usize, on_report: F) -> Result<()>
    where
        F: FnMut(&AggregateReport) -> Result<()>,
    {
        let shutdown = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Cannot listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        };
        self.watch_until(interval, cycles, shutdown, on_report).await
    }

    /// Refresh loop that stops when `shutdown` completes.
    ///
    /// Only one cycle is in flight at a time; ticks missed while a slow cycle
    /// runs are skipped. `shutdown` is polled throughout, including while a
    /// cycle is running, and an interrupted cycle's results are discarded.
    /// Also stops when `on_report` fails.
    pub async fn watch_until<S, F>(
        &self,
        interval: Duration,
        cycles: usize,
        shutdown: S,
        mut on_report: F,
    ) -> Result<()>
    where
        S: Future<Output = ()>,
        F: FnMut(&AggregateReport) -> Result<()>,
    {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        let mut completed = 0usize;
        loop {
            let report = tokio::select! {
                _ = &mut shutdown => {
                    info!(completed, "Interrupted, stopping refresh loop");
                    return Ok(());
                }
                report = async {
                    ticker.tick().await;
                    self.fetch_all().await
                } => report,
            };

            on_report(&report)?;
            completed += 1;

            if cycles > 0 && completed >= cycles {
                info!(completed, "Refresh loop finished");
                return Ok(());
            }
            debug!(interval_secs = interval.as_secs(), "Waiting for next refresh");
        }
    }
}

async fn fetch_agency(
    fetcher: &dyn FeedFetcher,
    decoder: Option<Arc<dyn AlertDecoder>>,
    mapper: &AlertMapper,
    agency: &AgencyConfig,
    now: DateTime<Utc>,
) -> Result<Vec<ServiceAlert>> {
    let decoder = decoder.ok_or_else(|| {
        AlertError::Config(format!("no decoder registered for agency '{}'", agency.id))
    })?;

    let fetch_start = std::time::Instant::now();
    let bytes = fetcher.fetch(agency).await?;
    let elapsed = fetch_start.elapsed();
    if elapsed.as_secs() > 15 {
        warn!(elapsed_secs = elapsed.as_secs(), "Feed fetch was slow");
    }

    let records = decoder.decode(&bytes)?;
    debug!(records = records.len(), "Feed decoded");

    let alerts: Vec<ServiceAlert> = records
        .iter()
        .map(|record| mapper.map(agency, record, now))
        .collect();

    info!(alerts = alerts.len(), "Agency processed successfully");
    Ok(alerts)
}
