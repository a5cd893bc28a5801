//! Normalization of decoded records into [`ServiceAlert`]s.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::AgencyConfig;
use crate::decode::{ActivePeriod, BulletinRecord, GtfsAlertRecord, RawRecord};
use crate::gtfs_rt::alert::{Cause, Effect};
use crate::model::{
    ALL_ROUTES, AlertType, MULTIPLE_ROUTES, PLACEHOLDER_PREFIX, ServiceAlert, ServiceMode,
    Severity,
};
use crate::routes::RouteTable;

const DEFAULT_TITLE: &str = "Service Alert";

/// Alert type implied by a GTFS-RT cause.
pub fn alert_type_for_cause(cause: Option<Cause>) -> AlertType {
    match cause {
        Some(Cause::Maintenance | Cause::Construction) => AlertType::Maintenance,
        Some(Cause::Weather) => AlertType::Weather,
        _ => AlertType::Incident,
    }
}

/// Severity for a GTFS-RT effect, and the alert type it forces, if any.
///
/// An absent effect is treated as medium; any effect without its own rule
/// is low.
pub fn classify_effect(effect: Option<Effect>) -> (Severity, Option<AlertType>) {
    match effect {
        None => (Severity::Medium, None),
        Some(Effect::NoService) => (Severity::Critical, Some(AlertType::Cancellation)),
        Some(Effect::SignificantDelays) => (Severity::High, Some(AlertType::Delay)),
        Some(Effect::Detour) => (Severity::Medium, Some(AlertType::Detour)),
        Some(Effect::ReducedService) => (Severity::Medium, None),
        Some(_) => (Severity::Low, None),
    }
}

/// Whether `now` falls inside any active period. No periods means always.
pub fn is_active(periods: &[ActivePeriod], now: DateTime<Utc>) -> bool {
    if periods.is_empty() {
        return true;
    }
    let now = now.timestamp();

    periods.iter().any(|p| {
        // bounds past i64::MAX lie beyond any representable now
        let started = p
            .start
            .is_none_or(|start| i64::try_from(start).is_ok_and(|s| s <= now));
        let not_ended = p
            .end
            .is_none_or(|end| i64::try_from(end).map_or(true, |e| now < e));
        started && not_ended
    })
}

fn from_epoch(secs: u64) -> Option<DateTime<Utc>> {
    i64::try_from(secs)
        .ok()
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
}

/// Drops an end time that precedes the start time.
fn checked_end(
    id: &str,
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    match end {
        Some(end) if end < start => {
            debug!(alert_id = id, %start, %end, "Dropping end time before start time");
            None
        }
        other => other,
    }
}

/// Builds normalized alerts, resolving route names through the route table.
#[derive(Debug, Clone)]
pub struct AlertMapper {
    routes: Arc<RouteTable>,
}

impl AlertMapper {
    pub fn new(routes: Arc<RouteTable>) -> Self {
        AlertMapper { routes }
    }

    pub fn map(&self, agency: &AgencyConfig, record: &RawRecord, now: DateTime<Utc>) -> ServiceAlert {
        match record {
            RawRecord::Gtfs(gtfs) => self.map_gtfs(agency, gtfs, now),
            RawRecord::Bulletin(bulletin) => self.map_bulletin(agency, bulletin, now),
        }
    }

    pub fn map_gtfs(
        &self,
        agency: &AgencyConfig,
        record: &GtfsAlertRecord,
        now: DateTime<Utc>,
    ) -> ServiceAlert {
        let id = format!("{}-{}", agency.id, record.entity_id);

        let title = record
            .header
            .clone()
            .unwrap_or_else(|| DEFAULT_TITLE.to_string());
        let description = record.description.clone().unwrap_or_else(|| title.clone());

        let (severity, forced_type) = classify_effect(record.effect);
        let alert_type = forced_type.unwrap_or_else(|| alert_type_for_cause(record.cause));

        let (affected_routes, affected_services) = self.affected(agency, record);

        let period = record.active_periods.first();
        let start_time = period
            .and_then(|p| p.start)
            .filter(|&s| s > 0)
            .and_then(from_epoch)
            .unwrap_or(now);
        let end_time = period
            .and_then(|p| p.end)
            .filter(|&e| e > 0)
            .and_then(from_epoch);
        let end_time = checked_end(&id, start_time, end_time);

        ServiceAlert {
            title,
            description,
            severity,
            alert_type,
            affected_routes,
            affected_services,
            affected_agencies: vec![agency.id.clone()],
            start_time,
            end_time,
            last_updated: now,
            url: Some(record.url.clone().unwrap_or_else(|| agency.alerts_url.clone())),
            is_active: is_active(&record.active_periods, now),
            id,
        }
    }

    /// Route labels and service modes named by the informed entities,
    /// falling back to the sentinel route and the agency's default modes.
    fn affected(
        &self,
        agency: &AgencyConfig,
        record: &GtfsAlertRecord,
    ) -> (Vec<String>, Vec<ServiceMode>) {
        let mut routes: Vec<String> = Vec::new();
        let mut services: Vec<ServiceMode> = Vec::new();

        for entity in &record.informed_entities {
            if let Some(route_id) = &entity.route_id {
                let resolved = self.routes.parse_composite_route_id(route_id, Some(&agency.id));
                let name = match resolved.route {
                    Some(route) => self.routes.display_name(route).to_string(),
                    None => resolved.short_name,
                };
                if !name.is_empty() && !routes.contains(&name) {
                    routes.push(name);
                }
            }

            if let Some(code) = entity.route_type {
                let mode = ServiceMode::from_route_type(code);
                if !services.contains(&mode) {
                    services.push(mode);
                }
            }
        }

        if routes.is_empty() {
            routes.push(MULTIPLE_ROUTES.to_string());
        }
        if services.is_empty() {
            services = agency.services.clone();
        }

        (routes, services)
    }

    pub fn map_bulletin(
        &self,
        agency: &AgencyConfig,
        record: &BulletinRecord,
        now: DateTime<Utc>,
    ) -> ServiceAlert {
        let id = format!("{}-{}", agency.id, record.bulletin_id);
        let start_time = record.publish_date.unwrap_or(now);
        let end_time = checked_end(&id, start_time, record.expire_date);

        let period = ActivePeriod {
            start: u64::try_from(start_time.timestamp()).ok(),
            end: end_time.and_then(|e| u64::try_from(e.timestamp()).ok()),
        };

        ServiceAlert {
            title: record.title.clone(),
            description: record.description.clone(),
            severity: record.severity,
            alert_type: record.alert_type,
            affected_routes: record.routes.clone(),
            affected_services: agency.services.clone(),
            affected_agencies: vec![agency.id.clone()],
            start_time,
            end_time,
            last_updated: now,
            url: Some(agency.alerts_url.clone()),
            is_active: is_active(&[period], now),
            id,
        }
    }

    /// Synthetic "no active alerts" record for an agency that reported
    /// nothing or could not be reached.
    pub fn placeholder(&self, agency: &AgencyConfig, now: DateTime<Utc>) -> ServiceAlert {
        ServiceAlert {
            id: format!("{PLACEHOLDER_PREFIX}{}", agency.id),
            title: format!("No {} Service Alerts", agency.name),
            description: format!(
                "All {} services are currently operating normally with no active alerts.",
                agency.name
            ),
            severity: Severity::Low,
            alert_type: AlertType::Incident,
            affected_routes: vec![ALL_ROUTES.to_string()],
            affected_services: agency.services.clone(),
            affected_agencies: vec![agency.id.clone()],
            start_time: now,
            end_time: None,
            last_updated: now,
            url: Some(agency.alerts_url.clone()),
            is_active: true,
        }
    }
}
