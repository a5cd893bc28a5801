use std::collections::BTreeMap;

use serde::Serialize;

use crate::model::{ServiceAlert, ServiceMode, Severity};

/// Counts over a set of alerts. Placeholders are not counted.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertStats {
    pub total: usize,
    pub active: usize,
    pub by_service: BTreeMap<ServiceMode, usize>,
    pub by_severity: BTreeMap<Severity, usize>,
    pub by_agency: BTreeMap<String, usize>,
}

impl AlertStats {
    pub fn from_alerts(alerts: &[ServiceAlert]) -> Self {
        let mut s = AlertStats::default();

        for alert in alerts.iter().filter(|a| !a.is_placeholder()) {
            s.total += 1;

            if alert.is_active {
                s.active += 1;
            }

            for service in &alert.affected_services {
                *s.by_service.entry(*service).or_default() += 1;
            }

            *s.by_severity.entry(alert.severity).or_default() += 1;

            for agency in &alert.affected_agencies {
                *s.by_agency.entry(agency.clone()).or_default() += 1;
            }
        }

        s
    }

    pub fn pct(part: usize, total: usize) -> f64 {
        if total == 0 {
            0.0
        } else {
            (part as f64 / total as f64) * 100.0
        }
    }

    pub fn active_pct(&self) -> f64 {
        Self::pct(self.active, self.total)
    }

    /// Alerts at high or critical severity.
    pub fn urgent(&self) -> usize {
        self.by_severity
            .iter()
            .filter(|(severity, _)| **severity >= Severity::High)
            .map(|(_, count)| count)
            .sum()
    }
}
