//! Route reference table built from a GTFS `routes.txt` file.
//!
//! The table is loaded once at startup and shared read-only between all
//! decode tasks. Lookups go by exact `route_id` or by `route_short_name`;
//! short names are not unique across agencies, so that index keeps every
//! candidate and disambiguates by agency at lookup time.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use csv::{ReaderBuilder, Trim};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Result;

/// Default route-table agency ids for the regional agency keys.
static GTFS_AGENCY_IDS: &[(&str, &str)] = &[
    ("king-county-metro", "1"),
    ("sound-transit", "40"),
    ("community-transit", "29"),
    ("pierce-transit", "3"),
    ("kitsap-transit", "20"),
    ("intercity-transit", "19"),
    ("washington-state-ferries", "95"),
    ("seattle-streetcar", "23"),
    ("seattle-monorail", "96"),
    ("everett-transit", "97"),
    ("amtrak", "51"),
];

/// Fallback `(background, text)` colors keyed by route-table agency id.
static AGENCY_PALETTE: &[(&str, &str, &str)] = &[
    ("1", "#FDB71A", "#000000"),
    ("40", "#2B376E", "#FFFFFF"),
    ("29", "#0070C0", "#FFFFFF"),
    ("3", "#6cb33f", "#000000"),
    ("20", "#c0504d", "#ffffff"),
    ("19", "#5A8400", "#ffffff"),
    ("95", "#0070c0", "#ffffff"),
    ("23", "#F47836", "#FFFFFF"),
];

const DEFAULT_BACKGROUND: &str = "#FDB71A";
const DEFAULT_TEXT: &str = "#000000";

/// One row of `routes.txt`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteRecord {
    pub route_id: String,
    #[serde(default)]
    pub agency_id: String,
    #[serde(default)]
    pub route_short_name: String,
    #[serde(default)]
    pub route_long_name: String,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub route_type: Option<i32>,
    #[serde(default)]
    pub route_desc: String,
    #[serde(default)]
    pub route_url: String,
    #[serde(default)]
    pub route_color: String,
    #[serde(default)]
    pub route_text_color: String,
}

/// Display colors for a route badge, as `#RRGGBB`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteColors {
    pub background: String,
    pub text: String,
}

/// Result of resolving a raw realtime `route_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRoute<'a> {
    pub short_name: String,
    pub route: Option<&'a RouteRecord>,
}

#[derive(Debug, Default)]
pub struct RouteTable {
    records: Vec<RouteRecord>,
    by_id: HashMap<String, usize>,
    by_short_name: HashMap<String, Vec<usize>>,
    agency_ids: HashMap<String, String>,
}

impl RouteTable {
    /// An empty table; every lookup misses.
    pub fn empty() -> Self {
        let agency_ids = GTFS_AGENCY_IDS
            .iter()
            .map(|(key, id)| (key.to_string(), id.to_string()))
            .collect();
        RouteTable {
            agency_ids,
            ..Default::default()
        }
    }

    /// Loads the table from `path`, degrading to an empty table on failure.
    ///
    /// A missing reference file only costs display quality: callers fall back
    /// to the cleaned raw identifiers.
    #[tracing::instrument]
    pub fn load(path: &str) -> Self {
        match Self::from_path(path) {
            Ok(table) => {
                info!(routes = table.len(), "Route table loaded");
                table
            }
            Err(e) => {
                warn!(error = %e, "Failed to load route table, continuing without route data");
                Self::empty()
            }
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    /// Parses `routes.txt` content. Columns are matched by header name;
    /// rows that fail to parse are skipped.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = ReaderBuilder::new()
            .flexible(true)
            .trim(Trim::All)
            .from_reader(reader);

        let mut table = Self::empty();

        for (line, result) in rdr.deserialize::<RouteRecord>().enumerate() {
            match result {
                Ok(record) if !record.route_id.is_empty() => table.insert(record),
                Ok(_) => debug!(line, "Skipping route row without route_id"),
                Err(e) => debug!(line, error = %e, "Skipping malformed route row"),
            }
        }

        Ok(table)
    }

    fn insert(&mut self, record: RouteRecord) {
        let idx = self.records.len();
        self.by_id.insert(record.route_id.clone(), idx);
        if !record.route_short_name.is_empty() {
            self.by_short_name
                .entry(record.route_short_name.clone())
                .or_default()
                .push(idx);
        }
        self.records.push(record);
    }

    /// Overrides the route-table agency id used for `agency_key`.
    pub fn with_agency_id(mut self, agency_key: &str, gtfs_agency_id: &str) -> Self {
        self.agency_ids
            .insert(agency_key.to_string(), gtfs_agency_id.to_string());
        self
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, route_id: &str) -> Option<&RouteRecord> {
        self.by_id.get(route_id).map(|&idx| &self.records[idx])
    }

    pub fn by_short_name(&self, short_name: &str) -> Vec<&RouteRecord> {
        self.by_short_name
            .get(short_name)
            .map(|idxs| idxs.iter().map(|&idx| &self.records[idx]).collect())
            .unwrap_or_default()
    }

    /// Route-table agency id for an agency key; unknown keys map to themselves.
    pub fn gtfs_agency_id<'a>(&'a self, agency_key: &'a str) -> &'a str {
        self.agency_ids
            .get(agency_key)
            .map(String::as_str)
            .unwrap_or(agency_key)
    }

    /// Finds the best record for a short name.
    ///
    /// A single candidate wins outright; otherwise the candidate belonging to
    /// `agency` is preferred, then the first candidate.
    pub fn find_route(&self, short_name: &str, agency: Option<&str>) -> Option<&RouteRecord> {
        let candidates = self.by_short_name(short_name);

        match candidates.as_slice() {
            [] => None,
            [only] => Some(*only),
            [first, ..] => {
                if let Some(agency) = agency {
                    let gtfs_id = self.gtfs_agency_id(agency);
                    if let Some(found) = candidates.iter().find(|r| r.agency_id == gtfs_id) {
                        return Some(*found);
                    }
                }
                Some(*first)
            }
        }
    }

    /// Resolves a realtime `route_id`, which may carry an `<agency>_` prefix.
    ///
    /// Tries the raw id, then the id without its prefix, then the unprefixed
    /// value as a short name. When nothing matches, the unprefixed value is
    /// returned as the short name.
    pub fn parse_composite_route_id(&self, raw_id: &str, agency: Option<&str>) -> ResolvedRoute<'_> {
        if let Some(route) = self.get(raw_id) {
            return ResolvedRoute {
                short_name: route.route_short_name.clone(),
                route: Some(route),
            };
        }

        let without_prefix = raw_id.split_once('_').map_or(raw_id, |(_, rest)| rest);

        if let Some(route) = self.get(without_prefix) {
            return ResolvedRoute {
                short_name: route.route_short_name.clone(),
                route: Some(route),
            };
        }

        if let Some(route) = self.find_route(without_prefix, agency) {
            return ResolvedRoute {
                short_name: route.route_short_name.clone(),
                route: Some(route),
            };
        }

        let short_name = if without_prefix.is_empty() {
            raw_id
        } else {
            without_prefix
        };
        ResolvedRoute {
            short_name: short_name.to_string(),
            route: None,
        }
    }

    /// Label shown for a route: its short name, else long name, else id.
    pub fn display_name<'a>(&self, route: &'a RouteRecord) -> &'a str {
        [&route.route_short_name, &route.route_long_name]
            .into_iter()
            .find(|name| !name.is_empty())
            .map(String::as_str)
            .unwrap_or(&route.route_id)
    }

    pub fn colors(&self, route: &RouteRecord) -> RouteColors {
        let (palette_bg, palette_text) = AGENCY_PALETTE
            .iter()
            .find(|(id, _, _)| *id == route.agency_id)
            .map(|(_, bg, text)| (*bg, *text))
            .unwrap_or((DEFAULT_BACKGROUND, DEFAULT_TEXT));

        let route_color = route.route_color.trim();
        let background = if route_color.is_empty() {
            palette_bg.to_string()
        } else {
            format!("#{route_color}")
        };

        let text_color = route.route_text_color.trim();
        let text = if !text_color.is_empty() {
            format!("#{text_color}")
        } else if route_color.is_empty() {
            palette_text.to_string()
        } else {
            DEFAULT_TEXT.to_string()
        };

        RouteColors { background, text }
    }

    pub fn routes_for_agency(&self, agency_key: &str) -> Vec<&RouteRecord> {
        let gtfs_id = self.gtfs_agency_id(agency_key);
        self.records
            .iter()
            .filter(|r| r.agency_id == gtfs_id)
            .collect()
    }
}
