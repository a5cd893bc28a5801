use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use prost::Message;

use transit_alerts::aggregator::Aggregator;
use transit_alerts::config::{AgencyConfig, AppConfig};
use transit_alerts::decode::{
    AlertDecoder, BulletinDecoder, DecoderRegistry, JsonDecoder, ProtobufDecoder, RawRecord,
};
use transit_alerts::fetch::FeedFetcher;
use transit_alerts::gtfs_rt::alert::{Cause, Effect};
use transit_alerts::gtfs_rt::translated_string::Translation;
use transit_alerts::gtfs_rt::{
    Alert, EntitySelector, FeedEntity, FeedHeader, FeedMessage, TimeRange, TranslatedString,
};
use transit_alerts::mapper::AlertMapper;
use transit_alerts::model::{AlertType, ServiceAlert, ServiceMode, Severity};
use transit_alerts::routes::RouteTable;
use transit_alerts::{AlertError, Result};

const ROUTES: &str = include_str!("fixtures/routes.txt");
const SOUND_TRANSIT: &[u8] = include_bytes!("fixtures/sound_transit.json");
const WSF_BULLETINS: &[u8] = include_bytes!("fixtures/wsf_bulletins.json");

fn mapper() -> AlertMapper {
    AlertMapper::new(Arc::new(
        RouteTable::from_reader(ROUTES.as_bytes()).expect("Failed to load routes"),
    ))
}

fn agency(id: &str) -> AgencyConfig {
    AppConfig::puget_sound()
        .agency(id)
        .expect("Unknown agency")
        .clone()
}

fn text(s: &str) -> Option<TranslatedString> {
    Some(TranslatedString {
        translation: vec![Translation {
            text: s.to_string(),
            language: Some("en".to_string()),
        }],
    })
}

/// The binary encoding of entity `st-1001` from the JSON fixture.
fn sound_transit_binary() -> Vec<u8> {
    let selector = |route_id: &str, route_type: i32| EntitySelector {
        agency_id: Some("40".to_string()),
        route_id: Some(route_id.to_string()),
        route_type: Some(route_type),
        ..Default::default()
    };

    FeedMessage {
        header: FeedHeader {
            gtfs_realtime_version: "2.0".to_string(),
            timestamp: Some(1_700_040_000),
            ..Default::default()
        },
        entity: vec![FeedEntity {
            id: "st-1001".to_string(),
            is_deleted: None,
            alert: Some(Alert {
                active_period: vec![TimeRange {
                    start: Some(1_700_000_000),
                    end: Some(1_700_086_400),
                }],
                informed_entity: vec![selector("40_100479", 1), selector("40_S1", 2)],
                cause: Some(Cause::Construction as i32),
                effect: Some(Effect::SignificantDelays as i32),
                url: text("https://www.soundtransit.org/alerts/1001"),
                header_text: text("1 Line delays near SODO"),
                description_text: text("Trains are running 15 minutes late due to track work."),
            }),
        }],
    }
    .encode_to_vec()
}

fn map_all(decoder: &dyn AlertDecoder, agency: &AgencyConfig, raw: &[u8], now: DateTime<Utc>) -> Vec<ServiceAlert> {
    let mapper = mapper();
    decoder
        .decode(raw)
        .expect("Failed to decode feed")
        .iter()
        .map(|record| mapper.map(agency, record, now))
        .collect()
}

#[test]
fn test_binary_and_json_paths_agree() {
    let agency = agency("sound-transit");
    let now = Utc.timestamp_opt(1_700_040_000, 0).unwrap();

    let from_binary = map_all(&ProtobufDecoder, &agency, &sound_transit_binary(), now);
    let from_json = map_all(&JsonDecoder, &agency, SOUND_TRANSIT, now);

    let json_alert = from_json
        .iter()
        .find(|a| a.id == "sound-transit-st-1001")
        .expect("JSON alert missing");
    assert_eq!(from_binary.len(), 1);
    assert_eq!(&from_binary[0], json_alert);

    assert_eq!(json_alert.severity, Severity::High);
    assert_eq!(json_alert.alert_type, AlertType::Delay);
    assert_eq!(json_alert.affected_routes, vec!["1 Line", "S Line"]);
    assert_eq!(
        json_alert.affected_services,
        vec![ServiceMode::LightRail, ServiceMode::CommuterRail]
    );
    assert_eq!(
        json_alert.url.as_deref(),
        Some("https://www.soundtransit.org/alerts/1001")
    );
    assert!(json_alert.is_active);
}

#[test]
fn test_json_feed_skips_bad_entities() {
    let agency = agency("sound-transit");
    let now = Utc.timestamp_opt(1_700_040_000, 0).unwrap();
    let alerts = map_all(&JsonDecoder, &agency, SOUND_TRANSIT, now);

    let ids: Vec<_> = alerts.iter().map(|a| a.id.as_str()).collect();
    assert_eq!(ids, vec!["sound-transit-st-1001", "sound-transit-st-1002"]);

    let suspended = &alerts[1];
    assert_eq!(suspended.severity, Severity::Critical);
    assert_eq!(suspended.alert_type, AlertType::Cancellation);
    assert_eq!(suspended.affected_routes, vec!["Multiple Routes"]);
    assert_eq!(suspended.affected_services, agency.services);
    assert_eq!(suspended.description, suspended.title);
    assert_eq!(suspended.url.as_deref(), Some(agency.alerts_url.as_str()));
}

#[test]
fn test_ferry_bulletins() {
    let agency = agency("washington-state-ferries");
    let now = Utc.with_ymd_and_hms(2024, 1, 2, 12, 0, 0).unwrap();
    let decoder = BulletinDecoder::from_agency(&agency).unwrap();
    let mapper = mapper();

    let alerts: Vec<ServiceAlert> = decoder
        .decode_at(WSF_BULLETINS, now)
        .unwrap()
        .iter()
        .map(|record| mapper.map(&agency, record, now))
        .collect();

    let ids: Vec<_> = alerts.iter().map(|a| a.id.as_str()).collect();
    assert_eq!(
        ids,
        vec![
            "washington-state-ferries-501",
            "washington-state-ferries-502",
            "washington-state-ferries-505",
        ]
    );

    let delayed = &alerts[0];
    assert_eq!(delayed.alert_type, AlertType::Delay);
    assert_eq!(delayed.severity, Severity::High);
    assert_eq!(delayed.affected_services, vec![ServiceMode::Ferry]);
    assert_eq!(delayed.affected_routes, vec!["Ferry Routes"]);
    assert_eq!(delayed.title, "Sailings delayed 30 min due to mechanical issue");
    assert_eq!(
        delayed.start_time,
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    );

    let cancelled = &alerts[1];
    assert_eq!(cancelled.alert_type, AlertType::Cancellation);
    assert_eq!(cancelled.severity, Severity::Critical);
    assert_eq!(cancelled.affected_routes, vec!["Seattle Bainbridge"]);
    assert_eq!(
        cancelled.title,
        "Seattle-Bainbridge: 7:55 PM sailing cancelled due to crew shortage"
    );
    assert_eq!(
        cancelled.start_time,
        Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap()
    );
    assert_eq!(
        cancelled.end_time,
        Some(Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap())
    );

    let reminder = &alerts[2];
    assert_eq!(reminder.severity, Severity::Low);
    assert_eq!(reminder.affected_routes, vec!["Anacortes"]);
    // publish date more than a year old is discarded
    assert_eq!(reminder.start_time, now);
}

struct FixtureFetcher {
    payloads: HashMap<String, Vec<u8>>,
}

#[async_trait]
impl FeedFetcher for FixtureFetcher {
    async fn fetch(&self, agency: &AgencyConfig) -> Result<Vec<u8>> {
        match self.payloads.get(&agency.id) {
            Some(bytes) => Ok(bytes.clone()),
            None => Err(AlertError::Status {
                status: 502,
                url: agency.feed_url.clone(),
            }),
        }
    }
}

#[tokio::test]
async fn test_aggregation_survives_one_failing_agency() {
    let config = AppConfig::puget_sound();
    let registry = DecoderRegistry::from_agencies(&config.agencies).unwrap();
    let fetcher = FixtureFetcher {
        payloads: HashMap::from([
            ("sound-transit".to_string(), SOUND_TRANSIT.to_vec()),
            ("king-county-metro".to_string(), sound_transit_binary()),
            ("washington-state-ferries".to_string(), WSF_BULLETINS.to_vec()),
        ]),
    };
    let aggregator = Aggregator::new(config.agencies, registry, mapper(), Arc::new(fetcher));

    let report = aggregator.fetch_all().await;

    let agencies: Vec<_> = report
        .alerts
        .iter()
        .map(|a| a.affected_agencies[0].as_str())
        .collect();
    assert_eq!(
        agencies,
        vec![
            "sound-transit",
            "sound-transit",
            "king-county-metro",
            "community-transit",
            "washington-state-ferries",
            "washington-state-ferries",
            "washington-state-ferries",
        ]
    );

    let failed = &report.statuses["community-transit"];
    assert!(!failed.has_live_data);
    assert_eq!(
        failed.error.as_deref(),
        Some("HTTP 502 from https://s3.amazonaws.com/commtrans-realtime-prod/alerts.pb")
    );
    assert!(report.alerts[3].is_placeholder());
    assert_eq!(report.alerts[3].title, "No Community Transit Service Alerts");

    assert_eq!(report.statuses["sound-transit"].alert_count, 2);
    assert_eq!(report.statuses["king-county-metro"].alert_count, 1);
    assert_eq!(report.statuses["washington-state-ferries"].alert_count, 3);
    assert!(report.has_live_data());

    assert_eq!(report.stats.total, 6);
    assert_eq!(report.stats.by_agency.get("community-transit"), None);
    assert_eq!(report.stats.by_service[&ServiceMode::Ferry], 3);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["alerts"][0]["alertType"], "delay");
    assert_eq!(json["statuses"]["community-transit"]["hasLiveData"], false);
}

#[test]
fn test_registry_dispatches_by_agency() {
    let config = AppConfig::puget_sound();
    let registry = DecoderRegistry::from_agencies(&config.agencies).unwrap();
    for agency in &config.agencies {
        let decoder = registry.get(&agency.id).expect("Agency without decoder");
        assert_eq!(decoder.format(), agency.format);
    }

    let decoder = registry.get("washington-state-ferries").unwrap();
    let records = decoder.decode(WSF_BULLETINS).unwrap();
    assert!(records.iter().all(|r| matches!(r, RawRecord::Bulletin(_))));

    assert!(registry.get("amtrak").is_none());
}
