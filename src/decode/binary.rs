//! Protobuf decoder for binary GTFS-Realtime feeds.

use prost::Message;
use tracing::{debug, warn};

use super::{ActivePeriod, AlertDecoder, FeedFormat, GtfsAlertRecord, InformedEntity, RawRecord};
use crate::error::Result;
use crate::gtfs_rt::alert::{Cause, Effect};
use crate::gtfs_rt::{FeedEntity, FeedHeader, TranslatedString};

/// Wire-compatible view of [`FeedMessage`](crate::gtfs_rt::FeedMessage) that leaves each entity as raw
/// bytes, so a single malformed entity can be skipped.
#[derive(Clone, PartialEq, Message)]
struct LenientFeedMessage {
    #[prost(message, required, tag = "1")]
    header: FeedHeader,
    #[prost(bytes = "vec", repeated, tag = "2")]
    entity: Vec<Vec<u8>>,
}

/// Decodes binary GTFS-RT alert feeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProtobufDecoder;

impl AlertDecoder for ProtobufDecoder {
    fn format(&self) -> FeedFormat {
        FeedFormat::GtfsRtProtobuf
    }

    fn decode(&self, raw: &[u8]) -> Result<Vec<RawRecord>> {
        let feed = LenientFeedMessage::decode(raw)?;
        debug!(
            entity_count = feed.entity.len(),
            version = %feed.header.gtfs_realtime_version,
            "Protobuf feed decoded"
        );

        let mut records = Vec::with_capacity(feed.entity.len());

        for (index, bytes) in feed.entity.iter().enumerate() {
            let entity = match FeedEntity::decode(bytes.as_slice()) {
                Ok(entity) => entity,
                Err(e) => {
                    warn!(index, error = %e, "Skipping malformed feed entity");
                    continue;
                }
            };

            if let Some(record) = record_from_entity(&entity) {
                records.push(RawRecord::Gtfs(record));
            }
        }

        Ok(records)
    }
}

/// Extracts the alert carried by `entity`, if any.
pub fn record_from_entity(entity: &FeedEntity) -> Option<GtfsAlertRecord> {
    if entity.is_deleted.unwrap_or(false) {
        return None;
    }
    let alert = entity.alert.as_ref()?;

    Some(GtfsAlertRecord {
        entity_id: entity.id.clone(),
        header: first_translation(alert.header_text.as_ref()),
        description: first_translation(alert.description_text.as_ref()),
        url: first_translation(alert.url.as_ref()),
        active_periods: alert
            .active_period
            .iter()
            .map(|p| ActivePeriod {
                start: p.start,
                end: p.end,
            })
            .collect(),
        informed_entities: alert
            .informed_entity
            .iter()
            .map(|e| InformedEntity {
                route_id: e.route_id.clone().filter(|id| !id.is_empty()),
                route_type: e.route_type,
            })
            .collect(),
        cause: alert.cause.and_then(|c| Cause::try_from(c).ok()),
        effect: alert.effect.and_then(|e| Effect::try_from(e).ok()),
    })
}

fn first_translation(text: Option<&TranslatedString>) -> Option<String> {
    text?
        .translation
        .iter()
        .map(|t| t.text.trim())
        .find(|t| !t.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gtfs_rt::translated_string::Translation;
    use crate::gtfs_rt::{Alert, EntitySelector, FeedMessage, TimeRange};

    fn header() -> FeedHeader {
        FeedHeader {
            gtfs_realtime_version: "2.0".to_string(),
            incrementality: None,
            timestamp: Some(1234567890),
            feed_version: None,
        }
    }

    fn text(s: &str) -> TranslatedString {
        TranslatedString {
            translation: vec![Translation {
                text: s.to_string(),
                language: Some("en".to_string()),
            }],
        }
    }

    fn alert_entity(id: &str) -> FeedEntity {
        FeedEntity {
            id: id.to_string(),
            is_deleted: None,
            alert: Some(Alert {
                active_period: vec![TimeRange {
                    start: Some(1_700_000_000),
                    end: Some(1_700_003_600),
                }],
                informed_entity: vec![EntitySelector {
                    route_id: Some("1_100479".to_string()),
                    route_type: Some(3),
                    ..Default::default()
                }],
                cause: Some(Cause::Construction as i32),
                effect: Some(Effect::Detour as i32),
                url: None,
                header_text: Some(text("Route 7 detour")),
                description_text: Some(text("Route 7 is detoured around 3rd Ave")),
            }),
        }
    }

    #[test]
    fn test_empty_feed_has_no_records() {
        let records = ProtobufDecoder.decode(&[]).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_invalid_bytes_fail_the_feed() {
        let invalid_bytes = vec![0xFF, 0xFE, 0x00, 0x01];
        let err = ProtobufDecoder.decode(&invalid_bytes).unwrap_err();
        assert!(matches!(err, crate::AlertError::Protobuf(_)));
    }

    #[test]
    fn test_decode_alert_entity() {
        let feed = FeedMessage {
            header: header(),
            entity: vec![alert_entity("a1")],
        };
        let records = ProtobufDecoder.decode(&feed.encode_to_vec()).unwrap();
        assert_eq!(records.len(), 1);

        let RawRecord::Gtfs(record) = &records[0] else {
            panic!("expected a GTFS record");
        };
        assert_eq!(record.entity_id, "a1");
        assert_eq!(record.header.as_deref(), Some("Route 7 detour"));
        assert_eq!(record.cause, Some(Cause::Construction));
        assert_eq!(record.effect, Some(Effect::Detour));
        assert_eq!(record.active_periods[0].start, Some(1_700_000_000));
        assert_eq!(
            record.informed_entities[0].route_id.as_deref(),
            Some("1_100479")
        );
        assert!(record.url.is_none());
    }

    #[test]
    fn test_entities_without_alert_are_ignored() {
        let feed = FeedMessage {
            header: header(),
            entity: vec![
                FeedEntity {
                    id: "vehicle-only".to_string(),
                    ..Default::default()
                },
                FeedEntity {
                    is_deleted: Some(true),
                    ..alert_entity("deleted")
                },
                alert_entity("kept"),
            ],
        };
        let records = ProtobufDecoder.decode(&feed.encode_to_vec()).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_malformed_entity_is_skipped() {
        let good = FeedMessage {
            header: header(),
            entity: vec![alert_entity("good")],
        }
        .encode_to_vec();

        // field 2 (entity), length-delimited, 3 bytes of an unterminated varint
        let mut bytes = good.clone();
        bytes.extend_from_slice(&[0x12, 0x03, 0x08, 0xFF, 0xFF]);

        let records = ProtobufDecoder.decode(&bytes).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_first_translation_skips_blank_entries() {
        let ts = TranslatedString {
            translation: vec![
                Translation {
                    text: "  ".to_string(),
                    language: Some("es".to_string()),
                },
                Translation {
                    text: "Elevator outage".to_string(),
                    language: Some("en".to_string()),
                },
            ],
        };
        assert_eq!(
            first_translation(Some(&ts)).as_deref(),
            Some("Elevator outage")
        );
        assert_eq!(first_translation(None), None);
    }
}
