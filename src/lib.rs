//! Aggregation of transit service alerts from agencies publishing binary
//! GTFS-Realtime, GTFS-Realtime JSON, or HTML bulletin feeds, normalized
//! into a single [`ServiceAlert`](model::ServiceAlert) schema.

pub mod aggregator;
pub mod config;
pub mod decode;
pub mod error;
pub mod fetch;
pub mod mapper;
pub mod model;
pub mod output;
pub mod routes;
pub mod stats;

pub mod gtfs_rt {
    include!(concat!(env!("OUT_DIR"), "/transit_realtime.rs"));
}

pub use error::{AlertError, Result};
