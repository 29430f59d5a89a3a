pub mod analyzers;
pub mod config;
pub mod converter;
pub mod dedup;
pub mod error;
pub mod ingest;
pub mod join;
pub mod observation;
pub mod output;
pub mod parser;
pub mod snapshot;
pub mod stats;
pub mod timetable;

pub mod gtfs_rt {
    include!(concat!(env!("OUT_DIR"), "/transit_realtime.rs"));
}
