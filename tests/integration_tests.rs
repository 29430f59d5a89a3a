use std::fs;
use std::io::{Cursor, Write};
use std::path::PathBuf;

use chrono::NaiveDate;
use gtfs_rt_reconcile::analyzers::analyzer::analyze_for_date;
use gtfs_rt_reconcile::config::PipelineConfig;
use gtfs_rt_reconcile::error::PipelineError;
use gtfs_rt_reconcile::gtfs_rt::{
    FeedEntity, FeedHeader, FeedMessage, Position, TripDescriptor, VehicleDescriptor,
    VehiclePosition,
};
use gtfs_rt_reconcile::ingest::ingest_for_date;
use gtfs_rt_reconcile::output::read_observations;
use prost::Message;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "gtfs_rt_reconcile_it_{}_{}",
        name,
        std::process::id()
    ));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn zip_bytes(members: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, bytes) in members {
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(bytes).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

fn vehicle(id: &str, trip_id: &str, timestamp: u64, lat: f32) -> FeedEntity {
    FeedEntity {
        id: id.to_string(),
        is_deleted: None,
        vehicle: Some(VehiclePosition {
            trip: Some(TripDescriptor {
                trip_id: Some(trip_id.to_string()),
                route_id: Some("R1".to_string()),
                start_date: Some("20250707".to_string()),
                start_time: Some("07:30:00".to_string()),
                ..Default::default()
            }),
            vehicle: Some(VehicleDescriptor {
                id: Some(format!("bus-{trip_id}")),
                ..Default::default()
            }),
            position: Some(Position {
                latitude: lat,
                longitude: -1.6,
                bearing: Some(180.0),
                odometer: None,
                speed: None,
            }),
            timestamp: Some(timestamp),
            ..Default::default()
        }),
    }
}

fn feed(entity: Vec<FeedEntity>) -> Vec<u8> {
    FeedMessage {
        header: FeedHeader {
            gtfs_realtime_version: "2.0".to_string(),
            timestamp: Some(1_751_873_000),
            incrementality: None,
            feed_version: None,
        },
        entity,
    }
    .encode_to_vec()
}

const AGENCY: &str = "agency_id,agency_name\nOP1,Go North East\nOP2,Stagecoach\n";
const ROUTES: &str = "route_id,agency_id,route_short_name\nR1,OP1,21\nR2,OP2,X9\n";
const TRIPS: &str = "route_id,service_id,trip_id\n\
    R1,WK,T1\nR1,WK,T2\nR2,WK,T3\nR2,WK,T4\nR2,WK,T5\nR2,WK,T6\nR2,WK,T7\n";
const CALENDAR: &str = "service_id,monday,tuesday,wednesday,thursday,friday,saturday,sunday,start_date,end_date\n\
    WK,1,1,1,1,1,0,0,20250101,20251231\n";

fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 7, 7).unwrap()
}

/// Lays out one day of realtime snapshots and a north_east timetable under `root`.
fn seed_archive(config: &PipelineConfig) {
    // T1 seen in every snapshot, T2 only in the last; a bare entity and a
    // snapshot without the payload member are skipped
    let snapshots: Vec<Vec<u8>> = (0..12u64)
        .map(|i| {
            let mut entity = vec![
                vehicle(&format!("e{i}"), "T1", 1_751_870_000 + i * 30, 54.97 + i as f32 * 0.001),
                FeedEntity {
                    id: format!("alert{i}"),
                    ..Default::default()
                },
            ];
            if i == 11 {
                entity.push(vehicle("late", "T2", 1_751_870_400, 54.9));
            }
            feed(entity)
        })
        .collect();

    let inner: Vec<Vec<u8>> = snapshots
        .iter()
        .map(|payload| zip_bytes(&[("gtfsrt.bin", payload.as_slice())]))
        .collect();
    let names: Vec<String> = (0..inner.len())
        .map(|i| format!("gtfsrt-20250707T0730{i:02}.zip"))
        .collect();
    let wrong_member = zip_bytes(&[("other.bin", b"".as_slice())]);
    let mut members: Vec<(&str, &[u8])> = names
        .iter()
        .zip(&inner)
        .map(|(n, b)| (n.as_str(), b.as_slice()))
        .collect();
    // the first snapshot captured twice under another name
    members.push(("gtfsrt-20250707T073000-retry.zip", inner[0].as_slice()));
    members.push(("gtfsrt-20250707T080000.zip", wrong_member.as_slice()));

    let realtime = config.realtime_archive(monday());
    fs::create_dir_all(realtime.parent().unwrap()).unwrap();
    fs::write(&realtime, zip_bytes(&members)).unwrap();

    let timetable = config.schedule_archive("north_east", monday());
    fs::create_dir_all(timetable.parent().unwrap()).unwrap();
    fs::write(
        &timetable,
        zip_bytes(&[
            ("agency.txt", AGENCY.as_bytes()),
            ("routes.txt", ROUTES.as_bytes()),
            ("trips.txt", TRIPS.as_bytes()),
            ("calendar.txt", CALENDAR.as_bytes()),
        ]),
    )
    .unwrap();
}

#[tokio::test]
async fn test_full_pipeline() {
    let root = temp_dir("full_pipeline");
    let mut config = PipelineConfig::new(&root);
    config.regions = vec!["north_east".to_string()];
    config.convert.batch_size = 5;
    config.convert.max_in_flight = 3;
    seed_archive(&config);

    let ingest = ingest_for_date(&config, monday()).await.unwrap();

    assert_eq!(ingest.conversion.snapshots_read, 14);
    assert_eq!(ingest.conversion.snapshots_skipped, 1);
    assert!(ingest.conversion.parts.len() >= 2);
    assert_eq!(ingest.consolidation.input_rows, 14);
    assert_eq!(ingest.consolidation.output_rows, 13);
    assert!(!config.staging_dir_for(monday()).exists());

    let rows = read_observations(&config.consolidated_dataset(monday())).unwrap();
    assert_eq!(rows.len(), 13);

    let index = analyze_for_date(&config, monday()).unwrap();
    assert_eq!(index.observations, 13);

    let performance = fs::read_to_string(config.performance_report("north_east", monday())).unwrap();
    assert_eq!(
        performance,
        "agency_id,agency_name,timetable,1-10,11-20,21-50,51-1000\n\
         OP1,Go North East,2,1,1,0,0\n\
         OP2,Stagecoach,5,0,0,0,0\n"
    );

    let coverage = fs::read_to_string(config.coverage_report("north_east", monday())).unwrap();
    let lines: Vec<_> = coverage.lines().collect();
    assert_eq!(lines[1], "OP2,Stagecoach,0,5,0.0");
    assert_eq!(lines[2], "OP1,Go North East,2,2,100.0");

    assert!(config.report_index(monday()).exists());

    fs::remove_dir_all(&root).unwrap();
}

#[tokio::test]
async fn test_reingesting_a_day_is_stable() {
    let root = temp_dir("reingest");
    let mut config = PipelineConfig::new(&root);
    config.regions = vec!["north_east".to_string()];
    seed_archive(&config);

    ingest_for_date(&config, monday()).await.unwrap();
    let first = read_observations(&config.consolidated_dataset(monday())).unwrap();

    fs::remove_file(config.consolidated_dataset(monday())).unwrap();
    ingest_for_date(&config, monday()).await.unwrap();
    let second = read_observations(&config.consolidated_dataset(monday())).unwrap();

    assert_eq!(first, second);

    fs::remove_dir_all(&root).unwrap();
}

#[test]
fn test_reconcile_before_ingest_asks_for_ingestion() {
    let root = temp_dir("reconcile_first");
    let config = PipelineConfig::new(&root);

    let err = analyze_for_date(&config, monday()).unwrap_err();
    assert!(matches!(err, PipelineError::MissingData { .. }));
    assert!(err.to_string().contains("run ingestion for this date first"));

    fs::remove_dir_all(&root).unwrap();
}
