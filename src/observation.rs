//! The typed vehicle observation record and its columnar schema.

use std::path::Path;
use std::sync::{Arc, LazyLock};

use arrow::array::{Array, ArrayRef, Float32Array, Float64Array, StringArray, UInt64Array};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use serde::Serialize;

use crate::error::PipelineError;
use crate::gtfs_rt::FeedEntity;

/// Decimal places kept on coordinates (~1.1 m at the equator).
pub const COORDINATE_PRECISION: i32 = 5;

/// One vehicle position report taken from a feed entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehicleObservation {
    pub entity_id: String,
    pub trip_id: String,
    pub route_id: String,
    pub start_date: String,
    pub start_time: String,
    pub lat: f64,
    pub lon: f64,
    pub bearing: Option<f32>,
    pub timestamp: u64,
    pub vehicle_id: String,
}

/// Why a feed entity produced no observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntitySkip {
    NoVehiclePosition,
}

/// Rounds a coordinate to [`COORDINATE_PRECISION`] decimal places.
///
/// Idempotent: rounding an already rounded value returns it unchanged.
pub fn round_coordinate(value: f64) -> f64 {
    let scale = 10f64.powi(COORDINATE_PRECISION);
    let rounded = (value * scale).round() / scale;
    // fold -0.0 into 0.0 so both hash to the same key
    if rounded == 0.0 { 0.0 } else { rounded }
}

impl VehicleObservation {
    /// Builds an observation from a feed entity.
    ///
    /// Absent trip, position and vehicle descriptors fall back to protobuf
    /// defaults; only a missing vehicle-position message is a skip.
    pub fn from_entity(entity: &FeedEntity) -> Result<Self, EntitySkip> {
        let vehicle = entity.vehicle.as_ref().ok_or(EntitySkip::NoVehiclePosition)?;

        let trip = vehicle.trip.as_ref();
        let position = vehicle.position.as_ref();

        Ok(VehicleObservation {
            entity_id: entity.id.clone(),
            trip_id: trip.map(|t| t.trip_id().to_string()).unwrap_or_default(),
            route_id: trip.map(|t| t.route_id().to_string()).unwrap_or_default(),
            start_date: trip.map(|t| t.start_date().to_string()).unwrap_or_default(),
            start_time: trip.map(|t| t.start_time().to_string()).unwrap_or_default(),
            lat: round_coordinate(position.map(|p| f64::from(p.latitude)).unwrap_or_default()),
            lon: round_coordinate(position.map(|p| f64::from(p.longitude)).unwrap_or_default()),
            bearing: position.and_then(|p| p.bearing),
            timestamp: vehicle.timestamp.unwrap_or_default(),
            vehicle_id: vehicle
                .vehicle
                .as_ref()
                .map(|v| v.id().to_string())
                .unwrap_or_default(),
        })
    }

    /// Re-applies coordinate rounding; a no-op on freshly decoded records.
    pub fn normalized(mut self) -> Self {
        self.lat = round_coordinate(self.lat);
        self.lon = round_coordinate(self.lon);
        self
    }

    /// Identity of this observation for deduplication.
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            trip_id: self.trip_id.clone(),
            route_id: self.route_id.clone(),
            start_date: self.start_date.clone(),
            start_time: self.start_time.clone(),
            timestamp: self.timestamp,
            vehicle_id: self.vehicle_id.clone(),
            lat_bits: round_coordinate(self.lat).to_bits(),
            lon_bits: round_coordinate(self.lon).to_bits(),
        }
    }
}

/// Composite identity of an observation. `entity_id` and `bearing` are not part of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DedupKey {
    pub trip_id: String,
    pub route_id: String,
    pub start_date: String,
    pub start_time: String,
    pub timestamp: u64,
    pub vehicle_id: String,
    lat_bits: u64,
    lon_bits: u64,
}

static OBSERVATION_SCHEMA: LazyLock<SchemaRef> = LazyLock::new(|| {
    Arc::new(Schema::new(vec![
        Field::new("entity_id", DataType::Utf8, false),
        Field::new("trip_id", DataType::Utf8, false),
        Field::new("route_id", DataType::Utf8, false),
        Field::new("start_date", DataType::Utf8, false),
        Field::new("start_time", DataType::Utf8, false),
        Field::new("lat", DataType::Float64, false),
        Field::new("lon", DataType::Float64, false),
        Field::new("bearing", DataType::Float32, true),
        Field::new("timestamp", DataType::UInt64, false),
        Field::new("vehicle_id", DataType::Utf8, false),
    ]))
});

/// Arrow schema shared by part-files and the consolidated dataset.
pub fn observation_schema() -> SchemaRef {
    OBSERVATION_SCHEMA.clone()
}

/// Packs observations into a single record batch.
pub fn to_record_batch(rows: &[VehicleObservation]) -> Result<RecordBatch, PipelineError> {
    macro_rules! utf8_column {
        ($field:ident) => {
            Arc::new(StringArray::from(
                rows.iter().map(|r| r.$field.as_str()).collect::<Vec<_>>(),
            )) as ArrayRef
        };
    }

    let columns: Vec<ArrayRef> = vec![
        utf8_column!(entity_id),
        utf8_column!(trip_id),
        utf8_column!(route_id),
        utf8_column!(start_date),
        utf8_column!(start_time),
        Arc::new(Float64Array::from(rows.iter().map(|r| r.lat).collect::<Vec<_>>())),
        Arc::new(Float64Array::from(rows.iter().map(|r| r.lon).collect::<Vec<_>>())),
        Arc::new(Float32Array::from(rows.iter().map(|r| r.bearing).collect::<Vec<_>>())),
        Arc::new(UInt64Array::from(rows.iter().map(|r| r.timestamp).collect::<Vec<_>>())),
        utf8_column!(vehicle_id),
    ];

    Ok(RecordBatch::try_new(observation_schema(), columns)?)
}

fn column<'a, T: 'static>(
    batch: &'a RecordBatch,
    name: &'static str,
    path: &Path,
) -> Result<&'a T, PipelineError> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| PipelineError::Schema {
            path: path.to_path_buf(),
            column: name,
        })
}

/// Unpacks a record batch read from `path`, appending the rows to `out`.
pub fn extend_from_record_batch(
    batch: &RecordBatch,
    path: &Path,
    out: &mut Vec<VehicleObservation>,
) -> Result<(), PipelineError> {
    let entity_id = column::<StringArray>(batch, "entity_id", path)?;
    let trip_id = column::<StringArray>(batch, "trip_id", path)?;
    let route_id = column::<StringArray>(batch, "route_id", path)?;
    let start_date = column::<StringArray>(batch, "start_date", path)?;
    let start_time = column::<StringArray>(batch, "start_time", path)?;
    let lat = column::<Float64Array>(batch, "lat", path)?;
    let lon = column::<Float64Array>(batch, "lon", path)?;
    let bearing = column::<Float32Array>(batch, "bearing", path)?;
    let timestamp = column::<UInt64Array>(batch, "timestamp", path)?;
    let vehicle_id = column::<StringArray>(batch, "vehicle_id", path)?;

    for i in 0..batch.num_rows() {
        out.push(VehicleObservation {
            entity_id: entity_id.value(i).to_string(),
            trip_id: trip_id.value(i).to_string(),
            route_id: route_id.value(i).to_string(),
            start_date: start_date.value(i).to_string(),
            start_time: start_time.value(i).to_string(),
            lat: lat.value(i),
            lon: lon.value(i),
            bearing: if bearing.is_null(i) {
                None
            } else {
                Some(bearing.value(i))
            },
            timestamp: timestamp.value(i),
            vehicle_id: vehicle_id.value(i).to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::gtfs_rt::{
        FeedEntity, Position, TripDescriptor, VehicleDescriptor, VehiclePosition,
    };

    /// Observation fixture shared by the dedup and reconcile tests.
    pub(crate) fn observation(trip_id: &str, timestamp: u64) -> VehicleObservation {
        VehicleObservation {
            entity_id: format!("e-{trip_id}-{timestamp}"),
            trip_id: trip_id.to_string(),
            route_id: "R1".to_string(),
            start_date: "20250707".to_string(),
            start_time: "08:00:00".to_string(),
            lat: 54.97783,
            lon: -1.61296,
            bearing: Some(90.0),
            timestamp,
            vehicle_id: "V1".to_string(),
        }
    }

    #[test]
    fn test_round_coordinate_is_stable() {
        for raw in [51.507351_f64, -0.127758, 53.4808123456, 0.000004, -0.000004, 179.999995] {
            let once = round_coordinate(raw);
            assert_eq!(round_coordinate(once), once);
            assert_eq!(round_coordinate(raw).to_bits(), once.to_bits());
        }
        assert_eq!(round_coordinate(51.5073519), 51.50735);
        assert_eq!(round_coordinate(-0.000004).to_bits(), 0.0f64.to_bits());
    }

    #[test]
    fn test_from_entity_without_vehicle_is_skipped() {
        let entity = FeedEntity {
            id: "alert-only".to_string(),
            ..Default::default()
        };
        assert_eq!(
            VehicleObservation::from_entity(&entity),
            Err(EntitySkip::NoVehiclePosition)
        );
    }

    #[test]
    fn test_from_entity_populates_fields() {
        let entity = FeedEntity {
            id: "42".to_string(),
            is_deleted: None,
            vehicle: Some(VehiclePosition {
                trip: Some(TripDescriptor {
                    trip_id: Some("VJ_1".to_string()),
                    route_id: Some("R_9".to_string()),
                    start_date: Some("20250707".to_string()),
                    start_time: Some("07:15:00".to_string()),
                    ..Default::default()
                }),
                vehicle: Some(VehicleDescriptor {
                    id: Some("BUS-7".to_string()),
                    ..Default::default()
                }),
                position: Some(Position {
                    latitude: 54.9778,
                    longitude: -1.6129,
                    bearing: Some(270.0),
                    odometer: None,
                    speed: None,
                }),
                timestamp: Some(1_751_872_500),
                ..Default::default()
            }),
        };

        let obs = VehicleObservation::from_entity(&entity).unwrap();
        assert_eq!(obs.entity_id, "42");
        assert_eq!(obs.trip_id, "VJ_1");
        assert_eq!(obs.route_id, "R_9");
        assert_eq!(obs.start_date, "20250707");
        assert_eq!(obs.start_time, "07:15:00");
        assert_eq!(obs.lat, round_coordinate(f64::from(54.9778_f32)));
        assert_eq!(obs.lon, round_coordinate(f64::from(-1.6129_f32)));
        assert_eq!(obs.bearing, Some(270.0));
        assert_eq!(obs.timestamp, 1_751_872_500);
        assert_eq!(obs.vehicle_id, "BUS-7");
    }

    #[test]
    fn test_from_entity_defaults_missing_descriptors() {
        let entity = FeedEntity {
            id: "bare".to_string(),
            vehicle: Some(VehiclePosition::default()),
            ..Default::default()
        };
        let obs = VehicleObservation::from_entity(&entity).unwrap();
        assert_eq!(obs.trip_id, "");
        assert_eq!(obs.lat, 0.0);
        assert_eq!(obs.bearing, None);
        assert_eq!(obs.timestamp, 0);
    }

    #[test]
    fn test_dedup_key_ignores_entity_id_and_bearing() {
        let a = observation("T1", 100);
        let mut b = a.clone();
        b.entity_id = "other".to_string();
        b.bearing = Some(12.5);
        assert_eq!(a.dedup_key(), b.dedup_key());

        let mut c = a.clone();
        c.lat += 0.00002;
        assert_ne!(a.dedup_key(), c.dedup_key());
    }

    #[test]
    fn test_record_batch_preserves_rows() {
        let mut with_null = observation("T2", 200);
        with_null.bearing = None;
        let rows = vec![observation("T1", 100), with_null];

        let batch = to_record_batch(&rows).unwrap();
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.schema(), observation_schema());

        let mut back = Vec::new();
        extend_from_record_batch(&batch, Path::new("mem"), &mut back).unwrap();
        assert_eq!(back, rows);
    }
}
