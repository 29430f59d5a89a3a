//! Field-presence counts for one decoded feed, reported by the `decode` command.

use serde::Serialize;

use crate::gtfs_rt::FeedMessage;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct FeedStats {
    pub gtfs_realtime_version: String,
    pub header_timestamp: Option<u64>,
    pub total_entities: usize,
    pub deleted_entities: usize,

    // entities the pipeline turns into observations
    pub vehicles: usize,

    // vehicle fields
    pub with_trip: usize,
    pub with_trip_id: usize,
    pub with_start_date: usize,
    pub with_vehicle_id: usize,
    pub with_position: usize,
    pub with_bearing: usize,
    pub with_speed: usize,
    pub with_odometer: usize,
    pub with_current_stop_sequence: usize,
    pub with_stop_id: usize,
    pub with_timestamp: usize,
}

impl FeedStats {
    pub fn from_feed(feed: &FeedMessage) -> Self {
        let mut s = FeedStats {
            gtfs_realtime_version: feed.header.gtfs_realtime_version.clone(),
            header_timestamp: feed.header.timestamp,
            total_entities: feed.entity.len(),
            ..Default::default()
        };

        for e in &feed.entity {
            if e.is_deleted() {
                s.deleted_entities += 1;
            }

            let Some(v) = &e.vehicle else {
                continue;
            };
            s.vehicles += 1;

            if let Some(trip) = &v.trip {
                s.with_trip += 1;
                if trip.trip_id.is_some() {
                    s.with_trip_id += 1;
                }
                if trip.start_date.is_some() {
                    s.with_start_date += 1;
                }
            }

            if v.vehicle.as_ref().is_some_and(|d| d.id.is_some()) {
                s.with_vehicle_id += 1;
            }

            if let Some(pos) = &v.position {
                s.with_position += 1;

                if pos.bearing.is_some() {
                    s.with_bearing += 1;
                }

                if pos.speed.is_some() {
                    s.with_speed += 1;
                }

                if pos.odometer.is_some() {
                    s.with_odometer += 1;
                }
            }

            if v.current_stop_sequence.is_some() {
                s.with_current_stop_sequence += 1;
            }

            if v.stop_id.is_some() {
                s.with_stop_id += 1;
            }

            if v.timestamp.is_some() {
                s.with_timestamp += 1;
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

    /// Entities skipped by the decoder because they carry no vehicle position.
    pub fn skipped_entities(&self) -> usize {
        self.total_entities - self.vehicles
    }

    pub fn trip_id_pct(&self) -> f64 {
        Self::pct(self.with_trip_id, self.vehicles)
    }

    pub fn bearing_pct(&self) -> f64 {
        Self::pct(self.with_bearing, self.vehicles)
    }
}
