//! Protobuf decoding of GTFS Realtime vehicle-position feeds.

use prost::Message;
use tracing::trace;

use crate::error::PipelineError;
use crate::gtfs_rt::FeedMessage;
use crate::observation::VehicleObservation;

/// Decodes a protobuf-encoded GTFS-RT [`FeedMessage`] from raw bytes.
///
/// # Errors
///
/// Returns [`PipelineError::Decode`] if the bytes are not valid protobuf for a `FeedMessage`.
pub fn parse_feed(bytes: &[u8]) -> Result<FeedMessage, PipelineError> {
    Ok(FeedMessage::decode(bytes)?)
}

/// Decodes one snapshot payload into vehicle observations.
///
/// Entities that carry no vehicle position are skipped; they are not an error.
pub fn decode_observations(bytes: &[u8]) -> Result<Vec<VehicleObservation>, PipelineError> {
    let feed = parse_feed(bytes)?;

    let mut observations = Vec::with_capacity(feed.entity.len());
    for entity in &feed.entity {
        match VehicleObservation::from_entity(entity) {
            Ok(obs) => observations.push(obs),
            Err(reason) => trace!(entity_id = %entity.id, ?reason, "Entity skipped"),
        }
    }

    Ok(observations)
}
