//! Reconciliation of observed trips against the active schedule.

use std::collections::{BTreeMap, HashMap};

use tracing::info;

use crate::analyzers::bucket::{OccurrenceBucket, bucket};
use crate::analyzers::types::{CoverageRow, Reconciliation, ReconciliationResult};
use crate::analyzers::utility::percentage;
use crate::join::{inner_join, left_join};
use crate::observation::VehicleObservation;
use crate::timetable::ScheduleTable;

/// Operator identity used for grouping.
type AgencyKey<'a> = (&'a str, &'a str);

/// Observed-trip tallies for one operator.
#[derive(Debug, Default, Clone, Copy)]
struct Histogram {
    buckets: [usize; OccurrenceBucket::ALL.len()],
    observed_trips: usize,
}

/// Reconciles one day of observations against an active schedule.
///
/// Every operator in `schedule` gets exactly one result row, with zero
/// buckets if none of its trips were seen. Observations whose trip is not in
/// the schedule are ignored.
#[tracing::instrument(skip_all, fields(services = schedule.services.len(), observations = observations.len()))]
pub fn reconcile(schedule: &ScheduleTable, observations: &[VehicleObservation]) -> Reconciliation {
    let mut timetable: BTreeMap<AgencyKey, usize> = BTreeMap::new();
    for service in &schedule.services {
        *timetable
            .entry((service.agency_id.as_str(), service.agency_name.as_str()))
            .or_default() += 1;
    }

    let observed = inner_join(
        "schedule-observations",
        &schedule.services,
        observations,
        |s| s.trip_id.as_str(),
        |o| o.trip_id.as_str(),
    );

    let mut occurrences: HashMap<(AgencyKey, &str), usize> = HashMap::new();
    for (service, _) in &observed.rows {
        let agency = (service.agency_id.as_str(), service.agency_name.as_str());
        *occurrences
            .entry((agency, service.trip_id.as_str()))
            .or_default() += 1;
    }

    let mut histograms: BTreeMap<AgencyKey, Histogram> = BTreeMap::new();
    for ((agency, _), count) in occurrences {
        let histogram = histograms.entry(agency).or_default();
        histogram.observed_trips += 1;
        if let Some(b) = bucket(count) {
            histogram.buckets[b.index()] += 1;
        }
    }

    let timetable: Vec<(AgencyKey, usize)> = timetable.into_iter().collect();
    let histograms: Vec<(AgencyKey, Histogram)> = histograms.into_iter().collect();
    let merged = left_join(
        "timetable-histogram",
        &timetable,
        &histograms,
        |(agency, _)| *agency,
        |(agency, _)| *agency,
    );

    let mut results = Vec::with_capacity(merged.rows.len());
    let mut coverage = Vec::with_capacity(merged.rows.len());
    for ((agency, timetable_trip_count), histogram) in &merged.rows {
        let (agency_id, agency_name) = *agency;
        let histogram = histogram.map(|(_, h)| *h).unwrap_or_default();

        results.push(ReconciliationResult {
            agency_id: agency_id.to_string(),
            agency_name: agency_name.to_string(),
            timetable_trip_count: *timetable_trip_count,
            bucket_1_10: histogram.buckets[OccurrenceBucket::OneToTen.index()],
            bucket_11_20: histogram.buckets[OccurrenceBucket::ElevenToTwenty.index()],
            bucket_21_50: histogram.buckets[OccurrenceBucket::TwentyOneToFifty.index()],
            bucket_51_1000: histogram.buckets[OccurrenceBucket::FiftyOneToThousand.index()],
        });
        coverage.push(CoverageRow {
            agency_id: agency_id.to_string(),
            agency_name: agency_name.to_string(),
            real: histogram.observed_trips,
            timetable: *timetable_trip_count,
            percentage_real_in_timetable: percentage(histogram.observed_trips, *timetable_trip_count),
        });
    }

    coverage.sort_by(|a, b| {
        a.percentage_real_in_timetable
            .total_cmp(&b.percentage_real_in_timetable)
            .then_with(|| a.agency_id.cmp(&b.agency_id))
            .then_with(|| a.agency_name.cmp(&b.agency_name))
    });

    info!(
        agencies = results.len(),
        observed_agencies = histograms.len(),
        matched_observations = observed.rows.len(),
        "Reconciliation complete"
    );

    Reconciliation {
        results,
        coverage,
        joins: vec![observed.stats, merged.stats],
    }
}
