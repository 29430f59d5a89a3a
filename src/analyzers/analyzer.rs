use chrono::{NaiveDate, Utc};
use tracing::info;

use crate::analyzers::reconcile::reconcile;
use crate::analyzers::report::{write_coverage_report, write_json, write_performance_report};
use crate::analyzers::types::{ReconciliationIndex, RegionSummary};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::output::read_observations;
use crate::timetable;

/// Reconciles a day's consolidated observations against every configured
/// region's timetable, writes the per-region reports, then the run index.
///
/// # Errors
///
/// [`PipelineError::MissingData`] when the consolidated dataset or a
/// region's timetable archive is absent.
#[tracing::instrument(skip_all, fields(date = %date, regions = config.regions.len()))]
pub fn analyze_for_date(
    config: &PipelineConfig,
    date: NaiveDate,
) -> Result<ReconciliationIndex, PipelineError> {
    let dataset = config.consolidated_dataset(date);
    if !dataset.exists() {
        return Err(PipelineError::missing("consolidated dataset", &dataset));
    }
    let observations = read_observations(&dataset)?;
    info!(observations = observations.len(), path = %dataset.display(), "Loaded consolidated dataset");

    let mut regions = Vec::with_capacity(config.regions.len());
    for region in &config.regions {
        let schedule_archive = config.schedule_archive(region, date);
        let active = timetable::load(&schedule_archive)?.active_on(date);

        let reconciliation = reconcile(&active, &observations);

        let performance_report = config.performance_report(region, date);
        let coverage_report = config.coverage_report(region, date);
        write_performance_report(&performance_report, &reconciliation.results)?;
        write_coverage_report(&coverage_report, &reconciliation.coverage)?;

        info!(
            region = %region,
            agencies = reconciliation.results.len(),
            report = %performance_report.display(),
            "Region reconciled"
        );

        let mut joins = active.joins;
        joins.extend(reconciliation.joins);
        regions.push(RegionSummary {
            region: region.clone(),
            schedule_archive,
            active_services: active.services.len(),
            agencies: reconciliation.results.len(),
            performance_report,
            coverage_report,
            joins,
        });
    }

    let index = ReconciliationIndex {
        generated_at: Utc::now(),
        date,
        consolidated_dataset: dataset,
        observations: observations.len(),
        regions,
    };
    let index_path = config.report_index(date);
    write_json(&index_path, &index)?;

    info!(path = %index_path.display(), "Reconciliation complete for date");
    Ok(index)
}
