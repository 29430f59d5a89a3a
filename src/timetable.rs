//! Scheduled service assembled from a GTFS timetable archive.
//!
//! `agency`, `routes`, `trips` and `calendar` are inner-joined into one row
//! per scheduled trip. Rows without a counterpart in the next table are
//! dropped, as the upstream timetable tooling does; each join's
//! [`JoinStats`] travels with the table so the loss is visible.

use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;

use chrono::{Datelike, NaiveDate};
use csv::ReaderBuilder;
use serde::de::{self, DeserializeOwned};
use serde::{Deserialize, Deserializer};
use tracing::info;
use zip::ZipArchive;

use crate::error::PipelineError;
use crate::join::{JoinStats, inner_join};

/// A row of `agency.txt`.
#[derive(Debug, Clone, Deserialize)]
pub struct Agency {
    pub agency_id: String,
    pub agency_name: String,
}

/// A row of `routes.txt`.
#[derive(Debug, Clone, Deserialize)]
pub struct Route {
    pub route_id: String,
    pub agency_id: String,
    #[serde(default)]
    pub route_short_name: String,
}

/// A row of `trips.txt`.
#[derive(Debug, Clone, Deserialize)]
pub struct Trip {
    pub route_id: String,
    pub service_id: String,
    pub trip_id: String,
}

/// A row of `calendar.txt`.
#[derive(Debug, Clone, Deserialize)]
pub struct Calendar {
    pub service_id: String,

    #[serde(deserialize_with = "gtfs_flag")]
    pub monday: bool,
    #[serde(deserialize_with = "gtfs_flag")]
    pub tuesday: bool,
    #[serde(deserialize_with = "gtfs_flag")]
    pub wednesday: bool,
    #[serde(deserialize_with = "gtfs_flag")]
    pub thursday: bool,
    #[serde(deserialize_with = "gtfs_flag")]
    pub friday: bool,
    #[serde(deserialize_with = "gtfs_flag")]
    pub saturday: bool,
    #[serde(deserialize_with = "gtfs_flag")]
    pub sunday: bool,

    /// service start date (YYYYMMDD)
    #[serde(deserialize_with = "gtfs_date")]
    pub start_date: NaiveDate,

    /// service end date (YYYYMMDD)
    #[serde(deserialize_with = "gtfs_date")]
    pub end_date: NaiveDate,
}

impl Calendar {
    /// Weekday flags, Monday first.
    pub fn weekday_flags(&self) -> [bool; 7] {
        [
            self.monday,
            self.tuesday,
            self.wednesday,
            self.thursday,
            self.friday,
            self.saturday,
            self.sunday,
        ]
    }
}

fn gtfs_date<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    NaiveDate::parse_from_str(s.trim(), "%Y%m%d").map_err(de::Error::custom)
}

/// Accepts `0`/`1` as well as `true`/`false`.
fn gtfs_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    match s.trim() {
        "1" | "true" | "True" | "TRUE" => Ok(true),
        "0" | "false" | "False" | "FALSE" | "" => Ok(false),
        other => Err(de::Error::custom(format!("invalid weekday flag '{other}'"))),
    }
}

/// One scheduled trip with its operator, route and calendar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledService {
    pub agency_id: String,
    pub agency_name: String,
    pub route_id: String,
    pub route_short_name: String,
    pub trip_id: String,
    pub service_id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Monday first.
    pub weekday_flags: [bool; 7],
}

impl ScheduledService {
    /// True when `date` lies in the service's validity range and its weekday is served.
    pub fn is_active_on(&self, date: NaiveDate) -> bool {
        self.start_date <= date
            && date <= self.end_date
            && self.weekday_flags[date.weekday().num_days_from_monday() as usize]
    }
}

/// Joined timetable rows plus the join statistics collected while building them.
#[derive(Debug, Clone, Default)]
pub struct ScheduleTable {
    pub services: Vec<ScheduledService>,
    pub joins: Vec<JoinStats>,
}

impl ScheduleTable {
    /// Services running on `date`.
    pub fn active_on(&self, date: NaiveDate) -> ScheduleTable {
        let services: Vec<_> = self
            .services
            .iter()
            .filter(|s| s.is_active_on(date))
            .cloned()
            .collect();

        info!(
            %date,
            scheduled = self.services.len(),
            active = services.len(),
            "Filtered timetable to date"
        );
        ScheduleTable {
            services,
            joins: self.joins.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

/// Raw GTFS tables needed to assemble a [`ScheduleTable`].
#[derive(Debug, Default)]
pub struct TimetableTables {
    pub agencies: Vec<Agency>,
    pub routes: Vec<Route>,
    pub trips: Vec<Trip>,
    pub calendars: Vec<Calendar>,
}

fn table_member_name<R: Read + Seek>(archive: &mut ZipArchive<R>, table: &str) -> Option<String> {
    let file_name = format!("{table}.txt");
    archive
        .file_names()
        .find(|name| *name == file_name || name.ends_with(&format!("/{file_name}")))
        .map(str::to_string)
}

fn read_table<T, R>(archive: &mut ZipArchive<R>, table: &str, path: &Path) -> Result<Vec<T>, PipelineError>
where
    T: DeserializeOwned,
    R: Read + Seek,
{
    let member = table_member_name(archive, table)
        .ok_or_else(|| PipelineError::missing(format!("timetable table '{table}.txt'"), path))?;

    let file_in_zip = archive.by_name(&member).map_err(|source| PipelineError::Archive {
        name: format!("{}:{}", path.display(), member),
        source,
    })?;

    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(file_in_zip);

    let mut rows = Vec::new();
    for result in rdr.deserialize::<T>() {
        rows.push(result.map_err(|source| PipelineError::Table {
            table: table.to_string(),
            source,
        })?);
    }
    Ok(rows)
}

impl TimetableTables {
    /// Reads the four required tables from a timetable archive; other members are ignored.
    ///
    /// # Errors
    ///
    /// [`PipelineError::MissingData`] if the archive or any required table is absent.
    pub fn from_archive(path: &Path) -> Result<Self, PipelineError> {
        if !path.exists() {
            return Err(PipelineError::missing("timetable archive", path));
        }
        let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
        let mut archive = ZipArchive::new(file).map_err(|source| PipelineError::Archive {
            name: path.display().to_string(),
            source,
        })?;

        Ok(Self {
            agencies: read_table(&mut archive, "agency", path)?,
            routes: read_table(&mut archive, "routes", path)?,
            trips: read_table(&mut archive, "trips", path)?,
            calendars: read_table(&mut archive, "calendar", path)?,
        })
    }

    /// Inner-joins agency → routes → trips → calendar.
    pub fn assemble(&self) -> ScheduleTable {
        let agency_routes = inner_join(
            "agency-routes",
            &self.agencies,
            &self.routes,
            |a| a.agency_id.as_str(),
            |r| r.agency_id.as_str(),
        );
        let route_trips = inner_join(
            "routes-trips",
            &agency_routes.rows,
            &self.trips,
            |(_, r)| r.route_id.as_str(),
            |t| t.route_id.as_str(),
        );
        let trip_calendars = inner_join(
            "trips-calendar",
            &route_trips.rows,
            &self.calendars,
            |(_, t)| t.service_id.as_str(),
            |c| c.service_id.as_str(),
        );

        let services = trip_calendars
            .rows
            .iter()
            .map(|(((agency, route), trip), calendar)| ScheduledService {
                agency_id: agency.agency_id.clone(),
                agency_name: agency.agency_name.clone(),
                route_id: route.route_id.clone(),
                route_short_name: route.route_short_name.clone(),
                trip_id: trip.trip_id.clone(),
                service_id: trip.service_id.clone(),
                start_date: calendar.start_date,
                end_date: calendar.end_date,
                weekday_flags: calendar.weekday_flags(),
            })
            .collect();

        ScheduleTable {
            services,
            joins: vec![agency_routes.stats, route_trips.stats, trip_calendars.stats],
        }
    }
}

/// Loads a timetable archive into a joined [`ScheduleTable`].
#[tracing::instrument(skip_all, fields(path = %path.display()))]
pub fn load(path: &Path) -> Result<ScheduleTable, PipelineError> {
    let tables = TimetableTables::from_archive(path)?;
    let table = tables.assemble();

    info!(
        agencies = tables.agencies.len(),
        routes = tables.routes.len(),
        trips = tables.trips.len(),
        calendars = tables.calendars.len(),
        services = table.services.len(),
        "Loaded timetable"
    );
    Ok(table)
}
