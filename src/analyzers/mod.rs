//! Operator performance reconciliation.
//!
//! This module joins a day's consolidated observations with each region's
//! active timetable, buckets how often every scheduled trip was seen, and
//! writes the per-region CSV reports plus a JSON run index.

pub mod analyzer;
pub mod bucket;
pub mod reconcile;
pub mod report;
pub mod types;
pub mod utility;
