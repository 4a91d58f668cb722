//! Filtering for usage records
//!
//! Filters run between the data loader and the aggregator so every rollup
//! granularity sees the same reduced stream. Date bounds are inclusive and
//! compare on the record's UTC calendar day.
//!
//! # Examples
//!
//! ```
//! use cctally::filters::UsageFilter;
//! use chrono::NaiveDate;
//!
//! let filter = UsageFilter::new()
//!     .with_since(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
//!     .with_until(NaiveDate::from_ymd_opt(2024, 1, 31).unwrap())
//!     .with_project("my-project".to_string());
//! ```

use crate::error::{CctallyError, Result};
use crate::types::UsageRecord;
use chrono::NaiveDate;
use futures::{Stream, StreamExt};

/// Filter configuration for usage records
///
/// All criteria are optional and combine conjunctively.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UsageFilter {
    /// Start date filter (inclusive)
    pub since_date: Option<NaiveDate>,
    /// End date filter (inclusive)
    pub until_date: Option<NaiveDate>,
    /// Project name filter (exact match)
    pub project: Option<String>,
}

impl UsageFilter {
    /// Create a new filter with no restrictions
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the start date filter
    pub fn with_since(mut self, date: NaiveDate) -> Self {
        self.since_date = Some(date);
        self
    }

    /// Set the end date filter
    pub fn with_until(mut self, date: NaiveDate) -> Self {
        self.until_date = Some(date);
        self
    }

    /// Set the project filter
    pub fn with_project(mut self, project: String) -> Self {
        self.project = Some(project);
        self
    }

    /// Whether the filter restricts anything at all
    pub fn is_unrestricted(&self) -> bool {
        *self == Self::default()
    }

    /// Check if a record passes the filter
    pub fn matches(&self, record: &UsageRecord) -> bool {
        let record_date = *record.timestamp.to_daily_date().inner();

        if let Some(since) = &self.since_date
            && record_date < *since
        {
            return false;
        }

        if let Some(until) = &self.until_date
            && record_date > *until
        {
            return false;
        }

        if let Some(project_filter) = &self.project {
            // A record with no project never matches a project filter
            match &record.project {
                Some(record_project) if record_project == project_filter => {}
                _ => return false,
            }
        }

        true
    }

    /// Filter a stream of records
    ///
    /// Errors pass through untouched so a malformed file still surfaces
    /// downstream.
    pub fn filter_stream<S>(self, stream: S) -> impl Stream<Item = Result<UsageRecord>>
    where
        S: Stream<Item = Result<UsageRecord>>,
    {
        stream.filter_map(move |result| {
            let keep = match &result {
                Ok(record) => self.matches(record),
                Err(_) => true,
            };
            async move { keep.then_some(result) }
        })
    }
}

/// Parse a `YYYY-MM-DD` date argument
pub fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| CctallyError::InvalidDate(format!("expected YYYY-MM-DD, got '{s}'")))
}

/// Parse a `YYYY-MM` month argument into its first day
pub fn parse_month(s: &str) -> Result<NaiveDate> {
    let parts: Vec<&str> = s.split('-').collect();
    if parts.len() != 2 {
        return Err(CctallyError::InvalidDate(format!(
            "expected YYYY-MM, got '{s}'"
        )));
    }

    let year: i32 = parts[0]
        .parse()
        .map_err(|_| CctallyError::InvalidDate(format!("invalid year in '{s}'")))?;
    let month: u32 = parts[1]
        .parse()
        .map_err(|_| CctallyError::InvalidDate(format!("invalid month in '{s}'")))?;

    NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| CctallyError::InvalidDate(format!("month out of range in '{s}'")))
}
