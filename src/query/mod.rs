//! Read-only queries over one site's logs.

use chrono::{Local, NaiveDateTime, TimeDelta};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{QueryError, Result};
use crate::index::{IndexCache, IndexPhase, TimestampIndex};
use crate::log::{
    parse_range_bound, scan::scan_flow_angle, scan_depth, scan_width, DepthReading,
    FlowAngleReading, WidthReading,
};

/// The logs one monitored site writes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SiteLogs {
    pub depth: PathBuf,
    pub width: Option<PathBuf>,
    pub flow_angle: Option<PathBuf>,
}

/// One row of the timestamp listing.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TimestampEntry {
    pub date: String,
    pub time: String,
    pub average: f64,
}

/// One deduplicated point of a window or range query.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub timestamp: String,
    pub mean_depth: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct WidthDelta {
    pub last: WidthReading,
    pub second_last: WidthReading,
    /// `None` when the newest width is zero and the change is undefined.
    pub percent_change: Option<f64>,
}

/// Relative change of `last` against `previous`, as a percentage of `last`.
pub fn percent_change(last: f64, previous: f64) -> Option<f64> {
    if last == 0.0 {
        return None;
    }
    Some((last - previous) / last * 100.0)
}

fn series(index: &TimestampIndex) -> Vec<SeriesPoint> {
    index
        .chronological()
        .into_iter()
        .map(|(key, entry)| SeriesPoint {
            timestamp: key.to_string(),
            mean_depth: entry.mean_depth,
        })
        .collect()
}

/// Queries for one site. Cheap to share behind an `Arc`; every method
/// takes `&self` and sees one fixed state of the files it reads.
pub struct QueryEngine {
    logs: SiteLogs,
    depth_index: IndexCache,
}

impl QueryEngine {
    pub fn new(logs: SiteLogs) -> Self {
        let depth_index = IndexCache::new(&logs.depth);
        Self { logs, depth_index }
    }

    pub fn logs(&self) -> &SiteLogs {
        &self.logs
    }

    pub fn index_phase(&self) -> IndexPhase {
        self.depth_index.phase()
    }

    /// First reading whose raw `<date> <time>` equals the query. Streams the
    /// file and stops at the first hit; `Ok(None)` if nothing matches.
    pub fn find(&self, date: &str, time: &str) -> Result<Option<DepthReading>> {
        let (date, time) = (date.trim(), time.trim());
        if date.is_empty() || time.is_empty() {
            return Err(QueryError::invalid("both `date` and `time` are required"));
        }
        for reading in scan_depth(&self.logs.depth)? {
            let reading = reading?;
            if reading.matches(date, time) {
                return Ok(Some(reading));
            }
        }
        debug!(date, time, "no depth reading at timestamp");
        Ok(None)
    }

    /// Every decoded depth reading, in file order.
    pub fn list_all(&self) -> Result<Vec<TimestampEntry>> {
        let snapshot = self.depth_index.snapshot()?;
        Ok(snapshot
            .readings()
            .iter()
            .map(|r| TimestampEntry {
                date: r.date.clone(),
                time: r.time.clone(),
                average: r.mean_depth,
            })
            .collect())
    }

    pub fn last_n_days(&self, days: i64) -> Result<Vec<SeriesPoint>> {
        self.last_n_days_at(days, Local::now().naive_local())
    }

    /// Readings at or after `now - days`, deduplicated by canonical timestamp.
    pub fn last_n_days_at(&self, days: i64, now: NaiveDateTime) -> Result<Vec<SeriesPoint>> {
        if days < 1 {
            return Err(QueryError::invalid(format!(
                "`days` must be at least 1, got {days}"
            )));
        }
        let since = TimeDelta::try_days(days)
            .and_then(|span| now.checked_sub_signed(span))
            .unwrap_or(NaiveDateTime::MIN);

        let snapshot = self.depth_index.snapshot()?;
        let index = snapshot.index(|ts| ts.at() >= since);
        debug!(days, %since, points = index.len(), "window query");
        Ok(series(&index))
    }

    /// Readings timestamped in `[start, end]`; both bounds are
    /// `YYYY-MM-DD HH:mm` and are checked before the log is touched.
    pub fn between(&self, start: &str, end: &str) -> Result<Vec<SeriesPoint>> {
        let lo = parse_range_bound(start).ok_or_else(|| {
            QueryError::invalid(format!("`start` must be YYYY-MM-DD HH:mm, got {start:?}"))
        })?;
        let hi = parse_range_bound(end).ok_or_else(|| {
            QueryError::invalid(format!("`end` must be YYYY-MM-DD HH:mm, got {end:?}"))
        })?;

        let snapshot = self.depth_index.snapshot()?;
        let index = snapshot.index(|ts| (lo..=hi).contains(&ts.at()));
        debug!(%lo, %hi, points = index.len(), "range query");
        Ok(series(&index))
    }

    fn configured<'a>(path: &'a Option<PathBuf>, kind: &'static str) -> Result<&'a Path> {
        path.as_deref().ok_or(QueryError::MissingLog(kind))
    }

    /// The two newest width readings and the change between them. The log
    /// is taken to be append-ordered, so "newest" means "last in the file".
    pub fn latest_width_delta(&self) -> Result<WidthDelta> {
        let path = Self::configured(&self.logs.width, "width")?;
        let mut found = 0;
        let (mut second_last, mut last) = (None, None);
        for reading in scan_width(path)? {
            found += 1;
            second_last = last.replace(reading?);
        }

        match (second_last, last) {
            (Some(second_last), Some(last)) => {
                let percent_change = percent_change(last.width, second_last.width);
                if percent_change.is_none() {
                    debug!(path = %path.display(), "latest width is zero; change undefined");
                }
                Ok(WidthDelta {
                    last,
                    second_last,
                    percent_change,
                })
            }
            _ => Err(QueryError::InsufficientData {
                path: path.to_path_buf(),
                found,
                needed: 2,
            }),
        }
    }

    pub fn flow_angles(&self) -> Result<Vec<FlowAngleReading>> {
        let path = Self::configured(&self.logs.flow_angle, "flow angle")?;
        scan_flow_angle(path)?.collect()
    }

    pub fn latest_flow_angle(&self) -> Result<Option<FlowAngleReading>> {
        let path = Self::configured(&self.logs.flow_angle, "flow angle")?;
        let mut latest = None;
        for reading in scan_flow_angle(path)? {
            latest = Some(reading?);
        }
        Ok(latest)
    }
}
