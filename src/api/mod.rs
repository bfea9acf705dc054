//! The request-facing side of the engine: parameter checks, response
//! shapes, status codes and the per-site registry the HTTP routes use.

pub mod routes;

use serde::Serialize;
use std::{collections::BTreeMap, sync::Arc};
use warp::http::StatusCode;

use crate::error::{QueryError, Result};
use crate::log::{DepthReading, WidthReading};
use crate::query::{QueryEngine, SiteLogs, WidthDelta};

/// A single depth reading with all its channels. Invalid (`NaN`)
/// channels serialize as `null`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PointResponse {
    pub date: String,
    pub time: String,
    pub values: Vec<f64>,
}

impl From<DepthReading> for PointResponse {
    fn from(r: DepthReading) -> Self {
        Self {
            date: r.date,
            time: r.time,
            values: r.channels.to_vec(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LatestWidthResponse {
    pub last: WidthReading,
    #[serde(rename = "secondLast")]
    pub second_last: WidthReading,
    /// Percent change; `null` when the latest width is zero.
    pub inc: Option<f64>,
    pub width: f64,
}

impl From<WidthDelta> for LatestWidthResponse {
    fn from(d: WidthDelta) -> Self {
        Self {
            width: d.last.width,
            inc: d.percent_change,
            last: d.last,
            second_last: d.second_last,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct SiteSummary {
    pub name: String,
    pub index: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub details: Option<String>,
}

/// `days` for window queries: present, an integer, and at least 1.
pub fn parse_days(raw: Option<&str>) -> Result<i64> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| QueryError::invalid("`days` is required"))?;
    let days: i64 = raw
        .parse()
        .map_err(|_| QueryError::invalid(format!("`days` must be an integer, got {raw:?}")))?;
    if days < 1 {
        return Err(QueryError::invalid(format!(
            "`days` must be at least 1, got {days}"
        )));
    }
    Ok(days)
}

/// A required query parameter.
pub fn require<'a>(raw: Option<&'a str>, name: &str) -> Result<&'a str> {
    raw.filter(|s| !s.trim().is_empty())
        .ok_or_else(|| QueryError::invalid(format!("`{name}` is required")))
}

pub fn status_for(err: &QueryError) -> StatusCode {
    match err {
        QueryError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        QueryError::UnknownSite(_)
        | QueryError::MissingLog(_)
        | QueryError::InsufficientData { .. } => StatusCode::NOT_FOUND,
        QueryError::Internal(_) | QueryError::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Query engines by site name.
#[derive(Default)]
pub struct Sites {
    engines: BTreeMap<String, Arc<QueryEngine>>,
}

impl Sites {
    pub fn new(sites: impl IntoIterator<Item = (String, SiteLogs)>) -> Self {
        let engines = sites
            .into_iter()
            .map(|(name, logs)| (name, Arc::new(QueryEngine::new(logs))))
            .collect();
        Self { engines }
    }

    pub fn get(&self, name: &str) -> Result<Arc<QueryEngine>> {
        self.engines
            .get(name)
            .cloned()
            .ok_or_else(|| QueryError::UnknownSite(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    pub fn summaries(&self) -> Vec<SiteSummary> {
        self.engines
            .iter()
            .map(|(name, engine)| SiteSummary {
                name: name.clone(),
                index: engine.index_phase().as_str().to_string(),
            })
            .collect()
    }
}
