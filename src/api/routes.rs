use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};
use warp::{
    http::StatusCode,
    reject::Rejection,
    reply::{self, Reply, Response},
    Filter,
};

use crate::api::{
    parse_days, require, status_for, ErrorResponse, LatestWidthResponse, PointResponse, Sites,
};
use crate::error::{QueryError, Result};
use crate::query::QueryEngine;

#[derive(Debug, Default, Deserialize)]
pub struct PointParams {
    pub date: Option<String>,
    pub time: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WindowParams {
    pub days: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RangeParams {
    pub start: Option<String>,
    pub end: Option<String>,
}

fn error_reply(err: &QueryError) -> Response {
    let status = status_for(err);
    if status.is_server_error() {
        error!(error = %err, "query failed");
    } else {
        debug!(error = %err, status = status.as_u16(), "query rejected");
    }
    reply::with_status(
        reply::json(&ErrorResponse {
            error: err.to_string(),
            details: None,
        }),
        status,
    )
    .into_response()
}

fn not_found(what: &str) -> Response {
    reply::with_status(
        reply::json(&ErrorResponse {
            error: "not found".to_string(),
            details: Some(what.to_string()),
        }),
        StatusCode::NOT_FOUND,
    )
    .into_response()
}

fn respond<T: Serialize>(result: Result<T>) -> Response {
    match result {
        Ok(body) => reply::json(&body).into_response(),
        Err(e) => error_reply(&e),
    }
}

/// Look up the site and run `query` on the blocking pool; scans are plain
/// file I/O and must not stall the async workers.
async fn run<T, F>(sites: Arc<Sites>, site: String, query: F) -> Result<T>
where
    F: FnOnce(&QueryEngine) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let engine = sites.get(&site)?;
    tokio::task::spawn_blocking(move || query(engine.as_ref()))
        .await
        .map_err(|e| QueryError::Internal(e.to_string()))?
}

async fn health_check(sites: Arc<Sites>) -> std::result::Result<Response, Rejection> {
    Ok(reply::json(&serde_json::json!({
        "status": "healthy",
        "service": "sensorlog",
        "sites": sites.len(),
    }))
    .into_response())
}

async fn list_sites(sites: Arc<Sites>) -> std::result::Result<Response, Rejection> {
    Ok(reply::json(&sites.summaries()).into_response())
}

async fn timestamps(site: String, sites: Arc<Sites>) -> std::result::Result<Response, Rejection> {
    Ok(respond(run(sites, site, |e| e.list_all()).await))
}

async fn point(
    site: String,
    params: PointParams,
    sites: Arc<Sites>,
) -> std::result::Result<Response, Rejection> {
    let date = params.date.unwrap_or_default();
    let time = params.time.unwrap_or_default();
    let what = format!("{} {}", date.trim(), time.trim());
    let found = run(sites, site, move |e| e.find(&date, &time)).await;
    Ok(match found {
        Ok(Some(reading)) => reply::json(&PointResponse::from(reading)).into_response(),
        Ok(None) => not_found(&what),
        Err(e) => error_reply(&e),
    })
}

async fn window(
    site: String,
    params: WindowParams,
    sites: Arc<Sites>,
) -> std::result::Result<Response, Rejection> {
    let days = match parse_days(params.days.as_deref()) {
        Ok(days) => days,
        Err(e) => return Ok(error_reply(&e)),
    };
    Ok(respond(run(sites, site, move |e| e.last_n_days(days)).await))
}

async fn range(
    site: String,
    params: RangeParams,
    sites: Arc<Sites>,
) -> std::result::Result<Response, Rejection> {
    let (start, end) = match (
        require(params.start.as_deref(), "start"),
        require(params.end.as_deref(), "end"),
    ) {
        (Ok(start), Ok(end)) => (start.to_string(), end.to_string()),
        (Err(e), _) | (_, Err(e)) => return Ok(error_reply(&e)),
    };
    Ok(respond(run(sites, site, move |e| e.between(&start, &end)).await))
}

async fn latest_width(site: String, sites: Arc<Sites>) -> std::result::Result<Response, Rejection> {
    let delta = run(sites, site, |e| e.latest_width_delta()).await;
    Ok(respond(delta.map(LatestWidthResponse::from)))
}

async fn flow_angles(site: String, sites: Arc<Sites>) -> std::result::Result<Response, Rejection> {
    Ok(respond(run(sites, site, |e| e.flow_angles()).await))
}

async fn latest_flow_angle(
    site: String,
    sites: Arc<Sites>,
) -> std::result::Result<Response, Rejection> {
    Ok(match run(sites, site, |e| e.latest_flow_angle()).await {
        Ok(Some(reading)) => reply::json(&reading).into_response(),
        Ok(None) => not_found("flow angle log has no readings"),
        Err(e) => error_reply(&e),
    })
}

fn with_sites(
    sites: Arc<Sites>,
) -> impl Filter<Extract = (Arc<Sites>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || Arc::clone(&sites))
}

/// Every endpoint of the service.
pub fn routes(sites: Arc<Sites>) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let health = warp::path!("health")
        .and(warp::get())
        .and(with_sites(sites.clone()))
        .and_then(health_check);

    let list = warp::path!("sites")
        .and(warp::get())
        .and(with_sites(sites.clone()))
        .and_then(list_sites);

    let timestamps = warp::path!("sites" / String / "depth" / "timestamps")
        .and(warp::get())
        .and(with_sites(sites.clone()))
        .and_then(timestamps);

    let point = warp::path!("sites" / String / "depth" / "point")
        .and(warp::get())
        .and(warp::query::<PointParams>())
        .and(with_sites(sites.clone()))
        .and_then(point);

    let window = warp::path!("sites" / String / "depth" / "window")
        .and(warp::get())
        .and(warp::query::<WindowParams>())
        .and(with_sites(sites.clone()))
        .and_then(window);

    let range = warp::path!("sites" / String / "depth" / "range")
        .and(warp::get())
        .and(warp::query::<RangeParams>())
        .and(with_sites(sites.clone()))
        .and_then(range);

    let latest_width = warp::path!("sites" / String / "width" / "latest")
        .and(warp::get())
        .and(with_sites(sites.clone()))
        .and_then(latest_width);

    let flow_angles = warp::path!("sites" / String / "flowangle")
        .and(warp::get())
        .and(with_sites(sites.clone()))
        .and_then(flow_angles);

    let latest_flow_angle = warp::path!("sites" / String / "flowangle" / "latest")
        .and(warp::get())
        .and(with_sites(sites))
        .and_then(latest_flow_angle);

    health
        .or(list)
        .unify()
        .or(timestamps)
        .unify()
        .or(point)
        .unify()
        .or(window)
        .unify()
        .or(range)
        .unify()
        .or(latest_width)
        .unify()
        .or(flow_angles)
        .unify()
        .or(latest_flow_angle)
        .unify()
        .with(warp::trace::request())
}
