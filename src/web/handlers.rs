//! HTTP request handlers.

use super::AppState;
use crate::db::{format_uptime, CheckResult, Metric, ReadFilter, ServiceSelector, TimeUnit};
use crate::monitor::Monitor;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

/// Days covered by the overview bars.
const DEFAULT_DAYS: u32 = 89;

#[derive(Debug, Serialize)]
pub struct ConfigResponse<'a> {
    pub monitors: &'a [Monitor],
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub uptime: String,
    pub metrics: Vec<Metric>,
}

#[derive(Debug, Serialize)]
pub struct ResultsResponse {
    pub results: Vec<CheckResult>,
}

#[derive(Debug, Deserialize)]
pub struct DetailsQuery {
    pub since: Option<String>,
}

pub async fn handle_config(State(state): State<AppState>) -> impl IntoResponse {
    Json(ConfigResponse {
        monitors: &state.monitors.monitors,
    })
    .into_response()
}

/// Daily health of every configured service over the last 89 days.
pub async fn handle_overview_metrics(State(state): State<AppState>) -> impl IntoResponse {
    let filter = ReadFilter {
        active_services: Some(state.monitors.active_services()),
        ..default_filter()
    };

    match state.store.read(&filter) {
        Ok(metrics) => Json(MetricsResponse {
            uptime: format_uptime(&metrics),
            metrics,
        })
        .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// Daily health of one service over the last 89 days.
pub async fn handle_default_metrics(
    State(state): State<AppState>,
    Path((monitor, service)): Path<(String, String)>,
) -> impl IntoResponse {
    let filter = ReadFilter {
        active_services: Some(vec![ServiceSelector::single(&monitor, &service)]),
        ..default_filter()
    };

    read_metrics(&state, &monitor, &service, filter)
}

/// Hourly health of one service for the day starting at `since`.
pub async fn handle_detail_metrics(
    State(state): State<AppState>,
    Path((monitor, service)): Path<(String, String)>,
    Query(query): Query<DetailsQuery>,
) -> impl IntoResponse {
    let since = match parse_since(&query) {
        Ok(since) => since,
        Err(response) => return response,
    };

    let filter = ReadFilter {
        since,
        bucket_width: 1,
        bucket_unit: TimeUnit::Hour,
        interval: 1,
        interval_unit: TimeUnit::Day,
        active_services: Some(vec![ServiceSelector::single(&monitor, &service)]),
    };

    read_metrics(&state, &monitor, &service, filter)
}

/// Individual results of one service for the hour starting at `since`.
pub async fn handle_results(
    State(state): State<AppState>,
    Path((monitor, service)): Path<(String, String)>,
    Query(query): Query<DetailsQuery>,
) -> impl IntoResponse {
    let since = match parse_since(&query) {
        Ok(since) => since,
        Err(response) => return response,
    };

    if state.monitors.find_service(&monitor, &service).is_none() {
        return (StatusCode::NOT_FOUND, "Service not found").into_response();
    }

    match state
        .store
        .results(&monitor, &service, since, since + ChronoDuration::hours(1))
    {
        Ok(results) => Json(ResultsResponse { results }).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

fn default_filter() -> ReadFilter {
    ReadFilter {
        since: Utc::now() - ChronoDuration::days(i64::from(DEFAULT_DAYS)),
        bucket_width: 1,
        bucket_unit: TimeUnit::Day,
        interval: DEFAULT_DAYS,
        interval_unit: TimeUnit::Day,
        active_services: None,
    }
}

fn parse_since(query: &DetailsQuery) -> Result<DateTime<Utc>, axum::response::Response> {
    match query.since.as_deref().map(DateTime::parse_from_rfc3339) {
        Some(Ok(since)) => Ok(since.with_timezone(&Utc)),
        Some(Err(e)) => Err((StatusCode::UNPROCESSABLE_ENTITY, e.to_string()).into_response()),
        None => Err((StatusCode::UNPROCESSABLE_ENTITY, "missing since parameter").into_response()),
    }
}

fn read_metrics(
    state: &AppState,
    monitor: &str,
    service: &str,
    filter: ReadFilter,
) -> axum::response::Response {
    if state.monitors.find_service(monitor, service).is_none() {
        return (StatusCode::NOT_FOUND, "Service not found").into_response();
    }

    match state.store.read(&filter) {
        Ok(metrics) => Json(MetricsResponse {
            uptime: format_uptime(&metrics),
            metrics,
        })
        .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}
