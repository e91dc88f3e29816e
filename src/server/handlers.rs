//! REST API handlers

use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use super::AppState;
use crate::enrich::{process_alert, search_iocs, EdrAlert};
use crate::export::{ExportError, FeedFormat};

#[derive(Debug, Deserialize)]
pub struct ValueParams {
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FeedParams {
    format: Option<String>,
    since: Option<String>,
}

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "service": "iocwatch-api",
    }))
}

pub async fn check_ioc(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ValueParams>,
) -> Response {
    let Some(value) = params.value.filter(|v| !v.is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "missing 'value' parameter");
    };

    match state.db.find_by_value(&value) {
        Ok(Some(ioc)) => Json(json!({
            "exists": true,
            "value": ioc.value,
            "type": ioc.ioc_type.as_str(),
            "source": ioc.source,
            "threat_type": ioc.threat_type,
            "tags": ioc.tags,
            "version": ioc.version,
            "first_seen": ioc.first_seen.to_rfc3339(),
            "date_ingested": ioc.date_ingested.to_rfc3339(),
        }))
        .into_response(),
        Ok(None) => Json(json!({ "exists": false, "value": value })).into_response(),
        Err(e) => {
            error!("check failed for {}: {}", value, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to query catalog")
        }
    }
}

pub async fn search_ioc(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ValueParams>,
) -> Response {
    let Some(value) = params.value.filter(|v| !v.is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "missing 'value' parameter");
    };

    match search_iocs(&state.db, &value) {
        Ok(detail) => Json(detail).into_response(),
        Err(e) => {
            error!("search failed for {}: {}", value, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to query catalog")
        }
    }
}

pub async fn ioc_feed(
    State(state): State<Arc<AppState>>,
    Query(params): Query<FeedParams>,
) -> Response {
    let format = match params.format.as_deref() {
        // The raw JSON feed is reserved but not implemented
        None => FeedFormat::Json,
        Some(s) => match FeedFormat::from_str(s) {
            Ok(format) => format,
            Err(_) => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    "unsupported format (use 'cef', 'stix', or 'json')",
                )
            }
        },
    };

    let window = match params.since.as_deref() {
        None => Duration::hours(24),
        Some(s) => match parse_since(s) {
            Some(window) => window,
            None => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    "invalid 'since' parameter (use a duration like '30m' or '24h')",
                )
            }
        },
    };

    match state.exporter.export(format, Utc::now() - window) {
        Ok(body) => {
            let content_type = match format {
                FeedFormat::Cef => "text/plain; charset=utf-8",
                _ => "application/json; charset=utf-8",
            };
            ([(header::CONTENT_TYPE, content_type)], body).into_response()
        }
        Err(ExportError::Unimplemented(_)) => {
            error_response(StatusCode::NOT_IMPLEMENTED, "JSON format not yet implemented")
        }
        Err(e) => {
            error!("feed export failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to export feed")
        }
    }
}

pub async fn edr_webhook(
    State(state): State<Arc<AppState>>,
    Json(alert): Json<EdrAlert>,
) -> Response {
    let response = process_alert(
        &state.db,
        state.triager.as_ref(),
        state.notifier.as_ref(),
        alert,
    )
    .await;

    Json(response).into_response()
}

pub async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
        .into_response()
}

/// Parse a duration string with an s/m/h suffix.
fn parse_since(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.len() < 2 {
        return None;
    }

    let (number, unit) = s.split_at(s.len() - 1);
    let number: i64 = number.parse().ok().filter(|n| *n >= 0)?;

    match unit {
        "s" => Some(Duration::seconds(number)),
        "m" => Some(Duration::minutes(number)),
        "h" => Some(Duration::hours(number)),
        _ => None,
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}
