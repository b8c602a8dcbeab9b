//! HTTP routes of the lookup service.
//!
//! - `GET /`: plain-text uptime.
//! - `GET /help`: an HTML table of the endpoints.
//! - `POST /values`: segment IDs at a batch of locations.
//!
//! `/values` accepts either a JSON body `{"locations": [[x, y, z], ...]}` or
//! a form-encoded body `locations=<JSON array>`. In both cases the locations
//! may also be given as a string holding the JSON array. The response is a
//! JSON array of segment IDs in the order the locations were given.

use crate::server::{
    service::error::ApiError,
    telemetry::{
        decrement_requests_inflight, increment_request_errors, increment_requests,
        increment_requests_inflight, record_blocks_per_request, record_locations_per_request,
        record_request_duration,
    },
};
use axum::{
    Form, Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, FromRequest, Request, State},
    http::{StatusCode, header},
    response::Html,
    routing::{get, post},
};
use core::time::Duration;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use voxseg::{Coordinate, SegmentId, SegmentLookup};

const NO_LOCATIONS: &str = "No locations provided";

const HELP: &str = r#"<h1>Available API endpoints</h1>
<table style="width:50%">
  <tr>
    <th>Name</th>
    <th>Description</th>
    <th>Example</th>
  </tr>
  <tr>
    <td><code>/ (GET)</code></td>
    <td>returns how long the service has been running</td>
    <td><code>curl http://localhost:5000/</code></td>
  </tr>
  <tr>
    <td><code>values (POST)</code></td>
    <td>returns segmentation IDs at given locations</td>
    <td><code>curl -X POST -H "Content-Type: application/json" -d '{"locations": [[1024, 2048, 120], [7, 7, 7]]}' http://localhost:5000/values</code></td>
  </tr>
</table>
"#;

/// State shared by all routes.
#[derive(Clone)]
pub struct AppState {
    lookup: Arc<SegmentLookup>,
    started: Instant,
    inflight: Arc<AtomicUsize>,
}

impl AppState {
    pub fn new(lookup: Arc<SegmentLookup>) -> Self {
        Self {
            lookup,
            started: Instant::now(),
            inflight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of `/values` requests currently being answered.
    pub fn inflight(&self) -> usize {
        self.inflight.load(Ordering::Acquire)
    }
}

/// Counts a `/values` request as in flight until dropped, so the count also
/// falls when the client disconnects and the handler future is dropped.
struct InflightRequest(Arc<AtomicUsize>);

impl InflightRequest {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        increment_requests_inflight();
        Self(Arc::clone(counter))
    }
}

impl Drop for InflightRequest {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
        decrement_requests_inflight();
    }
}

/// Builds the service router. Request bodies larger than `max_body_bytes`
/// are rejected with `413`.
pub fn router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/", get(uptime))
        .route("/help", get(help))
        .route("/values", post(values))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn uptime(State(state): State<AppState>) -> String {
    format!(
        "Service running for {}",
        format_uptime(state.started.elapsed())
    )
}

async fn help() -> Html<&'static str> {
    Html(HELP)
}

/// Answers a batch lookup and records request metrics.
#[tracing::instrument(skip_all)]
async fn values(
    State(state): State<AppState>,
    req: Request,
) -> Result<Json<Vec<SegmentId>>, ApiError> {
    let start = Instant::now();
    increment_requests();
    let inflight = InflightRequest::enter(&state.inflight);

    let result = lookup_values(&state, req).await;

    drop(inflight);
    record_request_duration(start.elapsed().as_secs_f64() * 1_000.0);
    if let Err(e) = &result {
        increment_request_errors();
        if e.status().is_server_error() {
            tracing::error!("Lookup failed: {e}");
        } else {
            tracing::debug!("Rejected request: {e}");
        }
    }
    result.map(Json)
}

async fn lookup_values(state: &AppState, req: Request) -> Result<Vec<SegmentId>, ApiError> {
    let locations = extract_locations(req).await?;
    tracing::debug!("Locations queried: {}", locations.len());
    record_locations_per_request(locations.len() as f64);

    let outcome = state.lookup.lookup(&locations).await?;
    record_blocks_per_request(outcome.blocks as f64);
    Ok(outcome.ids)
}

#[derive(Deserialize)]
struct LocationsForm {
    locations: Option<String>,
}

/// Pulls the raw `locations` value out of a JSON or form-encoded body.
async fn extract_locations(req: Request) -> Result<Vec<Coordinate>, ApiError> {
    let is_form = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));

    let raw = if is_form {
        let Form(form) = Form::<LocationsForm>::from_request(req, &())
            .await
            .map_err(|rejection| body_rejection(rejection.status(), rejection.body_text()))?;
        form.locations.map_or(Value::Null, Value::String)
    } else {
        let body = Bytes::from_request(req, &())
            .await
            .map_err(|rejection| body_rejection(rejection.status(), rejection.body_text()))?;
        if body.iter().all(u8::is_ascii_whitespace) {
            Value::Null
        } else {
            let mut payload: Value = serde_json::from_slice(&body)
                .map_err(|e| ApiError::invalid_input(format!("Invalid JSON body: {e}")))?;
            payload
                .get_mut("locations")
                .map(Value::take)
                .unwrap_or(Value::Null)
        }
    };

    parse_locations(raw)
}

/// An unreadable or undecodable body is the caller's fault and so a `400`,
/// except for an oversized body which keeps its `413`.
fn body_rejection(status: StatusCode, message: String) -> ApiError {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::Rejection { status, message }
    } else {
        ApiError::invalid_input(message)
    }
}

/// Turns a `locations` value into coordinates.
///
/// Strings are decoded as JSON first. A missing, blank or empty value is
/// rejected as "No locations provided".
fn parse_locations(value: Value) -> Result<Vec<Coordinate>, ApiError> {
    let value = match value {
        Value::String(s) if s.trim().is_empty() => Value::Null,
        Value::String(s) => serde_json::from_str(&s)
            .map_err(|e| ApiError::invalid_input(format!("Invalid locations: {e}")))?,
        other => other,
    };

    match value {
        Value::Null => Err(ApiError::invalid_input(NO_LOCATIONS)),
        Value::Array(ref items) if items.is_empty() => Err(ApiError::invalid_input(NO_LOCATIONS)),
        Value::Array(_) => serde_json::from_value(value)
            .map_err(|e| ApiError::invalid_input(format!("Invalid locations: {e}"))),
        _ => Err(ApiError::invalid_input(
            "Locations must be an array of [x, y, z] coordinates",
        )),
    }
}

/// Formats `elapsed` as `H:MM:SS[.ffffff]`, prefixed by `N day(s), ` once it
/// exceeds a day.
fn format_uptime(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3_600;
    let minutes = (secs % 3_600) / 60;
    let seconds = secs % 60;
    let micros = elapsed.subsec_micros();

    let days = match days {
        0 => String::new(),
        1 => "1 day, ".to_string(),
        n => format!("{n} days, "),
    };
    let fraction = if micros == 0 {
        String::new()
    } else {
        format!(".{micros:06}")
    };
    format!("{days}{hours}:{minutes:02}:{seconds:02}{fraction}")
}
