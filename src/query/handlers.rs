use crate::record::{TimestampedLine, TIMESTAMP_FORMAT};
use crate::ring_buffer::RingBuffer;
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use std::collections::HashMap;
use tracing::debug;

use super::server::QueryState;

/// `GET /last_stdout?count=N&json`
pub async fn last_stdout_handler(
    State(state): State<QueryState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    last_lines(&state.supervisor.stdout_buffer(), &params, state.default_count)
}

/// `GET /last_progress?count=N&json`
pub async fn last_progress_handler(
    State(state): State<QueryState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    last_lines(&state.supervisor.progress_buffer(), &params, state.default_count)
}

fn last_lines(
    buffer: &RingBuffer<TimestampedLine>,
    params: &HashMap<String, String>,
    default_count: i64,
) -> Response {
    let count = match params.get("count") {
        None => default_count,
        Some(raw) => match raw.parse::<i64>() {
            Ok(count) => count,
            Err(_) => return plain(StatusCode::BAD_REQUEST, "count must be int\n".to_string()),
        },
    };

    // A bare `?json` arrives as an empty value
    let as_json = params
        .get("json")
        .is_some_and(|value| value != "false" && value != "0");

    let (records, position) = if count > 0 {
        buffer.get_last_items(count as usize)
    } else {
        buffer.get_all()
    };
    debug!("Serving {} records (position {})", records.len(), position);

    if as_json {
        let pairs: Vec<(String, String)> = records
            .into_iter()
            .map(|record| (record.formatted_time(), record.line))
            .collect();
        return Json(pairs).into_response();
    }

    let mut body = String::new();
    for record in &records {
        body.push_str(&record.to_string());
        body.push('\n');
    }
    plain(StatusCode::OK, body)
}

/// `GET /start_time`
pub async fn start_time_handler(State(state): State<QueryState>) -> Response {
    match state.supervisor.start_time() {
        Some(started_at) => plain(
            StatusCode::OK,
            started_at.format(TIMESTAMP_FORMAT).to_string(),
        ),
        None => plain(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Stream is not started".to_string(),
        ),
    }
}

/// `GET /cmd`
pub async fn cmd_handler(State(state): State<QueryState>) -> Response {
    let args = state.supervisor.args();
    if args.is_empty() {
        return plain(StatusCode::INTERNAL_SERVER_ERROR, "Args is empty".to_string());
    }
    plain(StatusCode::OK, args.to_string())
}

pub async fn container_id_handler(State(state): State<QueryState>) -> Response {
    plain(StatusCode::OK, state.status.fields().container_id)
}

pub async fn pid_handler(State(state): State<QueryState>) -> Response {
    plain(StatusCode::OK, state.status.fields().pid.to_string())
}

pub async fn ffmpeg_pid_handler(State(state): State<QueryState>) -> Response {
    let pid = state
        .supervisor
        .pid()
        .or(state.status.fields().ffmpeg_pid)
        .map(|pid| pid.to_string())
        .unwrap_or_default();
    plain(StatusCode::OK, pid)
}

/// Health check endpoint
pub async fn health_handler(State(state): State<QueryState>) -> impl IntoResponse {
    let supervisor = &state.supervisor;
    let phase = *state.phase.read();
    let snapshot = supervisor.progress_snapshot();

    Json(json!({
        "status": if supervisor.process_status().is_running() { "ok" } else { "down" },
        "phase": phase,
        "process": supervisor.process_status(),
        "pid": supervisor.pid(),
        "progress": {
            "position": supervisor.progress_buffer().get_current_position(),
            "stats": supervisor.progress_buffer().stats(),
            "latest": snapshot.as_ref().map(|s| s.fields()),
        },
        "stdout": {
            "position": supervisor.stdout_buffer().get_current_position(),
            "stats": supervisor.stdout_buffer().stats(),
        },
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

fn plain(status: StatusCode, body: String) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response()
}
