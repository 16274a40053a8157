//! HTTP inbound adapter.
//!
//! A small JSON API over the queue manager and status store, plus a
//! server-sent event stream of status and donation events.

use crate::application::queue::QueueManager;
use crate::application::status::StatusStore;
use crate::domain::jobs::{Job, JobStatus};
use crate::domain::stems::Backend;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use axum::{Json, Router};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<QueueManager>,
    pub status: Arc<StatusStore>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct StatusView {
    #[serde(rename = "videoId")]
    pub id: String,
    pub status: JobStatus,
    pub path: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct BusyView {
    pub busy: bool,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SettingsView {
    pub output_path: PathBuf,
    pub py_torch_backend: Backend,
    pub can_show_donate_popup: bool,
}

/// Partial settings update; absent fields are left untouched.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdate {
    pub output_path: Option<PathBuf>,
    pub py_torch_backend: Option<Backend>,
    pub can_show_donate_popup: Option<bool>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/queue", get(get_queue).put(put_queue))
        .route("/busy", get(get_busy))
        .route("/status/:id", get(get_status).delete(delete_status))
        .route("/settings", get(get_settings).put(put_settings))
        .route("/events", get(events))
        .with_state(state)
}

async fn put_queue(State(state): State<AppState>, Json(jobs): Json<Vec<Job>>) -> Json<Vec<Job>> {
    debug!("Queue update with {} jobs", jobs.len());
    Json(state.queue.submit(jobs))
}

async fn get_queue(State(state): State<AppState>) -> Json<Vec<Job>> {
    Json(state.queue.items())
}

async fn get_busy(State(state): State<AppState>) -> Json<BusyView> {
    Json(BusyView {
        busy: state.queue.is_busy(),
    })
}

async fn get_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StatusView>, StatusCode> {
    let entry = state.status.get(&id).ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(StatusView {
        id,
        status: entry.status,
        path: entry.path,
    }))
}

async fn delete_status(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    state.status.clear(&id);
    StatusCode::NO_CONTENT
}

fn settings(status: &StatusStore) -> SettingsView {
    SettingsView {
        output_path: status.output_path(),
        py_torch_backend: status.backend(),
        can_show_donate_popup: status.can_show_donate_popup(),
    }
}

async fn get_settings(State(state): State<AppState>) -> Json<SettingsView> {
    Json(settings(&state.status))
}

async fn put_settings(
    State(state): State<AppState>,
    Json(update): Json<SettingsUpdate>,
) -> Json<SettingsView> {
    if let Some(path) = update.output_path {
        state.status.set_output_path(&path);
    }
    if let Some(backend) = update.py_torch_backend {
        state.status.set_backend(backend);
    }
    if let Some(allowed) = update.can_show_donate_popup {
        state.status.set_can_show_donate_popup(allowed);
    }
    Json(settings(&state.status))
}

async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let stream = BroadcastStream::new(state.status.hub().subscribe()).filter_map(|message| {
        match message {
            Ok(event) => Some(Event::default().json_data(event)),
            Err(e) => {
                warn!("Event subscriber fell behind: {}", e);
                None
            }
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
