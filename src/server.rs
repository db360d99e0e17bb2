//! Diagnostic HTTP surface.
//!
//! | Method | Path | Response |
//! |--------|------|----------|
//! | `GET` | `/` | plain-text banner |
//! | `GET`, `POST` | `/workflow` | starts a run for today, returns the instance |
//! | `GET` | `/status` | every instance, newest first, pretty JSON |
//! | `GET` | `/records?days=N` | Run Records of the last N days |
//!
//! [`serve`] can also trigger a run on a fixed interval, standing in for an
//! external scheduler.

use crate::error::{Error, Result};
use crate::history::recent_records;
use crate::utils::{today, validate_date};
use crate::workflow::PodcastWorkflow;
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

#[derive(Clone)]
pub struct AppState {
    pub workflow: Arc<PodcastWorkflow>,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = if self.is_fatal() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct RecordsQuery {
    pub days: Option<u32>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(banner))
        .route("/workflow", get(trigger).post(trigger))
        .route("/status", get(status))
        .route("/records", get(records))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn banner() -> &'static str {
    "Workflow API"
}

async fn trigger(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let params = state.workflow.params(today(), None);
    let instance = state.workflow.start(params).await?;
    info!(instance = %instance.id, "Triggered run over HTTP");
    Ok((StatusCode::ACCEPTED, Json(instance)))
}

async fn status(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let instances = state.workflow.instances().list().await?;
    let body = serde_json::to_string_pretty(&instances)?;
    Ok(([(header::CONTENT_TYPE, "application/json")], body))
}

async fn records(
    State(state): State<AppState>,
    Query(query): Query<RecordsQuery>,
) -> Result<impl IntoResponse> {
    let settings = state.workflow.settings();
    let days = query.days.unwrap_or(settings.keep_days).min(90);
    let from = validate_date(&today())?;
    let kv = state.workflow.kv();
    let records = recent_records(
        kv.as_ref(),
        &settings.run_env,
        &settings.default_source,
        from,
        days,
    )
    .await?;
    Ok(Json(records))
}

/// Start a run every `every`, beginning one interval from now.
pub fn spawn_scheduler(workflow: Arc<PodcastWorkflow>, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let params = workflow.params(today(), None);
            match workflow.start(params).await {
                Ok(instance) => info!(instance = %instance.id, "Scheduled run started"),
                Err(e) => error!(error = %e, "Scheduled run could not start"),
            }
        }
    });
}

/// Serve the router on `addr` until the process is stopped.
pub async fn serve(
    workflow: Arc<PodcastWorkflow>,
    addr: SocketAddr,
    every: Option<Duration>,
) -> Result<()> {
    if let Some(every) = every {
        info!(?every, "Scheduling periodic runs");
        spawn_scheduler(Arc::clone(&workflow), every);
    }

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "Listening");
    axum::serve(listener, router(AppState { workflow })).await?;
    Ok(())
}
