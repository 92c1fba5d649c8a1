// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Read-only status HTTP endpoint.
//!
//! Exposes, per Export, the topic, the last-known point and the receipt and
//! publish timestamps. The Export actors publish snapshots into shared
//! slots; this server only ever reads them.
//!
//! # Endpoints
//!
//! - `GET /api/v1/health` - liveness check
//! - `GET /api/v1/exports` (alias `GET /exports`) - per-export state

use crate::export::{ExportHandle, ExportStatus};
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};

struct ExportEntry {
    name: String,
    topic: String,
    status: Arc<RwLock<ExportStatus>>,
}

/// Owned snapshot sources for the status server, detached from the handles.
pub struct StatusState {
    exports: Vec<ExportEntry>,
}

impl StatusState {
    /// Collect the shared status slots of every Export.
    pub fn from_handles(handles: &[ExportHandle]) -> Self {
        Self {
            exports: handles
                .iter()
                .map(|handle| ExportEntry {
                    name: handle.name().to_string(),
                    topic: handle.topic().to_string(),
                    status: handle.status_slot(),
                })
                .collect(),
        }
    }
}

/// One export's entry in the status report.
#[derive(Serialize)]
struct ExportReport {
    name: String,
    topic: String,
    last_point: Option<crate::export::Point>,
    received_time: Option<DateTime<Utc>>,
    published_time: Option<DateTime<Utc>>,
}

/// Serve the status endpoint until shutdown fires.
pub async fn serve(
    address: String,
    state: StatusState,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let state = Arc::new(state);

    let app = Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/exports", get(list_exports))
        .route("/exports", get(list_exports))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(address = %address, "status endpoint listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn list_exports(State(state): State<Arc<StatusState>>) -> Json<Vec<ExportReport>> {
    let mut reports = Vec::with_capacity(state.exports.len());
    for entry in &state.exports {
        let status = entry.status.read().await.clone();
        reports.push(ExportReport {
            name: entry.name.clone(),
            topic: entry.topic.clone(),
            last_point: status.last_point,
            received_time: status.received_time,
            published_time: status.published_time,
        });
    }
    Json(reports)
}
