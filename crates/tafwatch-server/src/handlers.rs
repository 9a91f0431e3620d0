//! Read API handlers.
//!
//! Every handler copies what it needs out of the replica under a short read
//! lock and serializes afterwards; no handler awaits while holding it.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use tafwatch_core::ids::{FullTmiId, SessionId};
use tafwatch_core::model::Session;
use tafwatch_core::wire::{TmiDetail, TmiListing, TmiSummary, VersionSelector};
use tafwatch_store::LoggedEvent;

use crate::server::AppState;

const DEFAULT_EVENT_LIMIT: usize = 100;

/// Error body: `{"code": ..., "message": ...}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "NOT_FOUND",
            message: message.into(),
        }
    }

    pub fn version_not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "VERSION_NOT_FOUND",
            message: message.into(),
        }
    }

    pub fn invalid_version(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "INVALID_VERSION",
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({"code": self.code, "message": self.message}))).into_response()
    }
}

/// Health check HTTP endpoint.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let (sessions, tmis) = {
        let store = state.replica.read();
        (store.sessions().len(), store.tmis().len())
    };
    Json(json!({
        "status": "healthy",
        "sessions": sessions,
        "tmis": tmis,
        "events": state.replica.event_log().len(),
        "startedAt": state.started_at,
    }))
}

pub async fn list_sessions(State(state): State<AppState>) -> Json<Vec<Session>> {
    Json(state.replica.read().sessions().values().cloned().collect())
}

#[derive(Debug, Serialize)]
pub struct SessionView {
    pub session: Session,
    pub tmis: Vec<TmiSummary>,
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(session): Path<String>,
) -> Result<Json<SessionView>, ApiError> {
    let id = SessionId::from_raw(session);
    let store = state.replica.read();
    let session = store
        .session(&id)
        .cloned()
        .ok_or_else(|| ApiError::not_found(format!("session {id} not found")))?;
    let tmis = store.tmis_in_session(&id).map(TmiSummary::from).collect();
    Ok(Json(SessionView { session, tmis }))
}

/// Same shape as the upstream listing, keyed by full identifier.
pub async fn list_tmis(State(state): State<AppState>) -> Json<TmiListing> {
    let listing = state
        .replica
        .read()
        .tmis()
        .iter()
        .map(|(id, tmi)| (id.to_string(), TmiSummary::from(tmi)))
        .collect();
    Json(listing)
}

pub async fn tmi_latest_redirect(
    Path((client, session, tmt, tmi)): Path<(String, String, String, String)>,
) -> Redirect {
    Redirect::temporary(&format!("/tmis/{client}/{session}/{tmt}/{tmi}/latest"))
}

pub async fn get_tmi(
    State(state): State<AppState>,
    Path((client, session, tmt, tmi, version)): Path<(String, String, String, String, String)>,
) -> Result<Json<TmiDetail>, ApiError> {
    let selector: VersionSelector = version.parse().map_err(ApiError::invalid_version)?;
    let full_id = FullTmiId::merge(&client, &session, &tmt, &tmi);

    let store = state.replica.read();
    let tmi = store
        .tmi(&full_id)
        .ok_or_else(|| ApiError::not_found(format!("TMI {full_id} not found")))?;
    let detail = match selector {
        VersionSelector::All => Some(TmiDetail::all_versions(tmi)),
        VersionSelector::Latest => TmiDetail::single_version(tmi, tmi.latest_version),
        VersionSelector::At(v) => TmiDetail::single_version(tmi, v),
    };
    detail
        .map(Json)
        .ok_or_else(|| ApiError::version_not_found(format!("TMI {full_id} has no state at version {version}")))
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub limit: Option<usize>,
}

/// Diagnostic event log, newest first.
pub async fn recent_events(State(state): State<AppState>, Query(query): Query<EventsQuery>) -> Json<Vec<LoggedEvent>> {
    Json(state.replica.event_log().recent(query.limit.unwrap_or(DEFAULT_EVENT_LIMIT)))
}
