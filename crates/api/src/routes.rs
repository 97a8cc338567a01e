//! HTTP route handlers for the API.

use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    Json,
};
use beebo_common::BeeboError;
use beebo_memory::{ExistingMemory, IngestOutcome, IngestRequest, Memory, Recall};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ApiError;
use crate::state::AppState;

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memories: Option<usize>,
}

pub async fn healthz(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let memories = state.store.count().await.ok();
    Json(HealthResponse {
        status: if memories.is_some() { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.uptime_seconds(),
        memories,
    })
}

pub async fn ping() -> &'static str {
    "pong"
}

#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub name: &'static str,
    pub version: &'static str,
}

pub async fn version() -> Json<VersionResponse> {
    Json(VersionResponse {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Wire form of an ingest outcome.
#[derive(Debug, Serialize, PartialEq)]
pub struct IngestResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub existing: Option<ExistingMemory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
}

impl IngestResponse {
    fn written(id: String, last_updated: DateTime<Utc>, updated: bool) -> Self {
        Self {
            ok: true,
            id: Some(id),
            last_updated: Some(last_updated),
            updated: updated.then_some(true),
            error: None,
            existing: None,
            similarity: None,
        }
    }

    fn rejected(error: &'static str, existing: ExistingMemory, similarity: Option<f32>) -> Self {
        Self {
            ok: false,
            id: None,
            last_updated: None,
            updated: None,
            error: Some(error),
            existing: Some(existing),
            similarity,
        }
    }
}

impl From<IngestOutcome> for IngestResponse {
    fn from(outcome: IngestOutcome) -> Self {
        match outcome {
            IngestOutcome::Created { id, last_updated } => Self::written(id, last_updated, false),
            IngestOutcome::Updated { id, last_updated } => Self::written(id, last_updated, true),
            IngestOutcome::Duplicate { existing } => Self::rejected("duplicate", existing, None),
            IngestOutcome::SemanticDuplicate {
                existing,
                similarity,
            } => Self::rejected("semantic duplicate", existing, Some(similarity)),
        }
    }
}

/// Store a memory.
pub async fn create_memory(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<IngestRequest>, JsonRejection>,
) -> ApiResult<IngestResponse> {
    let Json(request) = payload?;
    let new = request.into_new_memory()?;

    info!(
        text_preview = %new.text.chars().take(50).collect::<String>(),
        memory_type = ?new.memory_type,
        source = ?new.source,
        "Received memory"
    );

    let outcome = state.ingestor.ingest(new).await?;
    Ok(Json(IngestResponse::from(outcome)))
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub ok: bool,
    pub count: usize,
    pub memories: Vec<Memory>,
}

impl From<Vec<Memory>> for ListResponse {
    fn from(memories: Vec<Memory>) -> Self {
        Self {
            ok: true,
            count: memories.len(),
            memories,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RecallResponse {
    pub ok: bool,
    #[serde(flatten)]
    pub recall: Recall,
}

#[derive(Debug, Deserialize)]
pub struct LimitParams {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct RecallParams {
    pub q: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct TagParams {
    pub tag: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct TypeParams {
    #[serde(rename = "type")]
    pub memory_type: Option<String>,
    pub limit: Option<usize>,
}

pub async fn list_all(
    State(state): State<Arc<AppState>>,
    params: Result<Query<LimitParams>, QueryRejection>,
) -> ApiResult<ListResponse> {
    let Query(params) = params?;
    let memories = state.recall.all(params.limit).await?;
    Ok(Json(ListResponse::from(memories)))
}

/// Substring recall; also served as `/memories/search`.
pub async fn recall(
    State(state): State<Arc<AppState>>,
    params: Result<Query<RecallParams>, QueryRejection>,
) -> ApiResult<RecallResponse> {
    let Query(params) = params?;
    let query = params.q.unwrap_or_default();
    let recall = state.recall.recall(&query, params.limit).await?;
    debug!(query = %query, count = recall.count, "Recall served");
    Ok(Json(RecallResponse { ok: true, recall }))
}

pub async fn by_tag(
    State(state): State<Arc<AppState>>,
    params: Result<Query<TagParams>, QueryRejection>,
) -> ApiResult<ListResponse> {
    let Query(params) = params?;
    let tag = params.tag.unwrap_or_default();
    let memories = state.recall.by_tag(&tag, params.limit).await?;
    Ok(Json(ListResponse::from(memories)))
}

pub async fn by_type(
    State(state): State<Arc<AppState>>,
    params: Result<Query<TypeParams>, QueryRejection>,
) -> ApiResult<ListResponse> {
    let Query(params) = params?;
    let memory_type = params.memory_type.unwrap_or_default();
    let memories = state.recall.by_type(&memory_type, params.limit).await?;
    Ok(Json(ListResponse::from(memories)))
}

pub async fn today(State(state): State<Arc<AppState>>) -> ApiResult<ListResponse> {
    let memories = state.recall.today().await?;
    Ok(Json(ListResponse::from(memories)))
}

pub async fn get_memory(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Memory> {
    match state.store.get_by_id(&id).await? {
        Some(memory) => Ok(Json(memory)),
        None => Err(BeeboError::NotFound(id).into()),
    }
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub ok: bool,
    pub deleted: bool,
}

pub async fn delete_memory(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<DeleteResponse> {
    if state.store.delete_by_id(&id).await? {
        info!(id = %id, "Deleted memory");
        Ok(Json(DeleteResponse {
            ok: true,
            deleted: true,
        }))
    } else {
        Err(BeeboError::NotFound(id).into())
    }
}
