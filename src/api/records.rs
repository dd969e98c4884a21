use std::collections::BTreeMap;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, RawQuery, State};
use axum::http::StatusCode;
use serde_json::Value;

use crate::engine::EngineError;
use crate::resource::ResourceKind;

use super::{ApiError, AppState, parse_body, parse_id, parse_query};

fn collection(path: &str) -> Result<ResourceKind, ApiError> {
    ResourceKind::from_path(path)
        .filter(|kind| kind.is_generic())
        .ok_or_else(|| ApiError::UnknownCollection(path.to_string()))
}

pub(super) async fn list(
    State(state): State<AppState>,
    Path(path): Path<String>,
    RawQuery(query): RawQuery,
) -> Result<Json<Vec<Value>>, ApiError> {
    let kind = collection(&path)?;
    let filter: BTreeMap<String, String> = parse_query(query.as_deref())?;
    let records = state.engine.list_records(kind, &filter);
    Ok(Json(records.iter().map(|r| r.to_json()).collect()))
}

pub(super) async fn create(
    State(state): State<AppState>,
    Path(path): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let kind = collection(&path)?;
    let body: Value = parse_body(&body)?;
    let record = state.engine.create_record(kind, body).await?;
    Ok((StatusCode::CREATED, Json(record.to_json())))
}

pub(super) async fn detail(
    State(state): State<AppState>,
    Path((path, id)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let kind = collection(&path)?;
    let id = parse_id(&id)?;
    Ok(Json(state.engine.get_record(kind, id)?.to_json()))
}

pub(super) async fn replace(
    State(state): State<AppState>,
    Path((path, id)): Path<(String, String)>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let kind = collection(&path)?;
    let id = parse_id(&id)?;
    let body: Value = parse_body(&body)?;
    Ok(Json(state.engine.update_record(kind, id, body).await?.to_json()))
}

/// Responds with the deleted record so callers can tell which parent it hung off.
pub(super) async fn delete(
    State(state): State<AppState>,
    Path((path, id)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let kind = collection(&path)?;
    let id = parse_id(&id)?;
    let removed = state.engine.delete_record(kind, id).await?;
    removed
        .last()
        .map(|record| Json(record.to_json()))
        .ok_or(ApiError::Engine(EngineError::NotFound(id)))
}
