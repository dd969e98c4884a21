use std::collections::BTreeMap;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, RawQuery, State};
use axum::http::StatusCode;
use serde::Deserialize;

use crate::engine::{ConflictCheck, ReservationFilter, parse_category, parse_date, parse_interval};
use crate::model::{Reservation, ReservationDraft, ReservationPatch, Span};

use super::{ApiError, AppState, parse_body, parse_id, parse_query};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CheckParams {
    category: String,
    date: String,
    start_time: String,
    end_time: String,
    exclude_id: Option<String>,
}

pub(super) async fn list(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> Result<Json<Vec<Reservation>>, ApiError> {
    // `category` and `date` pick scopes; anything else is an equality filter.
    let mut fields: BTreeMap<String, String> = parse_query(query.as_deref())?;
    let filter = ReservationFilter {
        category: fields.remove("category").as_deref().map(parse_category).transpose()?,
        date: fields.remove("date").as_deref().map(parse_date).transpose()?,
    };
    Ok(Json(state.engine.list_reservations_where(filter, &fields).await))
}

pub(super) async fn create(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<Reservation>), ApiError> {
    let draft: ReservationDraft = parse_body(&body)?;
    let reservation = state.engine.create_reservation(&draft).await?;
    Ok((StatusCode::CREATED, Json(reservation)))
}

/// Advisory pre-check for the reservation form. Nothing is written.
pub(super) async fn check(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> Result<Json<ConflictCheck>, ApiError> {
    let params: CheckParams = parse_query(query.as_deref())?;
    let category = parse_category(&params.category)?;
    let date = parse_date(&params.date)?;
    let (start, end) = parse_interval(&params.start_time, &params.end_time)?;
    let exclude_id = params
        .exclude_id
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(parse_id)
        .transpose()?;

    let span = Span::new(start.minutes(), end.minutes());
    Ok(Json(state.engine.check_conflict(category, date, span, exclude_id).await))
}

pub(super) async fn detail(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Reservation>, ApiError> {
    let id = parse_id(&id)?;
    Ok(Json(state.engine.get_reservation(id).await?))
}

pub(super) async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Reservation>, ApiError> {
    let id = parse_id(&id)?;
    let patch: ReservationPatch = parse_body(&body)?;
    Ok(Json(state.engine.update_reservation(id, patch).await?))
}

pub(super) async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_id(&id)?;
    state.engine.cancel_reservation(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
