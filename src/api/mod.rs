//! REST surface over the engine.
//!
//! Reservations get their own handlers because they go through the conflict
//! checker. Every other resource kind is served by one set of generic record
//! handlers keyed by the collection path from the resource table.

mod error;
mod records;
mod reservations;

pub use error::ApiError;

use std::sync::Arc;

use axum::Router;
use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use serde::de::DeserializeOwned;
use tower_http::trace::TraceLayer;
use ulid::Ulid;

use crate::engine::Engine;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

pub fn router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route(
            "/api/reservations",
            get(reservations::list).post(reservations::create),
        )
        .route("/api/reservations/check", get(reservations::check))
        .route(
            "/api/reservations/{id}",
            get(reservations::detail)
                .put(reservations::update)
                .delete(reservations::cancel),
        )
        .route("/api/{collection}", get(records::list).post(records::create))
        .route(
            "/api/{collection}/{id}",
            get(records::detail).put(records::replace).delete(records::delete),
        )
        .layer(middleware::from_fn(count_requests))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { engine })
}

async fn count_requests(req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    let response = next.run(req).await;
    metrics::counter!(crate::observability::HTTP_REQUESTS_TOTAL,
        "method" => method,
        "status" => response.status().as_u16().to_string())
    .increment(1);
    response
}

/// Decode a JSON body ourselves so malformed input gets the API's error shape.
fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {e}")))
}

fn parse_query<T: DeserializeOwned>(query: Option<&str>) -> Result<T, ApiError> {
    serde_urlencoded::from_str(query.unwrap_or_default())
        .map_err(|e| ApiError::BadRequest(format!("invalid query string: {e}")))
}

fn parse_id(raw: &str) -> Result<Ulid, ApiError> {
    Ulid::from_string(raw).map_err(|_| ApiError::BadRequest(format!("invalid id: {raw:?}")))
}
