use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::model::{Reservation, ReservationDraft, ReservationPatch};
use crate::resource::ResourceKind;

use super::cache::{QueryCache, QueryState};
use super::key::Filter;
use super::resources::ResourceHandle;
use super::transport::{Method, RequestError, call};

/// Query for the form's pre-submit conflict check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConflictRequest {
    pub category: String,
    pub date: String,
    pub start_time: String,
    pub end_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude_id: Option<String>,
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, RequestError> {
    serde_json::from_value(value).map_err(|e| RequestError::Decode(e.to_string()))
}

fn encode(value: &impl Serialize) -> Result<Value, RequestError> {
    serde_json::to_value(value).map_err(|e| RequestError::Decode(e.to_string()))
}

/// Typed reservation operations on top of the generic handle.
#[derive(Clone)]
pub struct ReservationsClient {
    cache: QueryCache,
    handle: ResourceHandle,
}

impl ReservationsClient {
    pub(super) fn new(cache: QueryCache) -> Self {
        let handle = cache.resource(ResourceKind::Reservation);
        Self { cache, handle }
    }

    pub fn handle(&self) -> &ResourceHandle {
        &self.handle
    }

    /// Listing narrowed by `category` and/or `date` (`YYYY-MM-DD`).
    pub async fn list(&self, category: Option<&str>, date: Option<&str>) -> QueryState {
        let mut filter = Filter::new();
        if let Some(category) = category {
            filter.insert("category".into(), category.into());
        }
        if let Some(date) = date {
            filter.insert("date".into(), date.into());
        }
        self.handle.list(Some(filter)).await
    }

    pub async fn detail(&self, id: &str) -> QueryState {
        self.handle.detail(id).await
    }

    pub async fn create(&self, draft: &ReservationDraft) -> Result<Reservation, RequestError> {
        decode(self.handle.create(encode(draft)?).await?)
    }

    pub async fn update(&self, id: &str, patch: &ReservationPatch) -> Result<Reservation, RequestError> {
        decode(self.handle.update(id, encode(patch)?).await?)
    }

    pub async fn cancel(&self, id: &str) -> Result<(), RequestError> {
        self.handle.delete(id).await
    }

    /// Ask the server whether the slot is taken. Never cached: the answer is
    /// only advisory and the server checks again on submit.
    pub async fn check_conflict(&self, request: &ConflictRequest) -> Result<bool, RequestError> {
        let query = serde_urlencoded::to_string(request)
            .map_err(|e| RequestError::Decode(format!("cannot encode check: {e}")))?;
        let path = format!("/api/reservations/check?{query}");
        let answer = call(self.cache.transport(), Method::Get, &path, None).await?;
        answer
            .get("conflict")
            .and_then(Value::as_bool)
            .ok_or_else(|| RequestError::Decode(format!("unexpected check response: {answer}")))
    }
}
