use serde_json::Value;

use crate::resource::ResourceKind;

use super::cache::{QueryCache, QueryState};
use super::key::{Filter, QueryKey};
use super::mutation::Mutation;
use super::transport::RequestError;

/// Keys a write to `kind` must invalidate beyond `all(kind)`, derived from
/// the resource table's parent links.
///
/// `body` is the record as written; `previous` is what the cache last saw of
/// it, so moving a child between parents refreshes both parents.
pub fn related_keys(kind: ResourceKind, body: Option<&Value>, previous: Option<&Value>) -> Vec<QueryKey> {
    let mut keys = Vec::new();
    if let Some(link) = kind.parent() {
        keys.push(QueryKey::list(link.kind));
        for record in [body, previous].into_iter().flatten() {
            if let Some(parent_id) = record.get(link.field).and_then(Value::as_str) {
                keys.push(QueryKey::detail(link.kind, parent_id));
            }
        }
    }
    keys
}

/// Families of every kind that hangs off `kind`; their records go away with a
/// deleted parent.
pub fn cascade_keys(kind: ResourceKind) -> impl Iterator<Item = QueryKey> {
    kind.children().map(|spec| QueryKey::all(spec.kind))
}

/// Table-driven read/write handle for one resource kind.
#[derive(Clone)]
pub struct ResourceHandle {
    cache: QueryCache,
    kind: ResourceKind,
}

impl ResourceHandle {
    pub(super) fn new(cache: QueryCache, kind: ResourceKind) -> Self {
        Self { cache, kind }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    fn collection_path(&self) -> String {
        format!("/api/{}", self.kind.path())
    }

    fn record_path(&self, id: &str) -> String {
        format!("/api/{}/{id}", self.kind.path())
    }

    pub async fn all(&self) -> QueryState {
        self.cache.query(&QueryKey::all(self.kind)).await
    }

    pub async fn list(&self, filter: Option<Filter>) -> QueryState {
        let key = QueryKey::list_filtered(self.kind, filter.unwrap_or_default());
        self.cache.query(&key).await
    }

    pub async fn detail(&self, id: &str) -> QueryState {
        self.cache.query(&QueryKey::detail(self.kind, id)).await
    }

    fn cached_detail(&self, id: &str) -> Option<Value> {
        self.cache
            .peek(&QueryKey::detail(self.kind, id))
            .and_then(|state| state.data)
    }

    pub async fn create(&self, body: Value) -> Result<Value, RequestError> {
        let mutation = Mutation::post(self.collection_path(), body.clone())
            .invalidates(QueryKey::all(self.kind))
            .invalidates_all(related_keys(self.kind, Some(&body), None));
        self.cache.mutate(mutation).await
    }

    pub async fn update(&self, id: &str, body: Value) -> Result<Value, RequestError> {
        let previous = self.cached_detail(id);
        let mutation = Mutation::put(self.record_path(id), body.clone())
            .invalidates(QueryKey::all(self.kind))
            .invalidates_all(related_keys(self.kind, Some(&body), previous.as_ref()))
            .target(QueryKey::detail(self.kind, id));
        self.cache.mutate(mutation).await
    }

    /// Delete a record. The server answers with the removed record, which
    /// names its parent even when this cache never loaded the child's detail.
    pub async fn delete(&self, id: &str) -> Result<(), RequestError> {
        let previous = self.cached_detail(id);
        let mutation = Mutation::delete(self.record_path(id))
            .invalidates(QueryKey::all(self.kind))
            .invalidates_all(related_keys(self.kind, None, previous.as_ref()))
            .invalidates_all(cascade_keys(self.kind))
            .target(QueryKey::detail(self.kind, id));
        let removed = self.cache.mutate(mutation).await?;
        if previous.is_none() {
            let parents = related_keys(self.kind, Some(&removed), None);
            if !parents.is_empty() {
                self.cache.invalidate(&parents).await;
            }
        }
        Ok(())
    }
}
