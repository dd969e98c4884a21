use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared, join_all};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;

use crate::observability::*;
use crate::resource::ResourceKind;

use super::key::QueryKey;
use super::mutation::Mutation;
use super::reservations::ReservationsClient;
use super::resources::ResourceHandle;
use super::subscription::Subscription;
use super::transport::{Method, RequestError, Transport, call};

/// Queries that keep racing invalidations give up after this many fetches and
/// return whatever the entry holds.
const MAX_QUERY_ROUNDS: usize = 4;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Extra attempts for a read that failed with a transport-class error.
    pub read_retries: u32,
    /// Linear backoff unit between read attempts.
    pub retry_backoff: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            read_retries: 2,
            retry_backoff: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
    InFlight,
}

/// What a view sees for one key.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryState {
    pub data: Option<Value>,
    pub is_loading: bool,
    pub error: Option<RequestError>,
    pub freshness: Freshness,
}

impl Default for QueryState {
    fn default() -> Self {
        Self {
            data: None,
            is_loading: false,
            error: None,
            freshness: Freshness::Stale,
        }
    }
}

impl QueryState {
    pub fn is_fresh(&self) -> bool {
        self.freshness == Freshness::Fresh
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<Option<T>, RequestError> {
        self.data
            .clone()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| RequestError::Decode(e.to_string()))
    }
}

type FetchResult = Result<Value, RequestError>;
type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;

struct InFlight {
    seq: u64,
    generation: u64,
    fetch: SharedFetch,
}

pub(super) struct Entry {
    data: Option<Value>,
    /// Sequence number of the fetch that produced `data`.
    data_seq: u64,
    error: Option<RequestError>,
    fresh: bool,
    /// Bumped on every invalidation.
    generation: u64,
    in_flight: Option<InFlight>,
    subscribers: usize,
    tx: watch::Sender<QueryState>,
}

impl Entry {
    fn new() -> Self {
        let (tx, _) = watch::channel(QueryState::default());
        Self {
            data: None,
            data_seq: 0,
            error: None,
            fresh: false,
            generation: 0,
            in_flight: None,
            subscribers: 0,
            tx,
        }
    }

    fn state(&self) -> QueryState {
        let freshness = if self.fresh {
            Freshness::Fresh
        } else if self.in_flight.is_some() {
            Freshness::InFlight
        } else {
            Freshness::Stale
        };
        QueryState {
            data: self.data.clone(),
            is_loading: self.in_flight.is_some(),
            error: self.error.clone(),
            freshness,
        }
    }

    fn publish(&self) {
        self.tx.send_replace(self.state());
    }
}

pub(super) struct Inner {
    transport: Arc<dyn Transport>,
    config: CacheConfig,
    entries: DashMap<QueryKey, Entry>,
    next_seq: AtomicU64,
}

impl Inner {
    async fn fetch_with_retry(&self, key: &QueryKey) -> FetchResult {
        let path = key.fetch_path()?;
        let mut attempt = 0;
        loop {
            metrics::counter!(CACHE_FETCHES_TOTAL, "kind" => key.kind.path()).increment(1);
            match call(self.transport.as_ref(), Method::Get, &path, None).await {
                Err(e) if e.is_retryable() && attempt < self.config.read_retries => {
                    attempt += 1;
                    tracing::warn!(
                        "fetch of {key} failed ({e}), retry {attempt}/{}",
                        self.config.read_retries
                    );
                    tokio::time::sleep(self.config.retry_backoff * attempt).await;
                }
                result => return result,
            }
        }
    }

    /// Store a fetch result. Older results than the stored data are dropped,
    /// and a fetch that began before the latest invalidation never marks the
    /// entry fresh.
    fn complete_fetch(&self, key: &QueryKey, seq: u64, generation: u64, result: &FetchResult) {
        let Some(mut entry) = self.entries.get_mut(key) else {
            return;
        };
        let current = entry.in_flight.as_ref().is_some_and(|f| f.seq == seq);
        if current {
            entry.in_flight = None;
        }
        match result {
            Ok(data) if seq >= entry.data_seq => {
                entry.data = Some(data.clone());
                entry.data_seq = seq;
                entry.error = None;
                entry.fresh = generation == entry.generation;
            }
            Ok(_) => tracing::debug!("dropping out-of-order fetch #{seq} of {key}"),
            Err(e) if current => entry.error = Some(e.clone()),
            Err(e) => tracing::debug!("ignoring failure of superseded fetch #{seq} of {key}: {e}"),
        }
        entry.publish();
    }

    pub(super) fn release(&self, key: &QueryKey) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.subscribers = entry.subscribers.saturating_sub(1);
        }
    }
}

enum Begin {
    Hit(QueryState),
    /// Await `fetch`, started at entry generation `generation`.
    Wait { fetch: SharedFetch, generation: u64 },
}

/// Per-session cache of query results, keyed by [`QueryKey`].
///
/// Cheap to clone; clones share entries. Entry locks are short and never
/// held across an `.await`. Each fetch runs in its own task, so a caller that
/// goes away mid-fetch does not cancel it.
#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<Inner>,
}

impl QueryCache {
    pub fn new(transport: Arc<dyn Transport>, config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                config,
                entries: DashMap::new(),
                next_seq: AtomicU64::new(0),
            }),
        }
    }

    pub(super) fn transport(&self) -> &dyn Transport {
        self.inner.transport.as_ref()
    }

    /// Cached state for `key`, fetching first when it is absent or stale.
    /// Concurrent callers share one fetch.
    pub async fn query(&self, key: &QueryKey) -> QueryState {
        for _ in 0..MAX_QUERY_ROUNDS {
            let (fetch, generation) = match self.begin(key) {
                Begin::Hit(state) => return state,
                Begin::Wait { fetch, generation } => (fetch, generation),
            };
            let result = fetch.await;

            let Some(entry) = self.inner.entries.get(key) else {
                // Cleared while fetching.
                return QueryState {
                    data: result.as_ref().ok().cloned(),
                    error: result.err(),
                    ..QueryState::default()
                };
            };
            if entry.fresh {
                return entry.state();
            }
            match result {
                Err(e) if entry.generation == generation => {
                    let mut state = entry.state();
                    state.error.get_or_insert(e);
                    return state;
                }
                Err(e) => tracing::debug!("superseded fetch of {key} failed ({e}), fetching again"),
                // Invalidated while in flight: go again.
                Ok(_) => {}
            }
        }
        tracing::debug!("{key} kept changing, returning latest state");
        self.peek(key).unwrap_or_default()
    }

    fn begin(&self, key: &QueryKey) -> Begin {
        let mut entry = self.inner.entries.entry(key.clone()).or_insert_with(Entry::new);
        if entry.fresh {
            metrics::counter!(CACHE_HITS_TOTAL, "kind" => key.kind.path()).increment(1);
            return Begin::Hit(entry.state());
        }
        if let Some(flight) = &entry.in_flight
            && flight.generation == entry.generation
        {
            metrics::counter!(CACHE_DEDUPED_TOTAL, "kind" => key.kind.path()).increment(1);
            return Begin::Wait {
                fetch: flight.fetch.clone(),
                generation: flight.generation,
            };
        }

        metrics::counter!(CACHE_MISSES_TOTAL, "kind" => key.kind.path()).increment(1);
        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let generation = entry.generation;
        let fetch = self.spawn_fetch(key.clone(), seq, generation);
        entry.in_flight = Some(InFlight {
            seq,
            generation,
            fetch: fetch.clone(),
        });
        entry.publish();
        Begin::Wait { fetch, generation }
    }

    fn spawn_fetch(&self, key: QueryKey, seq: u64, generation: u64) -> SharedFetch {
        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            let result = inner.fetch_with_retry(&key).await;
            inner.complete_fetch(&key, seq, generation, &result);
            result
        });
        async move {
            task.await
                .unwrap_or_else(|e| Err(RequestError::Transport(format!("fetch task failed: {e}"))))
        }
        .boxed()
        .shared()
    }

    /// Run a write. On success every key covered by `mutation.invalidates` is
    /// marked stale and subscribed ones are re-fetched before this returns.
    /// A failure invalidates nothing, except a not-found failure, which
    /// invalidates the mutation's target detail key.
    pub async fn mutate(&self, mutation: Mutation) -> Result<Value, RequestError> {
        let Mutation {
            method,
            path,
            body,
            invalidates,
            target,
        } = mutation;
        match call(self.transport(), method, &path, body).await {
            Ok(value) => {
                self.invalidate(&invalidates).await;
                Ok(value)
            }
            Err(err) => {
                tracing::debug!("{method} {path} failed: {err}");
                if let (RequestError::NotFound(_), Some(target)) = (&err, &target) {
                    self.invalidate(std::slice::from_ref(target)).await;
                }
                Err(err)
            }
        }
    }

    /// Mark every cached key covered by `keys` stale and re-fetch the ones
    /// that have subscribers. The rest wait for their next `query`.
    pub async fn invalidate(&self, keys: &[QueryKey]) {
        let refetch = self.mark_stale(keys);
        join_all(refetch.iter().map(|key| self.query(key))).await;
    }

    fn mark_stale(&self, keys: &[QueryKey]) -> Vec<QueryKey> {
        let mut refetch = Vec::new();
        for mut entry in self.inner.entries.iter_mut() {
            if !keys.iter().any(|k| k.covers(entry.key())) {
                continue;
            }
            entry.generation += 1;
            entry.fresh = false;
            entry.publish();
            metrics::counter!(CACHE_INVALIDATIONS_TOTAL, "kind" => entry.key().kind.path()).increment(1);
            if entry.subscribers > 0 {
                refetch.push(entry.key().clone());
            }
        }
        refetch
    }

    /// Register a mounted view. Dropping the subscription unregisters it.
    pub fn subscribe(&self, key: &QueryKey) -> Subscription {
        let mut entry = self.inner.entries.entry(key.clone()).or_insert_with(Entry::new);
        entry.subscribers += 1;
        let rx = entry.tx.subscribe();
        Subscription::new(key.clone(), rx, Arc::downgrade(&self.inner))
    }

    pub async fn mount(&self, key: &QueryKey) -> (Subscription, QueryState) {
        let subscription = self.subscribe(key);
        let state = self.query(key).await;
        (subscription, state)
    }

    pub fn peek(&self, key: &QueryKey) -> Option<QueryState> {
        self.inner.entries.get(key).map(|e| e.state())
    }

    /// Drop entries nobody is watching or fetching. Returns how many went.
    pub fn collect_garbage(&self) -> usize {
        let before = self.inner.entries.len();
        self.inner
            .entries
            .retain(|_, e| e.subscribers > 0 || e.in_flight.is_some());
        before.saturating_sub(self.inner.entries.len())
    }

    pub fn clear(&self) {
        let dropped = self.inner.entries.len();
        self.inner.entries.clear();
        tracing::debug!("query cache cleared ({dropped} entries)");
    }

    pub fn resource(&self, kind: ResourceKind) -> ResourceHandle {
        ResourceHandle::new(self.clone(), kind)
    }

    pub fn reservations(&self) -> ReservationsClient {
        ReservationsClient::new(self.clone())
    }
}
