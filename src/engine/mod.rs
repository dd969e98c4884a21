mod conflict;
mod error;
mod mutations;
mod queries;
mod store;
mod validate;

pub use conflict::{ConflictCheck, check_conflict, find_conflicting};
pub use error::EngineError;
pub use queries::ReservationFilter;
pub use store::{Record, RecordStore};
pub use validate::{Candidate, parse_category, parse_date, parse_interval, validate_draft};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedScopeState = Arc<RwLock<ScopeState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break, // channel empty, flush batch
                    }
                }

                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
    tracing::debug!("wal writer stopped");
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("wal flush of {} events failed: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so partially buffered bytes don't
    // leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

/// Authoritative store for reservations and generic records.
///
/// Reservations are partitioned by conflict scope; each scope sits behind its
/// own `RwLock`, and a writer holds that lock across conflict check, WAL
/// append and apply. Generic records are written one at a time through
/// `record_writes`.
pub struct Engine {
    pub(super) scopes: DashMap<Scope, SharedScopeState>,
    /// Reverse lookup: reservation id → the scope holding it.
    pub(super) reservation_scope: DashMap<Ulid, Scope>,
    pub(super) records: RecordStore,
    pub(super) record_writes: Mutex<()>,
    /// Mutations hold this shared; compaction takes it exclusively so no
    /// write lands between the snapshot and the file swap.
    pub(super) write_barrier: RwLock<()>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
}

impl Engine {
    /// Replay the WAL at `wal_path` and start its group-commit writer.
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            scopes: DashMap::new(),
            reservation_scope: DashMap::new(),
            records: RecordStore::new(),
            record_writes: Mutex::new(()),
            write_barrier: RwLock::new(()),
            wal_tx,
        };

        // We're the sole owner of these locks during replay, so try_write
        // always succeeds. Never block here: this may run inside a runtime.
        for event in &events {
            engine.replay_event(event);
        }
        tracing::info!(
            "replayed {} events: {} reservations, records {:?}",
            events.len(),
            engine.reservation_scope.len(),
            engine.records.counts()
        );

        Ok(engine)
    }

    fn replay_event(&self, event: &Event) {
        match event {
            Event::ReservationCreated { reservation } => {
                self.replay_insert(reservation.clone());
            }
            Event::ReservationUpdated {
                previous_scope,
                reservation,
            } => {
                self.replay_remove(previous_scope, &reservation.id);
                self.replay_insert(reservation.clone());
            }
            Event::ReservationCancelled { id, scope } => {
                self.replay_remove(scope, id);
            }
            Event::RecordPut { .. } | Event::RecordDeleted { .. } => self.records.apply_event(event),
        }
    }

    fn replay_insert(&self, reservation: Reservation) {
        let scope = reservation.scope();
        let state = self.scope_state(scope);
        let Ok(mut guard) = state.try_write() else {
            tracing::error!("replay: scope {scope} unexpectedly locked");
            return;
        };
        if let Err(other) = guard.admit(&reservation) {
            tracing::warn!("replay: {} overlaps {other} in {scope}; keeping both", reservation.id);
        }
        self.reservation_scope.insert(reservation.id, scope);
        guard.insert(reservation);
    }

    fn replay_remove(&self, scope: &Scope, id: &Ulid) {
        if let Some(state) = self.get_scope(scope)
            && let Ok(mut guard) = state.try_write()
        {
            guard.remove(*id);
        }
        self.reservation_scope.remove(id);
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_scope(&self, scope: &Scope) -> Option<SharedScopeState> {
        self.scopes.get(scope).map(|e| e.value().clone())
    }

    /// Scope state, created empty on first use.
    pub(super) fn scope_state(&self, scope: Scope) -> SharedScopeState {
        self.scopes
            .entry(scope)
            .or_insert_with(|| Arc::new(RwLock::new(ScopeState::new(scope))))
            .value()
            .clone()
    }

    pub fn scope_of(&self, reservation_id: &Ulid) -> Option<Scope> {
        self.reservation_scope.get(reservation_id).map(|e| *e.value())
    }

    pub fn reservation_count(&self) -> usize {
        self.reservation_scope.len()
    }

    /// Lookup reservation → scope, acquire that scope's write lock, and make
    /// sure the reservation did not move while we waited for it.
    pub(super) async fn resolve_reservation_write(
        &self,
        id: &Ulid,
    ) -> Result<(Scope, tokio::sync::OwnedRwLockWriteGuard<ScopeState>), EngineError> {
        loop {
            let scope = self.scope_of(id).ok_or(EngineError::NotFound(*id))?;
            let guard = self.scope_state(scope).write_owned().await;
            if guard.get(id).is_some() {
                return Ok((scope, guard));
            }
            if self.scope_of(id) == Some(scope) {
                // Index still points here but the scope lost it: treat as gone.
                return Err(EngineError::NotFound(*id));
            }
        }
    }
}
