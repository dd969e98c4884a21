use serde_json::{Map, Value};
use tokio::sync::oneshot;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::resource::{RESOURCES, ResourceKind};

use super::conflict::check_no_conflict;
use super::validate::{Candidate, validate_draft, validate_record_body};
use super::{Engine, EngineError, Record, WalCommand};

/// Give a validated candidate its identity and fill in the category defaults
/// for an omitted title or location. Defaults never take part in conflict checks.
fn into_reservation(id: Ulid, candidate: Candidate) -> Reservation {
    let category = candidate.category;
    Reservation {
        id,
        category,
        date: candidate.date,
        start_time: candidate.start_time,
        end_time: candidate.end_time,
        title: candidate
            .title
            .unwrap_or_else(|| category.default_title().to_string()),
        location: candidate
            .location
            .unwrap_or_else(|| category.default_location().to_string()),
        booker_name: candidate.booker_name,
        apartment: candidate.apartment,
    }
}

const MAX_UPDATE_ATTEMPTS: usize = 8;

impl Engine {
    /// Validate, check for conflicts and store a new reservation as one
    /// atomic step with respect to its scope.
    pub async fn create_reservation(&self, draft: &ReservationDraft) -> Result<Reservation, EngineError> {
        let candidate = validate_draft(draft)?;
        let scope = candidate.scope();
        let span = candidate.span();

        let _barrier = self.write_barrier.read().await;
        let state = self.scope_state(scope);
        let mut guard = state.write().await;
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_SCOPE {
            return Err(EngineError::LimitExceeded("too many reservations for this day"));
        }

        check_no_conflict(&guard, &span, None)?;

        let reservation = into_reservation(Ulid::new(), candidate);
        guard.admit(&reservation).map_err(EngineError::Conflict)?;

        let event = Event::ReservationCreated {
            reservation: reservation.clone(),
        };
        self.wal_append(&event).await?;
        guard.insert(reservation.clone());
        self.reservation_scope.insert(reservation.id, scope);

        metrics::counter!(crate::observability::RESERVATIONS_CREATED_TOTAL,
            "category" => scope.category.as_str())
        .increment(1);
        tracing::info!(
            "reserved {scope} {}-{} for {} ({})",
            reservation.start_time,
            reservation.end_time,
            reservation.booker_name,
            reservation.id
        );
        Ok(reservation)
    }

    /// Merge `patch` onto the stored reservation, re-validate and re-check it
    /// with itself excluded. Category or date changes move the reservation to
    /// another scope; both scopes are locked in sorted order.
    pub async fn update_reservation(
        &self,
        id: Ulid,
        patch: ReservationPatch,
    ) -> Result<Reservation, EngineError> {
        let _barrier = self.write_barrier.read().await;

        for _ in 0..MAX_UPDATE_ATTEMPTS {
            let old_scope = self.scope_of(&id).ok_or(EngineError::NotFound(id))?;
            let snapshot = {
                let state = self.scope_state(old_scope);
                let guard = state.read().await;
                match guard.get(&id) {
                    Some(r) => r.clone(),
                    None => continue, // moved or cancelled meanwhile
                }
            };

            let candidate = validate_draft(&patch.clone().apply_to(&snapshot))?;
            let new_scope = candidate.scope();
            let updated = into_reservation(id, candidate);

            if new_scope == old_scope {
                let state = self.scope_state(old_scope);
                let mut guard = state.write().await;
                if guard.get(&id) != Some(&snapshot) {
                    continue;
                }
                check_no_conflict(&guard, &updated.span(), Some(id))?;
                guard.admit(&updated).map_err(EngineError::Conflict)?;

                let event = Event::ReservationUpdated {
                    previous_scope: old_scope,
                    reservation: updated.clone(),
                };
                self.wal_append(&event).await?;
                guard.remove(id);
                guard.insert(updated.clone());
            } else {
                let (first, second) = if old_scope < new_scope {
                    (old_scope, new_scope)
                } else {
                    (new_scope, old_scope)
                };
                let first_state = self.scope_state(first);
                let second_state = self.scope_state(second);
                let mut first_guard = first_state.write().await;
                let mut second_guard = second_state.write().await;
                let (old_guard, new_guard) = if first == old_scope {
                    (&mut first_guard, &mut second_guard)
                } else {
                    (&mut second_guard, &mut first_guard)
                };

                if old_guard.get(&id) != Some(&snapshot) {
                    continue;
                }
                if new_guard.reservations.len() >= MAX_RESERVATIONS_PER_SCOPE {
                    return Err(EngineError::LimitExceeded("too many reservations for this day"));
                }
                check_no_conflict(&*new_guard, &updated.span(), Some(id))?;
                new_guard.admit(&updated).map_err(EngineError::Conflict)?;

                let event = Event::ReservationUpdated {
                    previous_scope: old_scope,
                    reservation: updated.clone(),
                };
                self.wal_append(&event).await?;
                old_guard.remove(id);
                new_guard.insert(updated.clone());
                self.reservation_scope.insert(id, new_scope);
            }

            metrics::counter!(crate::observability::RESERVATIONS_UPDATED_TOTAL).increment(1);
            tracing::info!("updated reservation {id} → {new_scope} {}-{}", updated.start_time, updated.end_time);
            return Ok(updated);
        }

        tracing::warn!("giving up on update of {id} after {MAX_UPDATE_ATTEMPTS} contended attempts");
        Err(EngineError::LimitExceeded("reservation is being modified concurrently"))
    }

    /// Delete a reservation for good.
    pub async fn cancel_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let _barrier = self.write_barrier.read().await;
        let (scope, mut guard) = self.resolve_reservation_write(&id).await?;
        let event = Event::ReservationCancelled { id, scope };
        self.wal_append(&event).await?;
        let removed = guard.remove(id).ok_or(EngineError::NotFound(id))?;
        self.reservation_scope.remove(&id);

        metrics::counter!(crate::observability::RESERVATIONS_CANCELLED_TOTAL).increment(1);
        tracing::info!("cancelled reservation {id} in {scope}");
        Ok(removed)
    }

    // ── Generic records ──────────────────────────────────────

    fn ensure_generic(kind: ResourceKind) -> Result<(), EngineError> {
        if kind.is_generic() {
            Ok(())
        } else {
            Err(EngineError::validation(format!("{kind} are not generic records")))
        }
    }

    /// A child record must point at an existing parent.
    fn check_parent(&self, kind: ResourceKind, body: &Map<String, Value>) -> Result<(), EngineError> {
        let Some(link) = kind.parent() else {
            return Ok(());
        };
        let parent_id = body
            .get(link.field)
            .and_then(Value::as_str)
            .and_then(|s| Ulid::from_string(s).ok())
            .ok_or_else(|| EngineError::validation(format!("{} must be a {} id", link.field, link.kind)))?;
        if !self.records.contains(link.kind, &parent_id) {
            return Err(EngineError::validation(format!(
                "{} {parent_id} does not exist",
                link.kind
            )));
        }
        Ok(())
    }

    async fn persist_record(&self, kind: ResourceKind, id: Ulid, body: Map<String, Value>) -> Result<Record, EngineError> {
        let text = serde_json::to_string(&body)
            .map_err(|e| EngineError::validation(format!("unencodable record: {e}")))?;
        let event = Event::RecordPut { kind, id, body: text };
        self.wal_append(&event).await?;
        self.records.put(kind, id, body.clone());
        metrics::counter!(crate::observability::RECORD_WRITES_TOTAL, "kind" => kind.path()).increment(1);
        Ok(Record { id, kind, body })
    }

    pub async fn create_record(&self, kind: ResourceKind, body: Value) -> Result<Record, EngineError> {
        Self::ensure_generic(kind)?;
        let body = validate_record_body(body)?;

        let _barrier = self.write_barrier.read().await;
        let _writes = self.record_writes.lock().await;
        if self.records.count(kind) >= MAX_RECORDS_PER_KIND {
            return Err(EngineError::LimitExceeded("too many records of this kind"));
        }
        self.check_parent(kind, &body)?;

        let record = self.persist_record(kind, Ulid::new(), body).await?;
        tracing::debug!("created {kind}/{}", record.id);
        Ok(record)
    }

    /// Replace a record's body wholesale.
    pub async fn update_record(&self, kind: ResourceKind, id: Ulid, body: Value) -> Result<Record, EngineError> {
        Self::ensure_generic(kind)?;
        let body = validate_record_body(body)?;

        let _barrier = self.write_barrier.read().await;
        let _writes = self.record_writes.lock().await;
        if !self.records.contains(kind, &id) {
            return Err(EngineError::NotFound(id));
        }
        self.check_parent(kind, &body)?;

        let record = self.persist_record(kind, id, body).await?;
        tracing::debug!("updated {kind}/{id}");
        Ok(record)
    }

    /// Delete a record and every record that hangs off it. Returns the removed
    /// records, children first; the requested record comes last.
    pub async fn delete_record(&self, kind: ResourceKind, id: Ulid) -> Result<Vec<Record>, EngineError> {
        Self::ensure_generic(kind)?;

        let _barrier = self.write_barrier.read().await;
        let _writes = self.record_writes.lock().await;
        if !self.records.contains(kind, &id) {
            return Err(EngineError::NotFound(id));
        }

        let mut doomed = self.records.descendants(kind, &id);
        doomed.push((kind, id));
        let mut removed = Vec::with_capacity(doomed.len());
        for (k, rid) in doomed {
            let event = Event::RecordDeleted { kind: k, id: rid };
            self.wal_append(&event).await?;
            removed.extend(self.records.remove(k, &rid));
        }

        metrics::counter!(crate::observability::RECORD_WRITES_TOTAL, "kind" => kind.path()).increment(1);
        if removed.len() > 1 {
            tracing::info!("deleted {kind}/{id} and {} dependent records", removed.len() - 1);
        }
        Ok(removed)
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Rewrite the WAL with only the events needed to recreate current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _barrier = self.write_barrier.write().await;

        let mut events = Vec::new();
        let mut scopes: Vec<_> = self.scopes.iter().map(|e| (*e.key(), e.value().clone())).collect();
        scopes.sort_by_key(|(scope, _)| *scope);
        for (_, state) in scopes {
            let guard = state.read().await;
            events.extend(guard.reservations.iter().map(|r| Event::ReservationCreated {
                reservation: r.clone(),
            }));
        }
        // Table order puts parents before children.
        for spec in RESOURCES.iter().filter(|s| s.kind.is_generic()) {
            for record in self.records.list(spec.kind) {
                let body = serde_json::to_string(&record.body)
                    .map_err(|e| EngineError::WalError(e.to_string()))?;
                events.push(Event::RecordPut {
                    kind: record.kind,
                    id: record.id,
                    body,
                });
            }
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        tracing::info!("compacted WAL to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
