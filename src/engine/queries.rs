use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;
use ulid::Ulid;

use crate::model::*;
use crate::resource::ResourceKind;

use super::conflict::{self, ConflictCheck};
use super::store::fields_match;
use super::{Engine, EngineError, Record};

/// Narrowing for reservation listings. Both fields are optional.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct ReservationFilter {
    pub category: Option<Category>,
    pub date: Option<NaiveDate>,
}

impl ReservationFilter {
    fn matches(&self, scope: &Scope) -> bool {
        self.category.is_none_or(|c| c == scope.category) && self.date.is_none_or(|d| d == scope.date)
    }
}

impl Engine {
    pub async fn get_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        // Same-scope retry as resolve_reservation_write, but shared.
        loop {
            let scope = self.scope_of(&id).ok_or(EngineError::NotFound(id))?;
            let state = self.scope_state(scope);
            let guard = state.read().await;
            if let Some(r) = guard.get(&id) {
                return Ok(r.clone());
            }
            if self.scope_of(&id) == Some(scope) {
                return Err(EngineError::NotFound(id));
            }
        }
    }

    /// Reservations matching `filter`, sorted by date, start time, category.
    pub async fn list_reservations(&self, filter: ReservationFilter) -> Vec<Reservation> {
        let states: Vec<_> = self
            .scopes
            .iter()
            .filter(|e| filter.matches(e.key()))
            .map(|e| e.value().clone())
            .collect();

        let mut out = Vec::new();
        for state in states {
            let guard = state.read().await;
            out.extend(guard.reservations.iter().cloned());
        }
        out.sort_by(|a, b| {
            (a.date, a.start_time, a.category, a.id).cmp(&(b.date, b.start_time, b.category, b.id))
        });
        out
    }

    /// [`list_reservations`](Self::list_reservations) narrowed further by
    /// equality on any other field of the served JSON, as record listings are.
    pub async fn list_reservations_where(
        &self,
        filter: ReservationFilter,
        fields: &BTreeMap<String, String>,
    ) -> Vec<Reservation> {
        let mut out = self.list_reservations(filter).await;
        if !fields.is_empty() {
            out.retain(|r| match serde_json::to_value(r) {
                Ok(Value::Object(body)) => fields_match(&body, fields),
                _ => false,
            });
        }
        out
    }

    /// Every reservation in the scope overlapping `span`, minus `exclude_id`.
    pub async fn find_conflicting(
        &self,
        category: Category,
        date: NaiveDate,
        span: Span,
        exclude_id: Option<Ulid>,
    ) -> Vec<Reservation> {
        let Some(state) = self.get_scope(&Scope { category, date }) else {
            return Vec::new();
        };
        let guard = state.read().await;
        conflict::find_conflicting(&guard, span, exclude_id).cloned().collect()
    }

    /// Advisory check against current state. The authoritative check runs
    /// again inside create/update under the scope's write lock.
    pub async fn check_conflict(
        &self,
        category: Category,
        date: NaiveDate,
        span: Span,
        exclude_id: Option<Ulid>,
    ) -> ConflictCheck {
        match self.get_scope(&Scope { category, date }) {
            Some(state) => conflict::check_conflict(&*state.read().await, &span, exclude_id),
            None => ConflictCheck::CLEAR,
        }
    }

    pub fn get_record(&self, kind: ResourceKind, id: Ulid) -> Result<Record, EngineError> {
        self.records.get(kind, &id).ok_or(EngineError::NotFound(id))
    }

    /// Records of `kind` in creation order whose top-level fields equal every
    /// entry in `filter`.
    pub fn list_records(&self, kind: ResourceKind, filter: &BTreeMap<String, String>) -> Vec<Record> {
        let mut records = self.records.list(kind);
        records.retain(|r| r.matches(filter));
        records
    }

    pub fn record_count(&self, kind: ResourceKind) -> usize {
        self.records.count(kind)
    }
}
