use serde::Serialize;
use ulid::Ulid;

use crate::model::*;

use super::EngineError;

/// Outcome of a conflict check. `conflicting_id` names the first overlapping
/// reservation in start order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConflictCheck {
    pub conflict: bool,
    pub conflicting_id: Option<Ulid>,
}

impl ConflictCheck {
    pub const CLEAR: ConflictCheck = ConflictCheck {
        conflict: false,
        conflicting_id: None,
    };
}

/// Reservations in `state` that overlap `span`, skipping `exclude_id`.
pub fn find_conflicting<'a>(
    state: &'a ScopeState,
    span: Span,
    exclude_id: Option<Ulid>,
) -> impl Iterator<Item = &'a Reservation> {
    state
        .overlapping(span)
        .filter(move |r| Some(r.id) != exclude_id)
        .filter(move |r| r.span().overlaps(&span))
}

/// Pure decision over one scope snapshot. Callers hold the scope lock so the
/// answer stays true until their write lands.
pub fn check_conflict(state: &ScopeState, span: &Span, exclude_id: Option<Ulid>) -> ConflictCheck {
    match find_conflicting(state, *span, exclude_id).next() {
        Some(existing) => ConflictCheck {
            conflict: true,
            conflicting_id: Some(existing.id),
        },
        None => ConflictCheck::CLEAR,
    }
}

pub(crate) fn check_no_conflict(
    state: &ScopeState,
    span: &Span,
    exclude_id: Option<Ulid>,
) -> Result<(), EngineError> {
    match check_conflict(state, span, exclude_id).conflicting_id {
        Some(id) => {
            metrics::counter!(crate::observability::RESERVATION_CONFLICTS_TOTAL,
                "category" => state.scope.category.as_str())
            .increment(1);
            Err(EngineError::Conflict(id))
        }
        None => Ok(()),
    }
}
