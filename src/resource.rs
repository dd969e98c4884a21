//! The resource table.
//!
//! Every resource kind the portal exposes is one row here: its REST path and,
//! for kinds that hang off another record, the field naming the parent. Server
//! routing, cascading deletes and the client's key families are all derived
//! from this table, so every kind follows the same invalidation policy.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Announcement,
    Reservation,
    Event,
    Document,
    BoardMember,
    Apartment,
    Contact,
    MarketplaceItem,
    User,
    Meeting,
    MeetingDocument,
}

/// Link from a child record to the record it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParentLink {
    pub kind: ResourceKind,
    /// Top-level JSON field holding the parent's id.
    pub field: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceSpec {
    pub kind: ResourceKind,
    pub path: &'static str,
    pub parent: Option<ParentLink>,
}

/// Parents come before their children, which the WAL compactor relies on.
pub static RESOURCES: [ResourceSpec; 11] = [
    ResourceSpec { kind: ResourceKind::Announcement, path: "announcements", parent: None },
    ResourceSpec { kind: ResourceKind::Reservation, path: "reservations", parent: None },
    ResourceSpec { kind: ResourceKind::Event, path: "events", parent: None },
    ResourceSpec { kind: ResourceKind::Document, path: "documents", parent: None },
    ResourceSpec { kind: ResourceKind::BoardMember, path: "board-members", parent: None },
    ResourceSpec { kind: ResourceKind::Apartment, path: "apartments", parent: None },
    ResourceSpec { kind: ResourceKind::Contact, path: "contacts", parent: None },
    ResourceSpec { kind: ResourceKind::MarketplaceItem, path: "marketplace", parent: None },
    ResourceSpec { kind: ResourceKind::User, path: "users", parent: None },
    ResourceSpec { kind: ResourceKind::Meeting, path: "meetings", parent: None },
    ResourceSpec {
        kind: ResourceKind::MeetingDocument,
        path: "meeting-documents",
        parent: Some(ParentLink { kind: ResourceKind::Meeting, field: "meeting_id" }),
    },
];

impl ResourceKind {
    pub fn spec(self) -> &'static ResourceSpec {
        RESOURCES
            .iter()
            .find(|s| s.kind == self)
            .unwrap_or_else(|| unreachable!("every ResourceKind has a table row"))
    }

    pub fn path(self) -> &'static str {
        self.spec().path
    }

    pub fn parent(self) -> Option<ParentLink> {
        self.spec().parent
    }

    pub fn from_path(path: &str) -> Option<ResourceKind> {
        RESOURCES.iter().find(|s| s.path == path).map(|s| s.kind)
    }

    /// Kinds whose records name a record of `self` as parent.
    pub fn children(self) -> impl Iterator<Item = ResourceSpec> {
        RESOURCES
            .into_iter()
            .filter(move |s| s.parent.is_some_and(|p| p.kind == self))
    }

    /// Generic records live in the record store; reservations have their own engine path.
    pub fn is_generic(self) -> bool {
        self != ResourceKind::Reservation
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}
