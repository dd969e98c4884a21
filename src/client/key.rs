use std::collections::BTreeMap;
use std::fmt;

use crate::resource::ResourceKind;

use super::RequestError;

/// Equality filter on top-level fields, sent as a query string.
pub type Filter = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyVariant {
    All,
    List(Option<Filter>),
    Detail(String),
}

/// Structured cache key. Keys form a hierarchy per resource kind:
///
/// ```text
/// all(R)
/// ├── list(R)
/// │   └── list(R, filter)…
/// └── detail(R, id)…
/// ```
///
/// Invalidating a key invalidates everything below it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueryKey {
    pub kind: ResourceKind,
    pub variant: KeyVariant,
}

impl QueryKey {
    pub fn all(kind: ResourceKind) -> Self {
        Self {
            kind,
            variant: KeyVariant::All,
        }
    }

    pub fn list(kind: ResourceKind) -> Self {
        Self {
            kind,
            variant: KeyVariant::List(None),
        }
    }

    /// An empty filter is the unfiltered list.
    pub fn list_filtered(kind: ResourceKind, filter: Filter) -> Self {
        let filter = (!filter.is_empty()).then_some(filter);
        Self {
            kind,
            variant: KeyVariant::List(filter),
        }
    }

    pub fn detail(kind: ResourceKind, id: impl fmt::Display) -> Self {
        Self {
            kind,
            variant: KeyVariant::Detail(id.to_string()),
        }
    }

    /// Whether invalidating `self` invalidates `other`.
    pub fn covers(&self, other: &QueryKey) -> bool {
        if self.kind != other.kind {
            return false;
        }
        match (&self.variant, &other.variant) {
            (KeyVariant::All, _) => true,
            (KeyVariant::List(None), KeyVariant::List(_)) => true,
            (a, b) => a == b,
        }
    }

    /// Server path that fetches this key's data. `all(R)` fetches the whole
    /// collection, like `list(R)`.
    pub fn fetch_path(&self) -> Result<String, RequestError> {
        let base = format!("/api/{}", self.kind.path());
        match &self.variant {
            KeyVariant::All | KeyVariant::List(None) => Ok(base),
            KeyVariant::List(Some(filter)) => {
                let query = serde_urlencoded::to_string(filter)
                    .map_err(|e| RequestError::Decode(format!("cannot encode filter: {e}")))?;
                Ok(format!("{base}?{query}"))
            }
            KeyVariant::Detail(id) => Ok(format!("{base}/{id}")),
        }
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.variant {
            KeyVariant::All => write!(f, "{}:all", self.kind),
            KeyVariant::List(None) => write!(f, "{}:list", self.kind),
            KeyVariant::List(Some(filter)) => write!(f, "{}:list{filter:?}", self.kind),
            KeyVariant::Detail(id) => write!(f, "{}:detail:{id}", self.kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(pairs: &[(&str, &str)]) -> Filter {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn all_covers_every_key_of_its_kind() {
        let all = QueryKey::all(ResourceKind::Announcement);
        assert!(all.covers(&QueryKey::list(ResourceKind::Announcement)));
        assert!(all.covers(&QueryKey::list_filtered(
            ResourceKind::Announcement,
            filter(&[("pinned", "true")])
        )));
        assert!(all.covers(&QueryKey::detail(ResourceKind::Announcement, "01J")));
        assert!(!all.covers(&QueryKey::list(ResourceKind::Event)));
    }

    #[test]
    fn list_covers_filtered_lists_but_not_details() {
        let list = QueryKey::list(ResourceKind::Reservation);
        let sauna = QueryKey::list_filtered(ResourceKind::Reservation, filter(&[("category", "sauna")]));
        assert!(list.covers(&sauna));
        assert!(!sauna.covers(&list));
        assert!(!list.covers(&QueryKey::detail(ResourceKind::Reservation, "x")));
        assert!(!list.covers(&QueryKey::all(ResourceKind::Reservation)));
    }

    #[test]
    fn detail_covers_only_itself() {
        let a = QueryKey::detail(ResourceKind::Meeting, "a");
        assert!(a.covers(&a.clone()));
        assert!(!a.covers(&QueryKey::detail(ResourceKind::Meeting, "b")));
    }

    #[test]
    fn empty_filter_is_plain_list() {
        assert_eq!(
            QueryKey::list_filtered(ResourceKind::User, Filter::new()),
            QueryKey::list(ResourceKind::User)
        );
    }

    #[test]
    fn fetch_paths() {
        assert_eq!(
            QueryKey::all(ResourceKind::BoardMember).fetch_path().unwrap(),
            "/api/board-members"
        );
        assert_eq!(
            QueryKey::list_filtered(
                ResourceKind::Reservation,
                filter(&[("date", "2026-03-15"), ("category", "sauna")])
            )
            .fetch_path()
            .unwrap(),
            "/api/reservations?category=sauna&date=2026-03-15"
        );
        assert_eq!(
            QueryKey::detail(ResourceKind::MeetingDocument, "01ABC").fetch_path().unwrap(),
            "/api/meeting-documents/01ABC"
        );
    }
}
