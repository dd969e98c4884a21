use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveTime, Timelike};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use ulid::Ulid;

use crate::resource::ResourceKind;

/// Minutes since midnight. The only time-of-day unit.
pub type Minutes = u16;

const MINUTES_PER_DAY: Minutes = 24 * 60;

/// Wall-clock time at minute granularity, written `HH:MM` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay(Minutes);

impl TimeOfDay {
    /// `24:00`, the end of the day. Valid only as the end of an interval.
    pub const END_OF_DAY: TimeOfDay = TimeOfDay(MINUTES_PER_DAY);

    pub fn from_hm(hour: u32, minute: u32) -> Option<Self> {
        if hour >= 24 || minute >= 60 {
            return None;
        }
        Some(Self((hour * 60 + minute) as Minutes))
    }

    pub fn minutes(self) -> Minutes {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeParseError(pub String);

impl fmt::Display for TimeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid time of day: {:?}", self.0)
    }
}

impl std::error::Error for TimeParseError {}

impl FromStr for TimeOfDay {
    type Err = TimeParseError;

    /// Accepts `HH:MM`, and `HH:MM:SS` only when the seconds are zero.
    /// `24:00` parses to [`TimeOfDay::END_OF_DAY`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "24:00" || s == "24:00:00" {
            return Ok(Self::END_OF_DAY);
        }
        let time = NaiveTime::parse_from_str(s, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
            .map_err(|_| TimeParseError(s.to_string()))?;
        if time.second() != 0 {
            return Err(TimeParseError(s.to_string()));
        }
        Self::from_hm(time.hour(), time.minute()).ok_or_else(|| TimeParseError(s.to_string()))
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

impl Serialize for TimeOfDay {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeOfDay {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Half-open interval `[start, end)` within one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Minutes,
    pub end: Minutes,
}

impl Span {
    pub fn new(start: Minutes, end: Minutes) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        debug_assert!(end <= MINUTES_PER_DAY, "Span must not cross midnight");
        Self { start, end }
    }

    pub fn duration_minutes(&self) -> Minutes {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Shared facility a reservation claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Sauna,
    Laundry,
    Clubroom,
    WorkDay,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Sauna,
        Category::Laundry,
        Category::Clubroom,
        Category::WorkDay,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Sauna => "sauna",
            Category::Laundry => "laundry",
            Category::Clubroom => "clubroom",
            Category::WorkDay => "work_day",
        }
    }

    pub fn default_title(self) -> &'static str {
        match self {
            Category::Sauna => "Saunavuoro",
            Category::Laundry => "Pyykkivuoro",
            Category::Clubroom => "Kerhohuoneen varaus",
            Category::WorkDay => "Talkoot",
        }
    }

    pub fn default_location(self) -> &'static str {
        match self {
            Category::Sauna => "Saunaosasto",
            Category::Laundry => "Pesutupa",
            Category::Clubroom => "Kerhohuone",
            Category::WorkDay => "Piha-alue",
        }
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == s.trim())
            .ok_or_else(|| format!("unknown category: {s:?}"))
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Conflict scope: two reservations can only collide if they share both fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub category: Category,
    pub date: NaiveDate,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.category, self.date)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub category: Category,
    pub date: NaiveDate,
    pub start_time: TimeOfDay,
    pub end_time: TimeOfDay,
    pub title: String,
    pub location: String,
    pub booker_name: String,
    pub apartment: String,
}

impl Reservation {
    pub fn scope(&self) -> Scope {
        Scope {
            category: self.category,
            date: self.date,
        }
    }

    pub fn span(&self) -> Span {
        Span::new(self.start_time.minutes(), self.end_time.minutes())
    }

    pub fn to_draft(&self) -> ReservationDraft {
        ReservationDraft {
            category: self.category.as_str().to_string(),
            date: self.date.to_string(),
            start_time: self.start_time.to_string(),
            end_time: self.end_time.to_string(),
            title: Some(self.title.clone()),
            location: Some(self.location.clone()),
            booker_name: self.booker_name.clone(),
            apartment: self.apartment.clone(),
        }
    }
}

/// Unvalidated reservation as submitted by the reservation form.
///
/// Missing fields deserialize to empty strings so validation, not the JSON
/// decoder, reports them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReservationDraft {
    pub category: String,
    pub date: String,
    pub start_time: String,
    pub end_time: String,
    pub title: Option<String>,
    pub location: Option<String>,
    pub booker_name: String,
    pub apartment: String,
}

/// Partial update; absent fields keep their stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReservationPatch {
    pub category: Option<String>,
    pub date: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub title: Option<String>,
    pub location: Option<String>,
    pub booker_name: Option<String>,
    pub apartment: Option<String>,
}

impl ReservationPatch {
    pub fn apply_to(self, current: &Reservation) -> ReservationDraft {
        let base = current.to_draft();
        ReservationDraft {
            category: self.category.unwrap_or(base.category),
            date: self.date.unwrap_or(base.date),
            start_time: self.start_time.unwrap_or(base.start_time),
            end_time: self.end_time.unwrap_or(base.end_time),
            title: self.title.or(base.title),
            location: self.location.or(base.location),
            booker_name: self.booker_name.unwrap_or(base.booker_name),
            apartment: self.apartment.unwrap_or(base.apartment),
        }
    }
}

/// All reservations of one scope, sorted by start time.
#[derive(Debug, Clone)]
pub struct ScopeState {
    pub scope: Scope,
    pub reservations: Vec<Reservation>,
}

impl ScopeState {
    pub fn new(scope: Scope) -> Self {
        Self {
            scope,
            reservations: Vec::new(),
        }
    }

    /// Insert maintaining sort order by start time.
    pub fn insert(&mut self, reservation: Reservation) {
        let start = reservation.start_time;
        let pos = self
            .reservations
            .binary_search_by_key(&start, |r| r.start_time)
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    pub fn get(&self, id: &Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == *id)
    }

    /// Reservations whose span overlaps the query window.
    pub fn overlapping(&self, query: Span) -> impl Iterator<Item = &Reservation> {
        // Everything at index >= right_bound starts at or after query.end.
        let right_bound = self
            .reservations
            .partition_point(|r| r.start_time.minutes() < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.end_time.minutes() > query.start)
    }

    /// Storage-level uniqueness constraint: refuse a reservation that would
    /// overlap another one in this scope. Returns the id it collides with.
    pub fn admit(&self, reservation: &Reservation) -> Result<(), Ulid> {
        match self
            .overlapping(reservation.span())
            .find(|r| r.id != reservation.id)
        {
            Some(existing) => Err(existing.id),
            None => Ok(()),
        }
    }
}

/// Flat event types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ReservationCreated {
        reservation: Reservation,
    },
    ReservationUpdated {
        previous_scope: Scope,
        reservation: Reservation,
    },
    ReservationCancelled {
        id: Ulid,
        scope: Scope,
    },
    /// Full replacement of a generic record; `body` is the JSON object text.
    RecordPut {
        kind: ResourceKind,
        id: Ulid,
        body: String,
    },
    RecordDeleted {
        kind: ResourceKind,
        id: Ulid,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn reservation(start: &str, end: &str) -> Reservation {
        Reservation {
            id: Ulid::new(),
            category: Category::Sauna,
            date: date("2026-03-15"),
            start_time: start.parse().unwrap(),
            end_time: end.parse().unwrap(),
            title: "Saunavuoro".into(),
            location: "Saunaosasto".into(),
            booker_name: "Aino".into(),
            apartment: "A 1".into(),
        }
    }

    #[test]
    fn time_of_day_parse_and_display() {
        let t: TimeOfDay = "18:05".parse().unwrap();
        assert_eq!(t.minutes(), 18 * 60 + 5);
        assert_eq!(t.to_string(), "18:05");
        assert_eq!("07:30:00".parse::<TimeOfDay>().unwrap().to_string(), "07:30");
    }

    #[test]
    fn midnight_end_parses_and_round_trips() {
        let end: TimeOfDay = "24:00".parse().unwrap();
        assert_eq!(end, TimeOfDay::END_OF_DAY);
        assert_eq!(end.minutes(), 24 * 60);
        assert_eq!(end.to_string(), "24:00");
        let json = serde_json::to_string(&end).unwrap();
        assert_eq!(serde_json::from_str::<TimeOfDay>(&json).unwrap(), end);
        assert!(TimeOfDay::from_hm(24, 0).is_none());
    }

    #[test]
    fn time_of_day_rejects_garbage() {
        assert!("24:01".parse::<TimeOfDay>().is_err());
        assert!("25:00".parse::<TimeOfDay>().is_err());
        assert!("12:60".parse::<TimeOfDay>().is_err());
        assert!("12:00:30".parse::<TimeOfDay>().is_err());
        assert!("noon".parse::<TimeOfDay>().is_err());
        assert!("".parse::<TimeOfDay>().is_err());
    }

    #[test]
    fn span_overlap_is_half_open() {
        let a = Span::new(18 * 60, 20 * 60);
        let b = Span::new(19 * 60, 21 * 60);
        let c = Span::new(20 * 60, 21 * 60);
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
        assert!(!c.overlaps(&a));
        assert_eq!(a.duration_minutes(), 120);
    }

    #[test]
    fn category_round_trips_through_str() {
        for c in Category::ALL {
            assert_eq!(c.as_str().parse::<Category>().unwrap(), c);
        }
        assert!("swimming_pool".parse::<Category>().is_err());
        assert_eq!(
            serde_json::to_value(Category::WorkDay).unwrap(),
            serde_json::json!("work_day")
        );
    }

    #[test]
    fn scope_state_keeps_start_order() {
        let mut state = ScopeState::new(Scope {
            category: Category::Sauna,
            date: date("2026-03-15"),
        });
        state.insert(reservation("20:00", "21:00"));
        state.insert(reservation("08:00", "09:00"));
        state.insert(reservation("12:00", "13:00"));
        let starts: Vec<String> = state
            .reservations
            .iter()
            .map(|r| r.start_time.to_string())
            .collect();
        assert_eq!(starts, ["08:00", "12:00", "20:00"]);
    }

    #[test]
    fn overlapping_skips_adjacent_and_distant() {
        let mut state = ScopeState::new(Scope {
            category: Category::Sauna,
            date: date("2026-03-15"),
        });
        state.insert(reservation("08:00", "10:00"));
        state.insert(reservation("10:00", "12:00"));
        state.insert(reservation("14:00", "15:00"));

        let hits: Vec<_> = state.overlapping(Span::new(12 * 60, 14 * 60)).collect();
        assert!(hits.is_empty());

        let hits: Vec<_> = state.overlapping(Span::new(9 * 60, 11 * 60)).collect();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn admit_enforces_uniqueness_but_not_against_itself() {
        let mut state = ScopeState::new(Scope {
            category: Category::Sauna,
            date: date("2026-03-15"),
        });
        let existing = reservation("18:00", "20:00");
        state.insert(existing.clone());

        assert_eq!(state.admit(&reservation("19:00", "21:00")), Err(existing.id));
        assert_eq!(state.admit(&reservation("20:00", "21:00")), Ok(()));
        assert_eq!(state.admit(&existing), Ok(()));
    }

    #[test]
    fn patch_overrides_only_given_fields() {
        let current = reservation("18:00", "20:00");
        let patch = ReservationPatch {
            end_time: Some("19:30".into()),
            ..Default::default()
        };
        let draft = patch.apply_to(&current);
        assert_eq!(draft.start_time, "18:00");
        assert_eq!(draft.end_time, "19:30");
        assert_eq!(draft.category, "sauna");
        assert_eq!(draft.booker_name, "Aino");
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::ReservationCreated {
            reservation: reservation("18:00", "20:00"),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
