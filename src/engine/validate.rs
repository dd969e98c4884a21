use chrono::NaiveDate;
use serde_json::{Map, Value};

use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// A draft that passed validation. Title and location stay optional here;
/// defaults are applied by the mutation that stores it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub category: Category,
    pub date: NaiveDate,
    pub start_time: TimeOfDay,
    pub end_time: TimeOfDay,
    pub title: Option<String>,
    pub location: Option<String>,
    pub booker_name: String,
    pub apartment: String,
}

impl Candidate {
    pub fn scope(&self) -> Scope {
        Scope {
            category: self.category,
            date: self.date,
        }
    }

    pub fn span(&self) -> Span {
        Span::new(self.start_time.minutes(), self.end_time.minutes())
    }
}

pub fn parse_category(raw: &str) -> Result<Category, EngineError> {
    raw.parse().map_err(EngineError::Validation)
}

pub fn parse_date(raw: &str) -> Result<NaiveDate, EngineError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| EngineError::validation(format!("invalid date: {raw:?}")))
}

pub fn parse_time(field: &str, raw: &str) -> Result<TimeOfDay, EngineError> {
    raw.parse()
        .map_err(|_| EngineError::validation(format!("invalid {field}: {raw:?}")))
}

/// Parse a candidate interval, rejecting empty and reversed ranges. Bookings
/// never cross midnight, so `23:00`-`01:00` is reversed, not overnight; a
/// booking may end at `24:00`.
pub fn parse_interval(start: &str, end: &str) -> Result<(TimeOfDay, TimeOfDay), EngineError> {
    let start_time = parse_time("start_time", start)?;
    let end_time = parse_time("end_time", end)?;
    if start_time == TimeOfDay::END_OF_DAY {
        return Err(EngineError::validation("start_time cannot be 24:00"));
    }
    if end_time <= start_time {
        return Err(EngineError::validation(format!(
            "end_time {end_time} must be after start_time {start_time}"
        )));
    }
    Ok((start_time, end_time))
}

fn required_text(field: &str, raw: &str) -> Result<String, EngineError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EngineError::validation(format!("{field} is required")));
    }
    if trimmed.chars().count() > MAX_TEXT_LEN {
        return Err(EngineError::LimitExceeded("text field too long"));
    }
    Ok(trimmed.to_string())
}

/// Blank optional text counts as omitted.
fn optional_text(raw: Option<&str>) -> Result<Option<String>, EngineError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) if s.chars().count() > MAX_TEXT_LEN => {
            Err(EngineError::LimitExceeded("text field too long"))
        }
        Some(s) => Ok(Some(s.to_string())),
    }
}

pub fn validate_draft(draft: &ReservationDraft) -> Result<Candidate, EngineError> {
    let category = parse_category(&draft.category)?;
    let date = parse_date(&draft.date)?;
    let (start_time, end_time) = parse_interval(&draft.start_time, &draft.end_time)?;
    let booker_name = required_text("booker_name", &draft.booker_name)?;
    let apartment = required_text("apartment", &draft.apartment)?;
    Ok(Candidate {
        category,
        date,
        start_time,
        end_time,
        title: optional_text(draft.title.as_deref())?,
        location: optional_text(draft.location.as_deref())?,
        booker_name,
        apartment,
    })
}

/// Generic records must be JSON objects within the size limit.
pub fn validate_record_body(body: Value) -> Result<Map<String, Value>, EngineError> {
    let Value::Object(mut map) = body else {
        return Err(EngineError::validation("record body must be a JSON object"));
    };
    map.remove("id");
    let encoded_len = serde_json::to_vec(&map).map(|v| v.len()).unwrap_or(usize::MAX);
    if encoded_len > MAX_RECORD_BYTES {
        return Err(EngineError::LimitExceeded("record body too large"));
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn draft() -> ReservationDraft {
        ReservationDraft {
            category: "sauna".into(),
            date: "2026-03-15".into(),
            start_time: "18:00".into(),
            end_time: "20:00".into(),
            title: None,
            location: None,
            booker_name: "Aino Virtanen".into(),
            apartment: "A 4".into(),
        }
    }

    #[test]
    fn valid_draft_passes() {
        let c = validate_draft(&draft()).unwrap();
        assert_eq!(c.category, Category::Sauna);
        assert_eq!(c.start_time.to_string(), "18:00");
        assert_eq!(c.span().duration_minutes(), 120);
        assert_eq!(c.title, None);
    }

    #[test]
    fn unknown_category_is_rejected() {
        let d = ReservationDraft { category: "pool".into(), ..draft() };
        assert!(matches!(validate_draft(&d), Err(EngineError::Validation(_))));
    }

    #[test]
    fn impossible_dates_are_rejected() {
        for bad in ["2026-02-30", "15.03.2026", "", "2026-13-01"] {
            let d = ReservationDraft { date: bad.into(), ..draft() };
            assert!(matches!(validate_draft(&d), Err(EngineError::Validation(_))), "{bad}");
        }
    }

    #[test]
    fn reversed_empty_and_cross_midnight_intervals_are_rejected() {
        for (start, end) in [("20:00", "18:00"), ("18:00", "18:00"), ("23:00", "01:00")] {
            let d = ReservationDraft {
                start_time: start.into(),
                end_time: end.into(),
                ..draft()
            };
            assert!(matches!(validate_draft(&d), Err(EngineError::Validation(_))), "{start}-{end}");
        }
    }

    #[test]
    fn booking_may_end_at_midnight() {
        let d = ReservationDraft {
            start_time: "22:00".into(),
            end_time: "24:00".into(),
            ..draft()
        };
        let c = validate_draft(&d).unwrap();
        assert_eq!(c.end_time, TimeOfDay::END_OF_DAY);
        assert_eq!(c.span().duration_minutes(), 120);

        for (start, end) in [("24:00", "24:00"), ("24:00", "01:00"), ("23:00", "24:30")] {
            let d = ReservationDraft {
                start_time: start.into(),
                end_time: end.into(),
                ..draft()
            };
            assert!(matches!(validate_draft(&d), Err(EngineError::Validation(_))), "{start}-{end}");
        }
    }

    #[test]
    fn malformed_times_are_rejected() {
        let d = ReservationDraft { start_time: "6pm".into(), ..draft() };
        assert!(matches!(validate_draft(&d), Err(EngineError::Validation(_))));
    }

    #[test]
    fn whitespace_only_identity_is_rejected() {
        let d = ReservationDraft { booker_name: "   ".into(), ..draft() };
        assert!(matches!(validate_draft(&d), Err(EngineError::Validation(_))));
        let d = ReservationDraft { apartment: "\t".into(), ..draft() };
        assert!(matches!(validate_draft(&d), Err(EngineError::Validation(_))));
    }

    #[test]
    fn identity_is_trimmed_and_blank_title_is_omitted() {
        let d = ReservationDraft {
            booker_name: "  Aino  ".into(),
            title: Some("  ".into()),
            location: Some(" Alakerta ".into()),
            ..draft()
        };
        let c = validate_draft(&d).unwrap();
        assert_eq!(c.booker_name, "Aino");
        assert_eq!(c.title, None);
        assert_eq!(c.location.as_deref(), Some("Alakerta"));
    }

    #[test]
    fn overlong_text_hits_limit() {
        let d = ReservationDraft { booker_name: "x".repeat(MAX_TEXT_LEN + 1), ..draft() };
        assert!(matches!(validate_draft(&d), Err(EngineError::LimitExceeded(_))));
    }

    #[test]
    fn record_body_must_be_object_and_drops_client_id() {
        assert!(validate_record_body(json!([1, 2])).is_err());
        assert!(validate_record_body(json!("text")).is_err());
        let map = validate_record_body(json!({"id": "forged", "title": "Kevättalkoot"})).unwrap();
        assert!(!map.contains_key("id"));
        assert_eq!(map["title"], "Kevättalkoot");
    }

    #[test]
    fn record_body_size_is_limited() {
        let big = json!({ "text": "x".repeat(MAX_RECORD_BYTES) });
        assert!(matches!(validate_record_body(big), Err(EngineError::LimitExceeded(_))));
    }
}
