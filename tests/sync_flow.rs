use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use ulid::Ulid;

use taloyhtio::api;
use taloyhtio::client::{
    CacheConfig, ConflictRequest, LocalTransport, QueryCache, QueryKey, RequestError,
};
use taloyhtio::engine::Engine;
use taloyhtio::model::{Reservation, ReservationDraft, ReservationPatch};
use taloyhtio::resource::ResourceKind;

// ── Test infrastructure ──────────────────────────────────────

fn start_portal() -> (QueryCache, Arc<Engine>) {
    let dir = std::env::temp_dir().join(format!("taloyhtio_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let engine = Arc::new(Engine::new(dir.join("portal.wal")).unwrap());
    let transport = LocalTransport::new(api::router(engine.clone()));
    let cache = QueryCache::new(Arc::new(transport), CacheConfig::default());
    (cache, engine)
}

fn draft(category: &str, start: &str, end: &str) -> ReservationDraft {
    ReservationDraft {
        category: category.into(),
        date: "2026-05-02".into(),
        start_time: start.into(),
        end_time: end.into(),
        booker_name: "Mikko Korhonen".into(),
        apartment: "B 12".into(),
        ..Default::default()
    }
}

fn ids(state: &Value) -> Vec<String> {
    state
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_str().unwrap().to_string())
        .collect()
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn booking_refreshes_the_mounted_calendar() {
    let (cache, _engine) = start_portal();
    let reservations = cache.reservations();

    let key = QueryKey::list(ResourceKind::Reservation);
    let (_view, initial) = cache.mount(&key).await;
    assert_eq!(initial.data, Some(json!([])));

    let created = reservations.create(&draft("sauna", "18:00", "19:00")).await.unwrap();
    assert_eq!(created.title, "Saunavuoro");

    // The write awaited the re-fetch of the mounted list.
    let state = cache.peek(&key).unwrap();
    assert!(state.is_fresh());
    assert_eq!(ids(state.data.as_ref().unwrap()), vec![created.id.to_string()]);

    let listed: Vec<Reservation> = state.decode().unwrap().unwrap();
    assert_eq!(listed, vec![created]);
}

#[tokio::test]
async fn conflicting_booking_surfaces_the_existing_id() {
    let (cache, _engine) = start_portal();
    let reservations = cache.reservations();

    let first = reservations.create(&draft("laundry", "08:00", "10:00")).await.unwrap();
    let err = reservations.create(&draft("laundry", "09:00", "11:00")).await.unwrap_err();
    match err {
        RequestError::Conflict { conflicting_id, .. } => {
            assert_eq!(conflicting_id, Some(first.id.to_string()));
        }
        other => panic!("expected conflict, got {other:?}"),
    }

    let adjacent = reservations.create(&draft("laundry", "10:00", "11:00")).await;
    assert!(adjacent.is_ok());

    let err = reservations.create(&draft("laundry", "22:00", "02:00")).await.unwrap_err();
    assert!(matches!(err, RequestError::Validation(_)), "{err:?}");
}

#[tokio::test]
async fn check_conflict_answers_without_writing() {
    let (cache, engine) = start_portal();
    let reservations = cache.reservations();
    let booked = reservations.create(&draft("clubroom", "12:00", "15:00")).await.unwrap();

    let mut request = ConflictRequest {
        category: "clubroom".into(),
        date: "2026-05-02".into(),
        start_time: "14:00".into(),
        end_time: "16:00".into(),
        exclude_id: None,
    };
    assert!(reservations.check_conflict(&request).await.unwrap());

    request.exclude_id = Some(booked.id.to_string());
    assert!(!reservations.check_conflict(&request).await.unwrap());

    request.exclude_id = None;
    request.start_time = "15:00".into();
    assert!(!reservations.check_conflict(&request).await.unwrap());

    assert_eq!(engine.list_reservations(Default::default()).await.len(), 1);
}

#[tokio::test]
async fn moving_a_booking_refreshes_both_days() {
    let (cache, _engine) = start_portal();
    let reservations = cache.reservations();
    let booked = reservations.create(&draft("sauna", "17:00", "18:00")).await.unwrap();

    let (mut may_second, _) = cache
        .mount(&QueryKey::list_filtered(
            ResourceKind::Reservation,
            [("date".to_string(), "2026-05-02".to_string())].into(),
        ))
        .await;

    let patch = ReservationPatch {
        date: Some("2026-05-03".into()),
        ..Default::default()
    };
    let moved = reservations.update(&booked.id.to_string(), &patch).await.unwrap();
    assert_eq!(moved.id, booked.id);
    assert_eq!(moved.date.to_string(), "2026-05-03");

    let state = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let state = may_second.state();
            if state.is_fresh() && state.data == Some(json!([])) {
                return state;
            }
            may_second.changed().await.unwrap();
        }
    })
    .await
    .unwrap();
    assert!(state.error.is_none());

    let next_day = reservations.list(None, Some("2026-05-03")).await;
    assert_eq!(ids(next_day.data.as_ref().unwrap()), vec![booked.id.to_string()]);
}

#[tokio::test]
async fn cancelled_booking_detail_reports_not_found() {
    let (cache, _engine) = start_portal();
    let reservations = cache.reservations();
    let booked = reservations.create(&draft("work_day", "10:00", "14:00")).await.unwrap();
    let id = booked.id.to_string();

    let detail = reservations.detail(&id).await;
    assert_eq!(detail.data.as_ref().unwrap()["title"], "Talkoot");

    reservations.cancel(&id).await.unwrap();
    let err = reservations.cancel(&id).await.unwrap_err();
    assert!(matches!(err, RequestError::NotFound(_)), "{err:?}");

    let detail = reservations.detail(&id).await;
    assert!(matches!(detail.error, Some(RequestError::NotFound(_))), "{detail:?}");
}

#[tokio::test]
async fn deleting_an_unviewed_document_refreshes_its_meeting() {
    let (cache, _engine) = start_portal();
    let meetings = cache.resource(ResourceKind::Meeting);
    let documents = cache.resource(ResourceKind::MeetingDocument);

    let meeting = meetings.create(json!({"title": "Hallituksen kokous"})).await.unwrap();
    let meeting_id = meeting["id"].as_str().unwrap().to_string();
    let doc = documents
        .create(json!({"meeting_id": meeting_id, "name": "Liite 1"}))
        .await
        .unwrap();
    let doc_id = doc["id"].as_str().unwrap().to_string();

    let meeting_key = QueryKey::detail(ResourceKind::Meeting, &meeting_id);
    assert!(meetings.detail(&meeting_id).await.is_fresh());
    let (_view, _) = cache.mount(&QueryKey::list(ResourceKind::Meeting)).await;

    // The document's own detail was never loaded.
    assert!(cache.peek(&QueryKey::detail(ResourceKind::MeetingDocument, &doc_id)).is_none());
    documents.delete(&doc_id).await.unwrap();

    assert!(!cache.peek(&meeting_key).unwrap().is_fresh());
    assert!(cache.peek(&QueryKey::list(ResourceKind::Meeting)).unwrap().is_fresh());
}

#[tokio::test]
async fn deleting_a_meeting_refreshes_its_document_list() {
    let (cache, _engine) = start_portal();
    let meetings = cache.resource(ResourceKind::Meeting);
    let documents = cache.resource(ResourceKind::MeetingDocument);

    let meeting = meetings.create(json!({"title": "Kevätkokous"})).await.unwrap();
    let meeting_id = meeting["id"].as_str().unwrap().to_string();
    documents
        .create(json!({"meeting_id": meeting_id, "name": "Esityslista"}))
        .await
        .unwrap();

    let key = QueryKey::list(ResourceKind::MeetingDocument);
    let (_view, state) = cache.mount(&key).await;
    assert_eq!(state.data.as_ref().unwrap().as_array().unwrap().len(), 1);

    meetings.delete(&meeting_id).await.unwrap();
    let state = cache.peek(&key).unwrap();
    assert!(state.is_fresh());
    assert_eq!(state.data, Some(json!([])));
}
