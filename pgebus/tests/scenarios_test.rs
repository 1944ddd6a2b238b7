mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pgebus::{publish_event, Event, EventRouter, EventSource, EventStatus, EventSystem};
use sqlx::{Postgres, Transaction};

use common::{wait_for, TestDb};

async fn fetch_status(pool: &sqlx::PgPool, schema: &str, id: i64) -> Option<EventStatus> {
    let row: Option<(String,)> = sqlx::query_as(&format!(
        "SELECT status FROM {schema}.event WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
    .unwrap();

    row.map(|(s,)| match s.as_str() {
        "pending" => EventStatus::Pending,
        "running" => EventStatus::Running,
        "done" => EventStatus::Done,
        "failed" => EventStatus::Failed,
        other => panic!("unexpected status {other}"),
    })
}

/// S1: a published event reaches a registered handler and is marked `Done`.
#[tokio::test]
async fn publish_then_consume_marks_done() {
    let db = TestDb::new().await;

    let seen = Arc::new(AtomicUsize::new(0));
    let seen_handler = seen.clone();

    let mut router = EventRouter::new();
    router.register("order.created", move |_tx: &mut Transaction<'_, Postgres>, _event: &Event| {
        let seen_handler = seen_handler.clone();
        Box::pin(async move {
            seen_handler.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    });

    let schema = db.settings.database.schema_name.clone();
    let mut system = EventSystem::new(router, db.settings.clone()).expect("event system builds");
    system.start().await.expect("system starts");

    let event = publish_event(
        &db.pool,
        &schema,
        "order.created",
        serde_json::json!({"order_id": 42}),
        EventSource::Internal,
        &db.settings.event_system.channel,
        None,
    )
    .await
    .expect("publish succeeds");

    let status = wait_for(Duration::from_secs(5), || {
        let pool = db.pool.clone();
        let schema = schema.clone();
        async move { fetch_status(&pool, &schema, event.id).await.filter(|s| matches!(s, EventStatus::Done)) }
    })
    .await;

    assert_eq!(status, Some(EventStatus::Done));
    assert_eq!(seen.load(Ordering::SeqCst), 1);

    system.stop().await.expect("system stops");
}

/// Back-fill: events published while no consumer is running are picked up by the
/// startup scan once a system starts (closes the race the listener can't see).
#[tokio::test]
async fn backlog_is_backfilled_on_startup() {
    let db = TestDb::new().await;
    let schema = db.settings.database.schema_name.clone();

    // Create the schema without starting a consumer, by starting and immediately
    // stopping a throwaway system (the only way to run the schema/table DDL).
    {
        let mut bootstrap = EventSystem::new(EventRouter::new(), db.settings.clone()).expect("event system builds");
        bootstrap.start().await.expect("bootstrap starts");
        bootstrap.stop().await.expect("bootstrap stops");
    }

    let event = publish_event(
        &db.pool,
        &schema,
        "backlog.item",
        serde_json::json!({}),
        EventSource::Internal,
        &db.settings.event_system.channel,
        None,
    )
    .await
    .expect("publish succeeds while no consumer is running");

    let seen = Arc::new(AtomicUsize::new(0));
    let seen_handler = seen.clone();
    let mut router = EventRouter::new();
    router.register("backlog.item", move |_tx: &mut Transaction<'_, Postgres>, _event: &Event| {
        let seen_handler = seen_handler.clone();
        Box::pin(async move {
            seen_handler.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    });

    let mut system = EventSystem::new(router, db.settings.clone()).expect("event system builds");
    system.start().await.expect("system starts");

    let status = wait_for(Duration::from_secs(5), || {
        let pool = db.pool.clone();
        let schema = schema.clone();
        async move { fetch_status(&pool, &schema, event.id).await.filter(|s| matches!(s, EventStatus::Done)) }
    })
    .await;

    assert_eq!(status, Some(EventStatus::Done));
    assert_eq!(seen.load(Ordering::SeqCst), 1);

    system.stop().await.expect("system stops");
}

/// S4: an event scheduled for the future is not claimed before its `run_at`.
#[tokio::test]
async fn scheduled_event_waits_for_run_at() {
    let db = TestDb::new().await;
    let schema = db.settings.database.schema_name.clone();

    let mut router = EventRouter::new();
    router.register("reminder.due", |_tx: &mut Transaction<'_, Postgres>, _event: &Event| {
        Box::pin(async move { Ok(()) })
    });

    let mut system = EventSystem::new(router, db.settings.clone()).expect("event system builds");
    system.start().await.expect("system starts");

    let run_at = sqlx::types::time::OffsetDateTime::now_utc() + time::Duration::seconds(2);
    let event = publish_event(
        &db.pool,
        &schema,
        "reminder.due",
        serde_json::json!({}),
        EventSource::Internal,
        &db.settings.event_system.channel,
        Some(run_at),
    )
    .await
    .expect("publish succeeds");

    // Immediately after publishing it must still be pending, not yet claimed.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let early_status = fetch_status(&db.pool, &schema, event.id).await;
    assert_eq!(early_status, Some(EventStatus::Pending));

    let status = wait_for(Duration::from_secs(5), || {
        let pool = db.pool.clone();
        let schema = schema.clone();
        async move { fetch_status(&pool, &schema, event.id).await.filter(|s| matches!(s, EventStatus::Done)) }
    })
    .await;

    assert_eq!(status, Some(EventStatus::Done));

    system.stop().await.expect("system stops");
}

/// No route matching an event type is not an error: the row is finalized as `Done`.
#[tokio::test]
async fn unrouted_event_type_is_finalized_done() {
    let db = TestDb::new().await;
    let schema = db.settings.database.schema_name.clone();

    let mut system = EventSystem::new(EventRouter::new(), db.settings.clone()).expect("event system builds");
    system.start().await.expect("system starts");

    let event = publish_event(
        &db.pool,
        &schema,
        "nobody.listens",
        serde_json::json!({}),
        EventSource::Internal,
        &db.settings.event_system.channel,
        None,
    )
    .await
    .expect("publish succeeds");

    let status = wait_for(Duration::from_secs(5), || {
        let pool = db.pool.clone();
        let schema = schema.clone();
        async move { fetch_status(&pool, &schema, event.id).await.filter(|s| matches!(s, EventStatus::Done)) }
    })
    .await;

    assert_eq!(status, Some(EventStatus::Done));

    system.stop().await.expect("system stops");
}

/// Double-start raises `SystemError::AlreadyStarted`; double-stop is a no-op.
#[tokio::test]
async fn start_stop_is_idempotent() {
    let db = TestDb::new().await;

    let mut system = EventSystem::new(EventRouter::new(), db.settings.clone()).expect("event system builds");
    system.start().await.expect("first start succeeds");

    let second_start = system.start().await;
    assert!(
        matches!(second_start, Err(pgebus::SystemError::AlreadyStarted)),
        "a second start must be rejected, not silently restart the system"
    );

    system.stop().await.expect("first stop succeeds");
    system.stop().await.expect("second stop is a no-op, not an error");
}
