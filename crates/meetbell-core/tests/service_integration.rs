//! Integration tests for the reminder service loop.

mod common;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use common::{at, coordinator, meeting, RecordingScheduler, ScriptedSource};
use meetbell_core::alert::{CalendarContextProvider, ChannelDelivery, MissedAlertResult};
use meetbell_core::service::ReminderService;
use meetbell_core::{
    AlertEngine, AlertOffsets, Clock, ManualClock, MemoryStore, SourceError, SqliteStore,
};

#[tokio::test]
async fn test_round_schedules_alerts_for_synced_events() {
    let source = ScriptedSource::new();
    source.push_events(
        "work",
        vec![meeting("work", "standup", at(30)), meeting("work", "lunch", at(240)).all_day()],
    );
    source.push_events("home", vec![meeting("home", "call", at(90))]);
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(at(0)));
    let sync = coordinator(source, store.clone(), clock.clone(), &["work", "home"]);
    let scheduler = RecordingScheduler::new();
    let alerts = AlertEngine::builder(scheduler.clone(), store)
        .with_clock(clock.clone())
        .build();
    let service = ReminderService::new(sync, alerts, AlertOffsets::default()).with_clock(clock);

    service.start().await;
    let (round, outcome) = service.run_round().await;

    assert_eq!(round.successes.len(), 2);
    assert_eq!(outcome.schedule.armed, 4);
    assert_eq!(scheduler.armed_at("work::standup-stage1"), Some(at(25)));
    assert_eq!(scheduler.armed_at("home::call-stage2"), Some(at(89)));
    assert!(service.alerts().alert("work::lunch-stage1").await.is_none());
}

#[tokio::test]
async fn test_restart_while_source_is_down_keeps_alerts() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("meetbell.db");
    let clock = Arc::new(ManualClock::new(at(0)));

    {
        let source = ScriptedSource::new();
        source.push_events("work", vec![meeting("work", "standup", at(30))]);
        let store = Arc::new(SqliteStore::open_at(&db_path).unwrap());
        let sync = coordinator(source, store.clone(), clock.clone(), &["work"]);
        let alerts = AlertEngine::builder(RecordingScheduler::new(), store)
            .with_clock(clock.clone())
            .build();
        let service =
            ReminderService::new(sync, alerts, AlertOffsets::default()).with_clock(clock.clone());
        service.start().await;
        service.run_round().await;
    }

    let source = ScriptedSource::new();
    source.push("work", Err(SourceError::Server { code: 502 }));
    let store = Arc::new(SqliteStore::open_at(&db_path).unwrap());
    let sync = coordinator(source, store.clone(), clock.clone(), &["work"]);
    let scheduler = RecordingScheduler::new();
    let alerts = AlertEngine::builder(scheduler.clone(), store)
        .with_clock(clock.clone())
        .build();
    let service = ReminderService::new(sync, alerts, AlertOffsets::default()).with_clock(clock);

    let report = service.start().await;
    assert_eq!(report.cached_events, 1);
    assert_eq!(report.restored_alerts, 2);

    let (round, outcome) = service.run_round().await;
    assert_eq!(round.failed_sources(), vec!["work"]);
    assert!(outcome.dropped_events.is_empty());
    assert_eq!(service.alerts().active_alerts().await.len(), 2);
    assert_eq!(scheduler.armed_count(), 2);
}

#[tokio::test]
async fn test_wake_gap_triggers_missed_alert_recovery() {
    let source = ScriptedSource::new();
    source.push_events("work", vec![meeting("work", "review", at(30))]);
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(at(0)));
    let sync = coordinator(source, store.clone(), clock.clone(), &["work"]);
    let (delivery, mut delivered) = ChannelDelivery::new();
    let alerts = AlertEngine::builder(RecordingScheduler::new(), store)
        .with_delivery(Arc::new(delivery))
        .with_clock(clock.clone())
        .build();
    let service =
        ReminderService::new(sync, alerts, AlertOffsets::default()).with_clock(clock.clone());
    service.start().await;
    service.run_round().await;

    // Short sleep: no recovery.
    let slept_from = clock.now();
    clock.advance(Duration::seconds(90));
    assert!(service.after_sleep(slept_from, StdDuration::from_secs(60)).await.is_none());

    // Lid closed for half an hour, then reopened just after the start.
    let slept_from = clock.now();
    clock.set(at(32));
    let missed = service
        .after_sleep(slept_from, StdDuration::from_secs(60))
        .await
        .expect("wake gap should be detected");

    let results: Vec<MissedAlertResult> = missed.iter().map(|m| m.result).collect();
    assert_eq!(
        results,
        vec![
            MissedAlertResult::MeetingJustStarted { minutes_since_start: 2 },
            MissedAlertResult::MeetingJustStarted { minutes_since_start: 2 },
        ]
    );
    assert!(delivered.try_recv().is_ok());
    assert!(delivered.try_recv().is_ok());
    assert!(service.alerts().active_alerts().await.is_empty());
}

#[tokio::test]
async fn test_context_provider_follows_rounds() {
    let source = ScriptedSource::new();
    source.push_events(
        "work",
        vec![meeting("work", "current", at(-10)), meeting("work", "next", at(22))],
    );
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(at(0)));
    let sync = coordinator(source, store.clone(), clock.clone(), &["work"]);
    let context = Arc::new(CalendarContextProvider::with_clock(clock.clone()));
    let (delivery, mut delivered) = ChannelDelivery::new();
    let alerts = AlertEngine::builder(RecordingScheduler::new(), store)
        .with_delivery(Arc::new(delivery))
        .with_context_provider(context.clone())
        .with_clock(clock.clone())
        .build();
    let service = ReminderService::new(sync, alerts, AlertOffsets::default())
        .with_context(context)
        .with_clock(clock.clone());

    service.run_round().await;
    clock.set(at(17));
    service.alerts().fire_alert("work::next-stage1").await;

    // "current" runs until 20 and "next" starts at 22: back-to-back.
    assert!(matches!(
        delivered.try_recv().unwrap(),
        meetbell_core::alert::Delivered::Passive { .. }
    ));
}

#[tokio::test]
async fn test_run_stops_on_shutdown_and_disarms() {
    let source = ScriptedSource::new();
    let later = chrono::Utc::now() + Duration::hours(2);
    source.push_events("work", vec![meeting("work", "later", later)]);
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
    let sync = coordinator(source, store.clone(), clock, &["work"]);
    let scheduler = RecordingScheduler::new();
    let alerts = AlertEngine::builder(scheduler.clone(), store).build();
    let service = ReminderService::new(sync, alerts, AlertOffsets::default());

    tokio::time::timeout(
        StdDuration::from_secs(5),
        service.run(tokio::time::sleep(StdDuration::from_millis(50))),
    )
    .await
    .expect("service should stop on shutdown");

    assert_eq!(scheduler.cancel_all_calls(), 1);
    assert_eq!(service.alerts().active_alerts().await.len(), 2);
}
