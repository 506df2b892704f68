//! Lifecycle event emission seen from streams and observers.

use serde_json::json;
use statesaga::{
    EventFilter, EventStreamConfig, StateManager, StatsObserver, StatsSnapshot, Step,
    TracingObserver, TransactionBuilder, TransactionEvent,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn kinds(events: &[TransactionEvent]) -> Vec<&'static str> {
    events.iter().map(|e| e.event_type()).collect()
}

#[tokio::test]
async fn test_successful_run_event_sequence() {
    let manager = StateManager::with_defaults(json!({"n": 0}));
    let stream = manager.events().subscribe(EventStreamConfig::default());

    let tx = TransactionBuilder::new("ok", &manager)
        .step(Step::from_fn("a", |_, _| Ok(())))
        .step(Step::from_fn("b", |_, _| Ok(())))
        .build();
    tx.run(json!({"user": 1})).await.unwrap();

    let events = stream.drain();
    assert_eq!(
        kinds(&events),
        vec![
            "transaction:start",
            "step:start",
            "step:success",
            "step:start",
            "step:success",
            "transaction:success",
        ]
    );
    match &events[0] {
        TransactionEvent::TransactionStart {
            transaction_name,
            payload,
            ..
        } => {
            assert_eq!(transaction_name, "ok");
            assert_eq!(payload, &json!({"user": 1}));
        }
        other => panic!("unexpected first event: {other:?}"),
    }
    assert_eq!(events[1].name(), "a");
    assert_eq!(events[3].name(), "b");
}

#[tokio::test]
async fn test_failed_run_event_sequence() {
    let manager = StateManager::with_defaults(json!({}));
    let stream = manager.events().subscribe(EventStreamConfig::default());
    let attempts = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&attempts);

    let tx = TransactionBuilder::new("bad", &manager)
        .step(Step::from_fn("undoable", |_, _| Ok(())).compensate_fn(|_, _| Ok(())))
        .step(
            Step::from_fn("flaky", move |_, _| {
                seen.fetch_add(1, Ordering::SeqCst);
                Err("down".into())
            })
            .retries(1),
        )
        .build();
    tx.run(json!({})).await.unwrap_err();

    let events = stream.drain();
    assert_eq!(
        kinds(&events),
        vec![
            "transaction:start",
            "step:start",
            "step:success",
            "step:start",
            "step:retry",
            "transaction:fail",
            "transaction:rollback",
            "step:rollback",
        ]
    );
    match &events[4] {
        TransactionEvent::StepRetry {
            attempt, last_error, ..
        } => {
            assert_eq!(*attempt, 1);
            assert_eq!(last_error, "down");
        }
        other => panic!("unexpected event: {other:?}"),
    }
    match &events[5] {
        TransactionEvent::TransactionFail { error, .. } => assert_eq!(error, "down"),
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_filtered_stream() {
    let manager = StateManager::with_defaults(json!({}));
    let only_tx = manager.events().subscribe(EventStreamConfig {
        filter: EventFilter::transactions(),
        ..Default::default()
    });
    let only_b = manager.events().subscribe(EventStreamConfig {
        filter: EventFilter::steps().named(vec!["b".to_string()]),
        ..Default::default()
    });

    TransactionBuilder::new("filtered", &manager)
        .step(Step::from_fn("a", |_, _| Ok(())))
        .step(Step::from_fn("b", |_, _| Ok(())))
        .build()
        .run(json!({}))
        .await
        .unwrap();

    assert_eq!(
        kinds(&only_tx.drain()),
        vec!["transaction:start", "transaction:success"]
    );
    assert_eq!(kinds(&only_b.drain()), vec!["step:start", "step:success"]);
}

#[tokio::test]
async fn test_observers_count_events() {
    let manager = StateManager::with_defaults(json!({}));
    let stats = Arc::new(StatsObserver::new());
    manager.events().add_observer(stats.clone());
    manager.events().add_observer(Arc::new(TracingObserver));

    TransactionBuilder::new("fine", &manager)
        .step(Step::from_fn("a", |_, _| Ok(())))
        .build()
        .run(json!({}))
        .await
        .unwrap();

    TransactionBuilder::new("broken", &manager)
        .step(Step::from_fn("a", |_, _| Ok(())).compensate_fn(|_, _| Ok(())))
        .step(Step::from_fn("b", |_, _| Err("no".into())).retries(2))
        .build()
        .run(json!({}))
        .await
        .unwrap_err();

    assert_eq!(
        stats.snapshot(),
        StatsSnapshot {
            transactions_started: 2,
            transactions_succeeded: 1,
            transactions_failed: 1,
            transactions_rolled_back: 1,
            steps_started: 3,
            steps_succeeded: 2,
            step_retries: 2,
            compensations: 1,
        }
    );
    assert_eq!(manager.events().observer_count(), 2);
}
