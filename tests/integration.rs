//! Integration tests for transactions over a shared state manager.

use parking_lot::Mutex;
use serde_json::{json, Value};
use statesaga::{
    BoxError, Draft, Error, StateManager, Step, TransactionBuilder, TransactionStatus,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn bump(draft: &Draft, key: &str, by: i64) -> Result<(), BoxError> {
    draft.update(key, |v| *v = json!(v.as_i64().unwrap_or(0) + by))?;
    Ok(())
}

fn counting(counter: &Arc<AtomicUsize>) -> Arc<AtomicUsize> {
    Arc::clone(counter)
}

// --- Rollback ---

#[tokio::test]
async fn test_failed_step_rolls_back_counter() {
    init_tracing();
    let manager = StateManager::with_defaults(json!({"counter": 0}));
    let compensations = Arc::new(AtomicUsize::new(0));
    let seen = counting(&compensations);

    let tx = TransactionBuilder::new("increment-then-fail", &manager)
        .step(
            Step::from_fn("inc", |draft, _| bump(draft, "counter", 5)).compensate_fn(
                move |draft, _| {
                    seen.fetch_add(1, Ordering::SeqCst);
                    bump(draft, "counter", -5)
                },
            ),
        )
        .step(Step::from_fn("explode", |_, _| Err("boom".into())))
        .build();

    let err = tx.run(json!({})).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Transaction increment-then-fail failed and rolled back: boom"
    );
    assert_eq!(err.step(), Some("explode"));
    assert_eq!(manager.get_state()["counter"], 0);
    assert_eq!(compensations.load(Ordering::SeqCst), 1);
    assert_eq!(tx.status(), TransactionStatus::FailedAndRolledBack);
    assert_eq!(manager.undo_len(), 0);
    assert_eq!(manager.snapshot_count(), 0);
}

#[tokio::test]
async fn test_compensations_run_in_reverse() {
    let manager = StateManager::with_defaults(json!({"log": []}));
    let order = Arc::new(Mutex::new(Vec::new()));

    let mut builder = TransactionBuilder::new("ordered", &manager);
    for i in 1..=3 {
        let order = Arc::clone(&order);
        builder = builder.step(
            Step::from_fn(format!("step-{i}"), move |draft, _| {
                draft.update("log", |v| {
                    if let Some(items) = v.as_array_mut() {
                        items.push(json!(i));
                    }
                })?;
                Ok(())
            })
            .compensate_fn(move |_, _| {
                order.lock().push(i);
                Ok(())
            }),
        );
    }
    let tx = builder
        .step(Step::from_fn("step-4", |_, _| Err("fail at 4".into())))
        .build();

    assert!(tx.run(json!(null)).await.is_err());
    assert_eq!(*order.lock(), vec![3, 2, 1]);
    assert_eq!(*manager.get_state(), json!({"log": []}));
    assert_eq!(tx.executed_steps(), vec!["step-1", "step-2", "step-3"]);
}

#[tokio::test]
async fn test_rollback_restores_untracked_writes() {
    // Steps without compensation still get their writes undone by the snapshot.
    let manager = StateManager::with_defaults(json!({"a": 1}));
    let tx = TransactionBuilder::new("partial", &manager)
        .step(Step::from_fn("write", |draft, _| {
            draft.define("b.c", json!(2))?;
            Ok(())
        }))
        .step(Step::from_fn("fail", |_, _| Err("nope".into())))
        .build();

    tx.run(json!({})).await.unwrap_err();
    assert_eq!(*manager.get_state(), json!({"a": 1}));
}

// --- Commit ---

#[tokio::test]
async fn test_commit_is_one_undo_entry() {
    let manager = StateManager::with_defaults(json!({"counter": 0}));
    let counter = manager.select_property("counter");
    let notified = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&notified);
    counter.subscribe(move |v| sink.lock().push(v.clone()));

    let tx = TransactionBuilder::new("twice", &manager)
        .step(Step::from_fn("first", |draft, _| bump(draft, "counter", 5)))
        .step(Step::from_fn("second", |draft, _| bump(draft, "counter", 5)))
        .build();

    tx.run(json!({})).await.unwrap();
    assert_eq!(tx.status(), TransactionStatus::Succeeded);
    assert_eq!(counter.get(), json!(10));
    assert_eq!(*notified.lock(), vec![json!(10)]);
    assert_eq!(manager.undo_len(), 1);
    assert_eq!(manager.snapshot_count(), 0);

    assert!(manager.undo());
    assert_eq!(manager.get_state()["counter"], 0);
    assert_eq!(counter.get(), json!(0));
    assert!(manager.redo());
    assert_eq!(manager.get_state()["counter"], 10);
}

#[tokio::test]
async fn test_no_op_commit_keeps_undo_stack() {
    let manager = StateManager::with_defaults(json!({"counter": 3}));
    manager.set_state(json!({"counter": 4}));
    let before = manager.undo_len();

    let tx = TransactionBuilder::new("net-zero", &manager)
        .step(Step::from_fn("up", |draft, _| bump(draft, "counter", 1)))
        .step(Step::from_fn("down", |draft, _| bump(draft, "counter", -1)))
        .build();

    tx.run(json!({})).await.unwrap();
    assert_eq!(manager.get_state()["counter"], 4);
    assert_eq!(manager.undo_len(), before);
}

#[tokio::test]
async fn test_custom_equality_decides_no_op() {
    // Ignore the "touched" field when deciding whether anything changed.
    let manager = StateManager::with_defaults(json!({"value": 1, "touched": 0}));
    let tx = TransactionBuilder::new("touch", &manager)
        .equality(Arc::new(|a: &Value, b: &Value| a["value"] == b["value"]))
        .step(Step::from_fn("touch", |draft, _| bump(draft, "touched", 1)))
        .build();

    tx.run(json!({})).await.unwrap();
    assert_eq!(manager.get_state()["touched"], 1);
    assert_eq!(manager.undo_len(), 0);
}

#[tokio::test]
async fn test_determinism() {
    let build = |manager: &Arc<StateManager>| {
        TransactionBuilder::new("pure", manager)
            .step(Step::from_fn("add", |draft, payload| {
                let by = payload["by"].as_i64().unwrap_or(0);
                bump(draft, "total", by)
            }))
            .step(Step::from_fn("tag", |draft, _| {
                draft.define("meta.tagged", true)?;
                Ok(())
            }))
            .build()
    };

    let a = StateManager::with_defaults(json!({"total": 1}));
    let b = StateManager::with_defaults(json!({"total": 1}));
    build(&a).run(json!({"by": 7})).await.unwrap();
    build(&b).run(json!({"by": 7})).await.unwrap();
    assert_eq!(*a.get_state(), *b.get_state());
    assert_eq!(*a.get_state(), json!({"total": 8, "meta": {"tagged": true}}));
}

#[tokio::test]
async fn test_async_steps_see_payload() {
    let manager = StateManager::with_defaults(json!({"items": []}));
    let tx = TransactionBuilder::new("add-item", &manager)
        .step(Step::new("fetch", |draft, payload| async move {
            tokio::task::yield_now().await;
            let item = payload["item"].clone();
            draft.update("items", move |v| {
                if let Some(items) = v.as_array_mut() {
                    items.push(item);
                }
            })?;
            Ok::<(), BoxError>(())
        }))
        .build();

    tx.run(json!({"item": "apple"})).await.unwrap();
    assert_eq!(manager.get_state()["items"], json!(["apple"]));
}

// --- Notification Paths ---

#[tokio::test]
async fn test_selectors_see_one_value_per_transaction() {
    let manager = StateManager::with_defaults(json!({"n": 0}));
    let direct = Arc::new(AtomicUsize::new(0));
    let direct_seen = counting(&direct);
    manager.subscribe(move |_| {
        direct_seen.fetch_add(1, Ordering::SeqCst);
    });
    let selected = Arc::new(AtomicUsize::new(0));
    let selected_seen = counting(&selected);
    let n = manager.select_property("n");
    n.subscribe(move |_| {
        selected_seen.fetch_add(1, Ordering::SeqCst);
    });

    let mut builder = TransactionBuilder::new("many-writes", &manager);
    for i in 0..5 {
        builder = builder.step(Step::from_fn(format!("w{i}"), |draft, _| bump(draft, "n", 1)));
    }
    builder.build().run(json!({})).await.unwrap();

    assert_eq!(n.get(), json!(5));
    assert_eq!(selected.load(Ordering::SeqCst), 1);
    // Initial delivery plus one per in-place write.
    assert_eq!(direct.load(Ordering::SeqCst), 6);
}

#[tokio::test]
async fn test_combined_selector_sees_only_the_committed_total() {
    let manager = StateManager::with_defaults(json!({"a": 1, "b": 1}));
    let a = manager.select(|s| s["a"].as_i64().unwrap_or(0));
    let b = manager.select(|s| s["b"].as_i64().unwrap_or(0));
    let total = manager.combine(&[a, b], |vals: &[i64]| vals.iter().sum::<i64>());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    total.subscribe(move |v: &i64| sink.lock().push(*v));

    TransactionBuilder::new("both", &manager)
        .step(Step::from_fn("a", |draft, _| bump(draft, "a", 4)))
        .step(Step::from_fn("b", |draft, _| bump(draft, "b", 4)))
        .build()
        .run(json!({}))
        .await
        .unwrap();

    assert_eq!(total.get(), 10);
    assert_eq!(*seen.lock(), vec![10]);
}

#[tokio::test]
async fn test_rolled_back_run_leaves_selectors_quiet() {
    let manager = StateManager::with_defaults(json!({"n": 0}));
    let n = manager.select_property("n");
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = counting(&calls);
    n.subscribe(move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
    });

    let tx = TransactionBuilder::new("fails", &manager)
        .step(Step::from_fn("write", |draft, _| bump(draft, "n", 1)))
        .step(Step::from_fn("fail", |_, _| Err("x".into())))
        .build();
    tx.run(json!({})).await.unwrap_err();

    assert_eq!(n.get(), json!(0));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

// --- Disabled Rollback ---

#[tokio::test]
async fn test_disabled_rollback_keeps_effects() {
    let manager = StateManager::with_defaults(json!({"counter": 0}));
    let compensations = Arc::new(AtomicUsize::new(0));
    let seen = counting(&compensations);

    let tx = TransactionBuilder::new("keep", &manager)
        .auto_rollback(false)
        .step(
            Step::from_fn("inc", |draft, _| bump(draft, "counter", 5)).compensate_fn(
                move |draft, _| {
                    seen.fetch_add(1, Ordering::SeqCst);
                    bump(draft, "counter", -5)
                },
            ),
        )
        .step(Step::from_fn("explode", |_, _| Err("boom".into())))
        .build();

    let err = tx.run(json!({})).await.unwrap_err();
    assert_eq!(err.to_string(), "Transaction keep failed (rollback disabled): boom");
    assert_eq!(tx.status(), TransactionStatus::FailedNoRollback);
    assert_eq!(manager.get_state()["counter"], 5);
    assert_eq!(compensations.load(Ordering::SeqCst), 0);
    assert_eq!(manager.undo_len(), 1);
    assert_eq!(manager.snapshot_count(), 0);

    tx.rollback(json!({})).await.unwrap();
    assert_eq!(manager.get_state()["counter"], 0);
    assert_eq!(compensations.load(Ordering::SeqCst), 1);
    assert_eq!(manager.undo_len(), 2);
    assert!(tx.executed_steps().is_empty());
}

// --- Middleware ---

#[tokio::test]
async fn test_middleware_wraps_steps_in_onion_order() {
    let manager = StateManager::with_defaults(json!({}));
    let log = Arc::new(Mutex::new(Vec::<String>::new()));

    let a_log = Arc::clone(&log);
    let b_log = Arc::clone(&log);
    let s_log = Arc::clone(&log);
    let tx = TransactionBuilder::new("onion", &manager)
        .middleware_fn(move |_ctx, next| {
            let log = Arc::clone(&a_log);
            async move {
                log.lock().push("A-before".into());
                next.run().await?;
                log.lock().push("A-after".into());
                Ok::<(), Error>(())
            }
        })
        .middleware_fn(move |_ctx, next| {
            let log = Arc::clone(&b_log);
            async move {
                log.lock().push("B-before".into());
                next.run().await?;
                log.lock().push("B-after".into());
                Ok::<(), Error>(())
            }
        })
        .step(Step::from_fn("S", move |_, _| {
            s_log.lock().push("S".into());
            Ok(())
        }))
        .build();

    tx.run(json!({})).await.unwrap();
    assert_eq!(
        *log.lock(),
        vec!["A-before", "B-before", "S", "B-after", "A-after"]
    );
}

#[tokio::test]
async fn test_short_circuit_middleware_skips_steps() {
    let manager = StateManager::with_defaults(json!({"n": 0}));
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = counting(&calls);

    let tx = TransactionBuilder::new("cached", &manager)
        .middleware_fn(|ctx, _next| async move {
            tracing::debug!(transaction = %ctx.transaction(), "served from cache");
            Ok(())
        })
        .step(Step::from_fn("work", move |draft, _| {
            seen.fetch_add(1, Ordering::SeqCst);
            bump(draft, "n", 1)
        }))
        .build();

    tx.run(json!({})).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(manager.get_state()["n"], 0);
    assert_eq!(tx.status(), TransactionStatus::Succeeded);
}

#[tokio::test]
async fn test_middleware_state_writes_commit_with_run() {
    let manager = StateManager::with_defaults(json!({"n": 0}));
    let tx = TransactionBuilder::new("audited", &manager)
        .middleware_fn(|ctx, next| async move {
            next.run().await?;
            let mut state = (*ctx.get_state()).clone();
            state["audited"] = json!(ctx.transaction());
            ctx.set_state(state);
            Ok::<(), Error>(())
        })
        .step(Step::from_fn("inc", |draft, _| bump(draft, "n", 1)))
        .build();

    tx.run(json!({})).await.unwrap();
    assert_eq!(*manager.get_state(), json!({"n": 1, "audited": "audited"}));
    assert_eq!(manager.undo_len(), 1);
}
