//! End-to-end behaviour of the synchronization core over in-memory backends
//!
//! Covers the guarantees callers rely on: repeated triggers converge to the
//! same state, pending local writes survive reconciliation, failed mutations
//! leave no trace, and the router's fallback and short-circuit rules hold for
//! mutations routed through the engine.

mod helpers;

use helpers::{record, wait_for_event, Harness};
use msync_common::config::{BackendKind, SyncConfig};
use msync_common::events::SyncEvent;
use msync_common::{EntityType, LifecycleState, MutationKind, ScopeKey};
use msync_core::adapter::Fault;
use msync_core::{ChangeKind, ChangeListener, MergeOutcome, SourceError, SyncError};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const PROJECT: &str = "p1";

fn tasks() -> ScopeKey {
    ScopeKey::new(PROJECT, EntityType::Task)
}

fn ids(entities: &[msync_core::Entity]) -> Vec<String> {
    entities.iter().map(|e| e.id.clone()).collect()
}

#[tokio::test]
async fn test_notification_burst_converges_to_single_pass_state() {
    let h = Harness::new();
    h.primary
        .seed(&tasks(), vec![("t-1".to_string(), record(json!({"title": "a"})))])
        .await;

    let scope = h.engine.open_scope(PROJECT, EntityType::Task).await.unwrap();
    let mut events = h.engine.events().subscribe();

    h.primary
        .seed(
            &tasks(),
            vec![
                ("t-1".to_string(), record(json!({"title": "a"}))),
                ("t-2".to_string(), record(json!({"title": "b"}))),
            ],
        )
        .await;
    for _ in 0..10 {
        h.channel.notify(&tasks(), ChangeKind::Insert).await;
    }

    wait_for_event(&mut events, Duration::from_secs(5), |e| {
        matches!(e, SyncEvent::ReconcileApplied { counts, .. } if counts.added == 1)
    })
    .await;

    // Anything still queued has nothing left to change
    match scope.reconcile().await.unwrap() {
        MergeOutcome::Applied(counts) => assert!(counts.is_noop(), "unexpected changes: {:?}", counts),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(ids(&scope.entities().await), vec!["t-1", "t-2"]);

    // Opening pass, at most one running plus one queued, and the explicit pass
    assert!(h.primary.calls().await.fetch <= 4);
}

#[tokio::test]
async fn test_repeated_passes_are_idempotent() {
    let h = Harness::new();
    h.primary
        .seed(
            &tasks(),
            vec![
                ("t-1".to_string(), record(json!({"title": "a"}))),
                ("t-2".to_string(), record(json!({"title": "b"}))),
            ],
        )
        .await;
    let _scope = h.engine.open_scope(PROJECT, EntityType::Task).await.unwrap();
    let after_open = h.engine.snapshot(PROJECT, EntityType::Task).await.unwrap();

    for _ in 0..5 {
        let outcome = h.engine.reconcile(PROJECT, EntityType::Task).await.unwrap();
        assert!(matches!(outcome, MergeOutcome::Applied(counts) if counts.is_noop()));
    }
    assert_eq!(h.engine.snapshot(PROJECT, EntityType::Task).await.unwrap(), after_open);
}

#[tokio::test(start_paused = true)]
async fn test_pending_update_survives_reconciliation() {
    // Writes go to the legacy backend only so reads stay fast while the write hangs
    let config = SyncConfig {
        read_order: vec![BackendKind::Primary],
        write_order: vec![BackendKind::Legacy],
        ..Default::default()
    };
    let h = Harness::with_config(config, true);
    h.primary
        .seed(&tasks(), vec![("t-1".to_string(), record(json!({"title": "theirs"})))])
        .await;
    h.legacy
        .seed(&tasks(), vec![("t-1".to_string(), record(json!({"title": "old"})))])
        .await;

    let scope = h.engine.open_scope(PROJECT, EntityType::Task).await.unwrap();
    assert_eq!(scope.get("t-1").await.unwrap().field_str("title"), Some("theirs"));

    h.legacy.set_latency(Some(Duration::from_secs(2))).await;
    let ticket = scope
        .apply(MutationKind::Update, record(json!({"id": "t-1", "title": "mine"})))
        .await
        .unwrap();

    match scope.reconcile().await.unwrap() {
        MergeOutcome::Applied(counts) => {
            assert_eq!(counts.kept_pending, 1);
            assert_eq!(counts.updated, 0);
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    let pending = scope.get("t-1").await.unwrap();
    assert_eq!(pending.field_str("title"), Some("mine"));
    assert_eq!(pending.lifecycle, LifecycleState::Pending);

    let confirmed = ticket.outcome().await.unwrap().unwrap();
    assert_eq!(confirmed.field_str("title"), Some("mine"));

    let entity = scope.get("t-1").await.unwrap();
    assert_eq!(entity.lifecycle, LifecycleState::Confirmed);
    assert_eq!(entity.field_str("title"), Some("mine"));
}

#[tokio::test(start_paused = true)]
async fn test_pending_delete_is_not_resurrected() {
    let config = SyncConfig {
        read_order: vec![BackendKind::Primary],
        write_order: vec![BackendKind::Legacy],
        ..Default::default()
    };
    let h = Harness::with_config(config, true);
    let seed = vec![("t-1".to_string(), record(json!({"title": "a"})))];
    h.primary.seed(&tasks(), seed.clone()).await;
    h.legacy.seed(&tasks(), seed).await;

    let scope = h.engine.open_scope(PROJECT, EntityType::Task).await.unwrap();
    h.legacy.set_latency(Some(Duration::from_secs(2))).await;
    let ticket = scope
        .apply(MutationKind::Delete, record(json!({"id": "t-1"})))
        .await
        .unwrap();
    assert!(scope.entities().await.is_empty());

    // The snapshot still lists t-1
    scope.reconcile().await.unwrap();
    assert!(scope.entities().await.is_empty());

    assert_eq!(ticket.outcome().await.unwrap(), None);
    assert!(h.legacy.records(&tasks()).await.is_empty());
    assert!(scope.entities().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failed_create_leaves_no_provisional_entry() {
    let h = Harness::new();
    let scope = h.engine.open_scope(PROJECT, EntityType::Task).await.unwrap();
    let mut events = h.engine.events().subscribe();

    h.primary.set_latency(Some(Duration::from_millis(100))).await;
    h.primary.fail_always(Fault::Unreachable).await;
    h.legacy.fail_always(Fault::Unreachable).await;

    let ticket = scope
        .apply(MutationKind::Create, record(json!({"title": "Doomed"})))
        .await
        .unwrap();
    let provisional = ticket.id.clone();
    assert_eq!(ids(&scope.entities().await), vec![provisional.clone()]);

    let err = ticket.outcome().await.unwrap_err();
    match &err {
        SyncError::Rollback { id, cause } => {
            assert_eq!(id, &provisional);
            assert!(matches!(**cause, SyncError::AllSourcesFailed { attempts: 2, .. }));
        }
        other => panic!("expected rollback, got {:?}", other),
    }
    assert!(err.is_user_visible());
    assert!(scope.entities().await.is_empty());

    let event = wait_for_event(&mut events, Duration::from_secs(1), |e| {
        matches!(e, SyncEvent::MutationRolledBack { .. })
    })
    .await;
    match event {
        SyncEvent::MutationRolledBack { id, kind, .. } => {
            assert_eq!(id, provisional);
            assert_eq!(kind, MutationKind::Create);
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn test_failed_update_restores_previous_fields() {
    let h = Harness::new();
    h.primary
        .seed(&tasks(), vec![("t-1".to_string(), record(json!({"title": "a", "status": "todo"})))])
        .await;
    let scope = h.engine.open_scope(PROJECT, EntityType::Task).await.unwrap();
    let before = scope.get("t-1").await.unwrap();

    h.primary.fail_always(Fault::Malformed).await;
    h.legacy.fail_always(Fault::Unreachable).await;

    let ticket = scope
        .apply(MutationKind::Update, record(json!({"id": "t-1", "status": "done"})))
        .await
        .unwrap();
    assert!(ticket.outcome().await.is_err());
    assert_eq!(scope.get("t-1").await.unwrap(), before);
}

#[tokio::test]
async fn test_unreachable_primary_falls_back_for_writes() {
    let h = Harness::new();
    let scope = h.engine.open_scope(PROJECT, EntityType::Task).await.unwrap();
    let mut events = h.engine.events().subscribe();

    h.primary.fail_always(Fault::Unreachable).await;
    h.legacy.assign_next_id("t-7").await;

    let ticket = scope
        .apply(MutationKind::Create, record(json!({"title": "Call back"})))
        .await
        .unwrap();
    let entity = ticket.outcome().await.unwrap().unwrap();
    assert_eq!(entity.id, "t-7");

    assert_eq!(h.primary.calls().await.create, 1);
    assert_eq!(h.legacy.calls().await.create, 1);

    let event = wait_for_event(&mut events, Duration::from_secs(1), |e| {
        matches!(e, SyncEvent::MutationConfirmed { .. })
    })
    .await;
    match event {
        SyncEvent::MutationConfirmed { id, adapter, provisional_id, .. } => {
            assert_eq!(id, "t-7");
            assert_eq!(adapter, "legacy");
            assert!(provisional_id.is_some());
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn test_malformed_primary_falls_back_for_reads() {
    let h = Harness::new();
    h.primary.fail_always(Fault::Malformed).await;
    h.legacy
        .seed(&tasks(), vec![("t-1".to_string(), record(json!({"title": "legacy copy"})))])
        .await;
    let mut events = h.engine.events().subscribe();

    let scope = h.engine.open_scope(PROJECT, EntityType::Task).await.unwrap();
    assert_eq!(ids(&scope.entities().await), vec!["t-1"]);

    let event = wait_for_event(&mut events, Duration::from_secs(1), |e| {
        matches!(e, SyncEvent::ReconcileApplied { .. })
    })
    .await;
    assert!(matches!(event, SyncEvent::ReconcileApplied { adapter, .. } if adapter == "legacy"));
}

#[tokio::test]
async fn test_rejection_is_not_retried_on_next_backend() {
    let h = Harness::new();
    let scope = h.engine.open_scope(PROJECT, EntityType::Task).await.unwrap();

    h.primary
        .fail_next(Fault::Rejected("Task title is required".to_string()))
        .await;

    let ticket = scope
        .apply(MutationKind::Create, record(json!({"title": ""})))
        .await
        .unwrap();
    let err = ticket.outcome().await.unwrap_err();

    match err.root_cause() {
        SyncError::Source(SourceError::Rejected { adapter, message }) => {
            assert_eq!(adapter, "primary");
            assert_eq!(message, "Task title is required");
        }
        other => panic!("expected rejection, got {:?}", other),
    }
    assert_eq!(h.legacy.calls().await.create, 0);
    assert!(scope.entities().await.is_empty());
}

#[tokio::test]
async fn test_unsubscribe_all_silences_every_handle() {
    let h = Harness::new();
    let listener = ChangeListener::new(h.channel.clone());
    let hits = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..3 {
        let hits = Arc::clone(&hits);
        let handle = listener
            .subscribe(&tasks(), move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap();
        handles.push(handle);
    }
    h.channel.break_unsubscribe(handles[1].channel_handle()).await;

    h.channel.notify(&tasks(), ChangeKind::Update).await;
    assert_eq!(hits.load(Ordering::SeqCst), 3);

    let failures = listener.unsubscribe_all(handles).await;
    assert_eq!(failures, 1);
    // The broken registration lingers on the channel but stays silent
    assert_eq!(h.channel.registration_count(&tasks()).await, 1);

    h.channel.notify(&tasks(), ChangeKind::Delete).await;
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_created_task_is_promoted_exactly_once() {
    let h = Harness::new();
    let scope = h.engine.open_scope(PROJECT, EntityType::Task).await.unwrap();

    h.primary.assign_next_id("t-42").await;
    h.primary.set_latency(Some(Duration::from_millis(100))).await;

    let ticket = scope
        .apply(
            MutationKind::Create,
            record(json!({"title": "Write report", "status": "todo"})),
        )
        .await
        .unwrap();

    let staged = scope.entities().await;
    assert_eq!(staged.len(), 1);
    assert!(staged[0].is_provisional());
    assert_eq!(staged[0].lifecycle, LifecycleState::Pending);
    assert_eq!(staged[0].field_str("title"), Some("Write report"));

    let confirmed = ticket.outcome().await.unwrap().unwrap();
    assert_eq!(confirmed.id, "t-42");

    // A later pass sees t-42 on the server and must not add a second copy
    scope.reconcile().await.unwrap();
    let entities = scope.entities().await;
    assert_eq!(ids(&entities), vec!["t-42"]);
    assert_eq!(entities[0].lifecycle, LifecycleState::Confirmed);
    assert_eq!(entities[0].field_str("title"), Some("Write report"));
}
