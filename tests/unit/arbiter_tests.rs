//! Permission arbitration: risk table, threshold, host round trip, cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use agent_bridge::models::notification::Notification;
use agent_bridge::models::operation::{
    Operation, PermissionDecision, PermissionOption, PermissionScope, RiskLevel,
};
use agent_bridge::permission::{PermissionArbiter, PermissionCache, RiskTable};
use agent_bridge::AppError;
use tokio::sync::mpsc;

fn arbiter(threshold: RiskLevel, timeout: Duration) -> PermissionArbiter {
    PermissionArbiter::new(RiskTable::default(), threshold, timeout)
}

/// Answer every permission request arriving on `rx` with `option`.
fn answer_with(
    arbiter: &PermissionArbiter,
    mut rx: mpsc::Receiver<Notification>,
    option: PermissionOption,
) -> tokio::task::JoinHandle<usize> {
    let arbiter = arbiter.clone();
    tokio::spawn(async move {
        let mut answered = 0;
        while let Some(notification) = rx.recv().await {
            if let Notification::PermissionRequest { request_id, .. } = notification {
                arbiter.resolve(&request_id, option).expect("resolve");
                answered += 1;
            }
        }
        answered
    })
}

#[test]
fn default_risk_table() {
    let table = RiskTable::default();
    assert_eq!(table.assess("file_read"), RiskLevel::Low);
    assert_eq!(table.assess("list_files"), RiskLevel::Low);
    assert_eq!(table.assess("file_write"), RiskLevel::Medium);
    assert_eq!(table.assess("git_commit"), RiskLevel::Medium);
    assert_eq!(table.assess("git_push"), RiskLevel::High);
    assert_eq!(table.assess("terminal_exec"), RiskLevel::High);
    assert_eq!(table.assess("delete_file"), RiskLevel::High);
    assert_eq!(table.assess("teleport"), RiskLevel::Medium);
    assert!(!table.contains("teleport"));
}

#[test]
fn overrides_take_precedence() {
    let table = RiskTable::with_overrides(HashMap::from([
        ("git_commit".to_owned(), RiskLevel::High),
        ("deploy".to_owned(), RiskLevel::High),
    ]));
    assert_eq!(table.assess("git_commit"), RiskLevel::High);
    assert_eq!(table.assess("deploy"), RiskLevel::High);
    assert!(table.contains("deploy"));
    assert_eq!(table.assess("file_read"), RiskLevel::Low);
}

#[test]
fn risk_levels_are_ordered() {
    assert!(RiskLevel::Low < RiskLevel::Medium);
    assert!(RiskLevel::Medium < RiskLevel::High);
}

#[tokio::test]
async fn low_risk_under_medium_threshold_is_automatic() {
    let arbiter = arbiter(RiskLevel::Medium, Duration::from_secs(30));
    let (tx, mut rx) = mpsc::channel(4);

    let decision = arbiter
        .request_permission("s1", &arbiter.operation("file_read"), &tx)
        .await;

    assert!(decision.granted);
    assert!(decision.automatic);
    assert!(!decision.cached);
    assert!(rx.try_recv().is_err(), "no round trip expected");
}

#[tokio::test]
async fn threshold_is_inclusive() {
    let arbiter = arbiter(RiskLevel::Medium, Duration::from_secs(30));
    let (tx, mut rx) = mpsc::channel(4);

    let decision = arbiter
        .request_permission("s1", &arbiter.operation("file_write"), &tx)
        .await;

    assert_eq!(decision, PermissionDecision::automatic());
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn above_threshold_sends_request_with_full_option_set() {
    let arbiter = arbiter(RiskLevel::Low, Duration::from_secs(30));
    let (tx, mut rx) = mpsc::channel(4);
    let operation = arbiter.operation("git_push").with_detail("remote", "origin");

    let waiter = {
        let arbiter = arbiter.clone();
        let operation = operation.clone();
        tokio::spawn(async move { arbiter.request_permission("s1", &operation, &tx).await })
    };

    let Some(Notification::PermissionRequest {
        request_id,
        session_id,
        operation: sent,
        risk_level,
        options,
    }) = rx.recv().await
    else {
        panic!("expected a permission request");
    };
    assert_eq!(session_id, "s1");
    assert_eq!(sent, operation);
    assert_eq!(risk_level, RiskLevel::High);
    assert_eq!(options, PermissionOption::ALL.to_vec());
    assert_eq!(arbiter.pending_count(), 1);

    arbiter
        .resolve(&request_id, PermissionOption::Allow)
        .expect("resolve");
    let decision = waiter.await.expect("join");

    assert!(decision.granted);
    assert!(!decision.automatic);
    assert_eq!(decision.scope, PermissionScope::Once);
    assert_eq!(arbiter.pending_count(), 0);
    assert!(arbiter.cache().is_empty().await, "allow is not cached");
}

#[tokio::test]
async fn allow_all_is_cached_for_the_operation_type() {
    let arbiter = arbiter(RiskLevel::Low, Duration::from_secs(30));
    let (tx, rx) = mpsc::channel(4);
    let responder = answer_with(&arbiter, rx, PermissionOption::AllowAll);

    let first = arbiter
        .request_permission("s1", &arbiter.operation("git_commit"), &tx)
        .await;
    assert!(first.granted);
    assert!(!first.cached);

    // Same process lifetime, different session: served from the cache.
    let second = arbiter
        .request_permission("s2", &arbiter.operation("git_commit"), &tx)
        .await;
    assert!(second.granted);
    assert!(second.cached);
    assert!(!second.automatic);

    drop(tx);
    assert_eq!(responder.await.expect("join"), 1, "one round trip only");
}

#[tokio::test]
async fn cache_is_keyed_by_operation_type() {
    let arbiter = arbiter(RiskLevel::Low, Duration::from_secs(30));
    let (tx, rx) = mpsc::channel(4);
    let responder = answer_with(&arbiter, rx, PermissionOption::AllowAll);

    arbiter
        .request_permission("s1", &arbiter.operation("git_commit"), &tx)
        .await;
    let other = arbiter
        .request_permission("s1", &arbiter.operation("git_push"), &tx)
        .await;

    assert!(other.granted);
    assert!(!other.cached);
    drop(tx);
    assert_eq!(responder.await.expect("join"), 2);
}

#[tokio::test]
async fn deny_is_not_granted_and_not_cached() {
    let arbiter = arbiter(RiskLevel::Low, Duration::from_secs(30));
    let (tx, rx) = mpsc::channel(4);
    let responder = answer_with(&arbiter, rx, PermissionOption::Deny);

    let decision = arbiter
        .request_permission("s1", &arbiter.operation("delete_file"), &tx)
        .await;

    assert_eq!(decision, PermissionDecision::denied());
    assert!(arbiter.cache().is_empty().await);
    drop(tx);
    responder.await.expect("join");
}

#[tokio::test]
async fn timeout_denies_and_clears_pending() {
    let arbiter = arbiter(RiskLevel::Low, Duration::from_millis(50));
    let (tx, mut rx) = mpsc::channel(4);

    let decision = arbiter
        .request_permission("s1", &arbiter.operation("terminal_exec"), &tx)
        .await;

    assert!(!decision.granted);
    assert_eq!(arbiter.pending_count(), 0);

    let Some(Notification::PermissionRequest { request_id, .. }) = rx.recv().await else {
        panic!("expected a permission request");
    };
    assert!(matches!(
        arbiter.resolve(&request_id, PermissionOption::Allow),
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn closed_caller_channel_denies() {
    let arbiter = arbiter(RiskLevel::Low, Duration::from_secs(30));
    let (tx, rx) = mpsc::channel(1);
    drop(rx);

    let decision = arbiter
        .request_permission("s1", &arbiter.operation("git_push"), &tx)
        .await;

    assert!(!decision.granted);
    assert_eq!(arbiter.pending_count(), 0);
}

#[tokio::test]
async fn resolving_unknown_request_fails() {
    let arbiter = arbiter(RiskLevel::Low, Duration::from_secs(1));
    assert!(matches!(
        arbiter.resolve("nope", PermissionOption::Deny),
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn arbiters_with_separate_caches_are_isolated() {
    let first = arbiter(RiskLevel::Low, Duration::from_secs(30));
    let second = arbiter(RiskLevel::Low, Duration::from_millis(50));
    let (tx, rx) = mpsc::channel(4);
    let responder = answer_with(&first, rx, PermissionOption::AllowAll);

    first
        .request_permission("s1", &first.operation("git_commit"), &tx)
        .await;
    drop(tx);
    responder.await.expect("join");

    assert_eq!(first.cache().len().await, 1);
    assert!(second.cache().is_empty().await);
}

#[tokio::test]
async fn shared_cache_serves_both_arbiters() {
    let cache = Arc::new(PermissionCache::new());
    let first = PermissionArbiter::with_cache(
        RiskTable::default(),
        RiskLevel::Low,
        Duration::from_secs(30),
        Arc::clone(&cache),
    );
    let second = PermissionArbiter::with_cache(
        RiskTable::default(),
        RiskLevel::Low,
        Duration::from_millis(50),
        Arc::clone(&cache),
    );
    let (tx, rx) = mpsc::channel(4);
    let responder = answer_with(&first, rx, PermissionOption::AllowAll);

    first
        .request_permission("s1", &first.operation("git_commit"), &tx)
        .await;
    let (tx2, _rx2) = mpsc::channel(4);
    let decision = second
        .request_permission("s2", &Operation::new("git_commit", RiskLevel::Medium), &tx2)
        .await;

    assert!(decision.cached);
    drop(tx);
    responder.await.expect("join");
}

#[tokio::test]
async fn cache_ignores_single_use_decisions() {
    let cache = PermissionCache::new();
    assert!(
        !cache
            .store("file_write", PermissionDecision::from_option(PermissionOption::Allow))
            .await
    );
    assert!(
        cache
            .store("file_write", PermissionDecision::from_option(PermissionOption::AllowAll))
            .await
    );
    assert_eq!(cache.len().await, 1);

    cache.clear().await;
    assert!(cache.get("file_write").await.is_none());
}
