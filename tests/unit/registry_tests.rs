//! Session registry: creation, lookup, removal and the single-writer rule.

use std::path::PathBuf;

use agent_bridge::models::event::ParserState;
use agent_bridge::models::message::{Message, Role};
use agent_bridge::models::session::{SessionState, SessionTransition};
use agent_bridge::registry::SessionRegistry;
use agent_bridge::AppError;

#[tokio::test]
async fn create_canonicalizes_and_resolves_open_files() {
    let temp = tempfile::tempdir().expect("tempdir");
    std::fs::write(temp.path().join("main.rs"), "fn main() {}").expect("write");
    let registry = SessionRegistry::new();

    let session = registry
        .create(temp.path(), &[PathBuf::from("main.rs")])
        .await
        .expect("create");

    let root = temp.path().canonicalize().expect("canonical");
    assert_eq!(session.working_directory, root);
    assert_eq!(session.open_files, vec![root.join("main.rs")]);
    assert_eq!(session.state, SessionState::Idle);
    assert_eq!(registry.len().await, 1);
}

#[tokio::test]
async fn create_rejects_missing_directory() {
    let registry = SessionRegistry::new();
    let err = registry
        .create(std::path::Path::new("/no/such/dir"), &[])
        .await
        .expect_err("must fail");
    assert!(matches!(err, AppError::InvalidRequest(_)));
    assert!(registry.is_empty().await);
}

#[tokio::test]
async fn create_rejects_file_as_working_directory() {
    let temp = tempfile::tempdir().expect("tempdir");
    let file = temp.path().join("plain.txt");
    std::fs::write(&file, "x").expect("write");

    let err = SessionRegistry::new()
        .create(&file, &[])
        .await
        .expect_err("must fail");
    assert!(matches!(err, AppError::InvalidRequest(_)));
}

#[tokio::test]
async fn create_rejects_open_file_outside_root() {
    let temp = tempfile::tempdir().expect("tempdir");
    let err = SessionRegistry::new()
        .create(temp.path(), &[PathBuf::from("../escape.rs")])
        .await
        .expect_err("must fail");
    assert!(matches!(err, AppError::PathViolation(_)));
}

#[tokio::test]
async fn get_unknown_session_fails() {
    let err = SessionRegistry::new().get("missing").await.expect_err("must fail");
    assert_eq!(err, AppError::SessionNotFound("missing".into()));
}

#[tokio::test]
async fn remove_forgets_session() {
    let temp = tempfile::tempdir().expect("tempdir");
    let registry = SessionRegistry::new();
    let session = registry.create(temp.path(), &[]).await.expect("create");

    let removed = registry.remove(&session.id).await.expect("remove");
    assert_eq!(removed.id, session.id);
    assert!(matches!(
        registry.get(&session.id).await,
        Err(AppError::SessionNotFound(_))
    ));
    assert!(matches!(
        registry.remove(&session.id).await,
        Err(AppError::SessionNotFound(_))
    ));
}

#[tokio::test]
async fn writer_can_be_taken_once() {
    let temp = tempfile::tempdir().expect("tempdir");
    let registry = SessionRegistry::new();
    let session = registry.create(temp.path(), &[]).await.expect("create");

    let _writer = registry.writer(&session.id).await.expect("first writer");
    assert!(matches!(
        registry.writer(&session.id).await,
        Err(AppError::InvalidRequest(_))
    ));
}

#[tokio::test]
async fn writer_mutations_are_visible_to_readers() {
    let temp = tempfile::tempdir().expect("tempdir");
    let registry = SessionRegistry::new();
    let session = registry.create(temp.path(), &[]).await.expect("create");
    let writer = registry.writer(&session.id).await.expect("writer");

    writer
        .transition(SessionTransition::Flow(ParserState::CodeGeneration))
        .await
        .expect("transition");
    writer.record(Message::new(Role::Agent, "hello")).await;
    writer.touch_file(session.working_directory.join("lib.rs")).await;

    assert_eq!(
        registry.state(&session.id).await.expect("state"),
        SessionState::CodeGeneration
    );
    let snapshot = registry.get(&session.id).await.expect("get");
    assert_eq!(snapshot.history.len(), 1);
    assert_eq!(
        snapshot.active_file,
        Some(session.working_directory.join("lib.rs"))
    );
}

#[tokio::test]
async fn sessions_are_independent() {
    let temp = tempfile::tempdir().expect("tempdir");
    let registry = SessionRegistry::new();
    let a = registry.create(temp.path(), &[]).await.expect("a");
    let b = registry.create(temp.path(), &[]).await.expect("b");
    assert_ne!(a.id, b.id);

    let writer_a = registry.writer(&a.id).await.expect("writer a");
    writer_a
        .transition(SessionTransition::ProcessExhausted)
        .await
        .expect("exhaust");

    assert_eq!(registry.state(&a.id).await.expect("a"), SessionState::Errored);
    assert_eq!(registry.state(&b.id).await.expect("b"), SessionState::Idle);
    assert_eq!(registry.list().await.len(), 2);
}
