//! In-memory session registry.
//!
//! Owns every live [`Session`]. Reads from anywhere return snapshots;
//! mutation goes through the single [`SessionWriter`] handed to the
//! session's own processing loop, so one session's events can never move
//! another session's state.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::models::message::Message;
use crate::models::session::{Session, SessionState, SessionTransition};
use crate::paths::{canonical_dir, resolve_within};
use crate::{AppError, Result};

struct Entry {
    session: Arc<RwLock<Session>>,
    writer_taken: AtomicBool,
}

/// Registry of live sessions keyed by id.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, Arc<Entry>>>>,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry").finish_non_exhaustive()
    }
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new idle session.
    ///
    /// `open_files` are resolved relative to the canonical working directory.
    ///
    /// # Errors
    ///
    /// - `AppError::InvalidRequest` if `working_directory` is missing or not a directory.
    /// - `AppError::PathViolation` if an open file lies outside it.
    pub async fn create(&self, working_directory: &Path, open_files: &[PathBuf]) -> Result<Session> {
        let root = canonical_dir(working_directory)?;
        let files = open_files
            .iter()
            .map(|file| resolve_within(&root, file))
            .collect::<Result<Vec<_>>>()?;

        let session = Session::new(root, files);
        let entry = Arc::new(Entry {
            session: Arc::new(RwLock::new(session.clone())),
            writer_taken: AtomicBool::new(false),
        });

        self.sessions
            .write()
            .await
            .insert(session.id.clone(), entry);

        info!(
            session_id = %session.id,
            working_directory = %session.working_directory.display(),
            "session created"
        );
        Ok(session)
    }

    /// Snapshot of the session with `id`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::SessionNotFound` if no such session is registered.
    pub async fn get(&self, id: &str) -> Result<Session> {
        let entry = self.entry(id).await?;
        let session = entry.session.read().await.clone();
        Ok(session)
    }

    /// Current state of the session with `id`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::SessionNotFound` if no such session is registered.
    pub async fn state(&self, id: &str) -> Result<SessionState> {
        let entry = self.entry(id).await?;
        let state = entry.session.read().await.state;
        Ok(state)
    }

    /// Snapshots of every registered session.
    pub async fn list(&self) -> Vec<Session> {
        let entries: Vec<Arc<Entry>> = self.sessions.read().await.values().cloned().collect();
        let mut sessions = Vec::with_capacity(entries.len());
        for entry in entries {
            sessions.push(entry.session.read().await.clone());
        }
        sessions
    }

    /// Number of registered sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether no sessions are registered.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Remove the session with `id`, returning its final snapshot.
    ///
    /// # Errors
    ///
    /// Returns `AppError::SessionNotFound` if no such session is registered.
    pub async fn remove(&self, id: &str) -> Result<Session> {
        let entry = self
            .sessions
            .write()
            .await
            .remove(id)
            .ok_or_else(|| AppError::SessionNotFound(id.to_owned()))?;
        let session = entry.session.read().await.clone();
        info!(session_id = id, "session removed");
        Ok(session)
    }

    /// Hand out the one mutating handle for session `id`.
    ///
    /// # Errors
    ///
    /// - `AppError::SessionNotFound` if no such session is registered.
    /// - `AppError::InvalidRequest` if the writer was already taken.
    pub async fn writer(&self, id: &str) -> Result<SessionWriter> {
        let entry = self.entry(id).await?;
        if entry.writer_taken.swap(true, Ordering::SeqCst) {
            return Err(AppError::InvalidRequest(format!(
                "session '{id}' already has a writer"
            )));
        }
        Ok(SessionWriter {
            id: id.to_owned(),
            session: Arc::clone(&entry.session),
        })
    }

    async fn entry(&self, id: &str) -> Result<Arc<Entry>> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::SessionNotFound(id.to_owned()))
    }
}

/// Exclusive mutating handle to one session.
#[derive(Debug)]
pub struct SessionWriter {
    id: String,
    session: Arc<RwLock<Session>>,
}

impl SessionWriter {
    /// Id of the session this writer mutates.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current state.
    pub async fn state(&self) -> SessionState {
        self.session.read().await.state
    }

    /// Apply `transition` to the session's state machine.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidTransition` if the table forbids it.
    pub async fn transition(&self, transition: SessionTransition) -> Result<SessionState> {
        let mut session = self.session.write().await;
        let from = session.state;
        let to = session.transition(transition)?;
        if from != to {
            debug!(session_id = %self.id, ?from, ?to, "session state changed");
        }
        Ok(to)
    }

    /// Append a history entry.
    pub async fn record(&self, message: Message) {
        self.session.write().await.record(message);
    }

    /// Mark `path` as the file the agent is working on.
    pub async fn touch_file(&self, path: PathBuf) {
        self.session.write().await.touch_file(path);
    }

    /// Working directory of the session.
    pub async fn working_directory(&self) -> PathBuf {
        self.session.read().await.working_directory.clone()
    }
}
