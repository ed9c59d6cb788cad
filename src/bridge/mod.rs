//! Protocol bridge between the host and the per-session agent processes.
//!
//! [`Bridge`] implements the inbound host operations. Each session gets one
//! supervised agent process and one [`worker::SessionWorker`]; outbound
//! notifications from every session share the single `outbound` channel
//! handed to [`Bridge::new`], tagged with their session id.

pub mod references;
pub(crate) mod worker;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock as StdRwLock};

use serde_json::{json, Value};
use tokio::sync::{mpsc, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::classifier::OutputClassifier;
use crate::config::BridgeConfig;
use crate::models::notification::Notification;
use crate::models::operation::PermissionOption;
use crate::models::session::{Session, SessionState};
use crate::permission::PermissionArbiter;
use crate::process::{ProcessHandle, ProcessStatus, ProcessSupervisor, SpawnConfig};
use crate::registry::SessionRegistry;
use crate::{AppError, Result};

use self::references::ReferenceExpander;
use self::worker::SessionWorker;

/// Capacity of the per-session process event channel.
const PROCESS_EVENT_DEPTH: usize = 256;

/// Live resources of one session.
struct SessionRuntime {
    handle: ProcessHandle,
    prompts: mpsc::UnboundedSender<String>,
    cancel: Arc<Notify>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

/// Host-facing facade over sessions, agent processes and permissions.
pub struct Bridge {
    config: Arc<BridgeConfig>,
    registry: SessionRegistry,
    arbiter: PermissionArbiter,
    supervisor: ProcessSupervisor,
    references: ReferenceExpander,
    runtimes: RwLock<HashMap<String, SessionRuntime>>,
    outbound: mpsc::Sender<Notification>,
    credential: StdRwLock<Option<String>>,
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("registry", &self.registry)
            .field("arbiter", &self.arbiter)
            .finish_non_exhaustive()
    }
}

impl Bridge {
    /// Build a bridge whose notifications are delivered to `outbound`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the reference pattern cannot be compiled.
    pub fn new(config: Arc<BridgeConfig>, outbound: mpsc::Sender<Notification>) -> Result<Self> {
        let arbiter = PermissionArbiter::from_config(&config.permissions);
        Self::with_arbiter(config, arbiter, outbound)
    }

    /// Build a bridge around an explicitly constructed arbiter.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the reference pattern cannot be compiled.
    pub fn with_arbiter(
        config: Arc<BridgeConfig>,
        arbiter: PermissionArbiter,
        outbound: mpsc::Sender<Notification>,
    ) -> Result<Self> {
        Ok(Self {
            supervisor: ProcessSupervisor::from_config(&config),
            references: ReferenceExpander::new()?,
            registry: SessionRegistry::new(),
            runtimes: RwLock::new(HashMap::new()),
            credential: StdRwLock::new(None),
            config,
            arbiter,
            outbound,
        })
    }

    /// Session registry (read access for status queries and tests).
    #[must_use]
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Permission arbiter shared by every session.
    #[must_use]
    pub fn arbiter(&self) -> &PermissionArbiter {
        &self.arbiter
    }

    /// Capability descriptor returned from `initialize`.
    #[must_use]
    pub fn initialize(&self) -> Value {
        json!({
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "authRequired": self.config.auth.required,
            "capabilities": {
                "session": { "cancel": true, "remove": true },
                "prompt": { "references": ["file", "path"] },
                "permissions": {
                    "options": PermissionOption::ALL,
                    "autoApproveThreshold": self.config.permissions.auto_approve_threshold,
                },
            },
        })
    }

    /// Store the credential handed to agents spawned from now on.
    ///
    /// # Errors
    ///
    /// Returns `AppError::AuthenticationFailed` if the credential is blank.
    pub fn authenticate(&self, credential: &str) -> Result<()> {
        let credential = credential.trim();
        if credential.is_empty() {
            warn!("authentication rejected: empty credential");
            return Err(AppError::AuthenticationFailed(
                "credential must not be empty".into(),
            ));
        }

        *self
            .credential
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(credential.to_owned());
        info!("credential accepted");
        Ok(())
    }

    /// Whether a credential has been supplied.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.credential
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Create a session and start its agent process.
    ///
    /// # Errors
    ///
    /// - `AppError::AuthenticationFailed` if authentication is required and missing.
    /// - `AppError::InvalidRequest` if no usable working directory was given.
    /// - `AppError::PathViolation` if an open file lies outside the working directory.
    /// - `AppError::ProcessUnavailable` if the agent cannot be started; no
    ///   session is left behind.
    pub async fn new_session(
        &self,
        working_directory: Option<PathBuf>,
        open_files: &[PathBuf],
    ) -> Result<Session> {
        if self.config.auth.required && !self.is_authenticated() {
            return Err(AppError::AuthenticationFailed(
                "authenticate before creating sessions".into(),
            ));
        }

        let working_directory = working_directory
            .or_else(|| self.config.default_workspace_root.clone())
            .ok_or_else(|| {
                AppError::InvalidRequest(
                    "workingDirectory is required when no default workspace is configured".into(),
                )
            })?;

        let session = self.registry.create(&working_directory, open_files).await?;
        let spawn = self.spawn_config(&session);
        let (event_tx, event_rx) = mpsc::channel(PROCESS_EVENT_DEPTH);

        let handle = match self.supervisor.spawn(&session.id, spawn, event_tx) {
            Ok(handle) => handle,
            Err(err) => {
                warn!(session_id = %session.id, %err, "agent unavailable, discarding session");
                let _ = self.registry.remove(&session.id).await;
                return Err(err);
            }
        };

        let writer = self.registry.writer(&session.id).await?;
        let (prompt_tx, prompt_rx) = mpsc::unbounded_channel();
        let cancel = Arc::new(Notify::new());
        let shutdown = CancellationToken::new();

        let worker = SessionWorker {
            writer,
            handle: handle.clone(),
            classifier: OutputClassifier::new(self.config.markers.clone()),
            arbiter: self.arbiter.clone(),
            cancel_token: self.config.markers.cancel.clone(),
            events: event_rx,
            prompts: prompt_rx,
            cancel: Arc::clone(&cancel),
            shutdown: shutdown.clone(),
            outbound: self.outbound.clone(),
        };
        let span = info_span!("session", session_id = %session.id);
        let task = tokio::spawn(worker.run().instrument(span));

        self.runtimes.write().await.insert(
            session.id.clone(),
            SessionRuntime {
                handle,
                prompts: prompt_tx,
                cancel,
                shutdown,
                task,
            },
        );

        Ok(session)
    }

    /// Queue `text` for the session's agent after expanding inline references.
    ///
    /// Prompts submitted while the session is busy wait their turn.
    ///
    /// # Errors
    ///
    /// - `AppError::SessionNotFound` if the session does not exist.
    /// - `AppError::ProcessCrash` if the session is `Errored`.
    /// - `AppError::InvalidRequest` if `text` is blank.
    pub async fn prompt(&self, session_id: &str, text: &str) -> Result<()> {
        let session = self.registry.get(session_id).await?;
        if session.state.is_terminal() {
            return Err(AppError::ProcessCrash(format!(
                "session '{session_id}' is errored and accepts no further prompts"
            )));
        }
        if text.trim().is_empty() {
            return Err(AppError::InvalidRequest("prompt text is empty".into()));
        }

        let expanded = self.references.expand(&session.working_directory, text);

        let runtimes = self.runtimes.read().await;
        let runtime = runtimes
            .get(session_id)
            .ok_or_else(|| AppError::SessionNotFound(session_id.to_owned()))?;
        runtime.prompts.send(expanded).map_err(|_| {
            AppError::Process(format!("session '{session_id}' is no longer processing prompts"))
        })?;

        info!(session_id, "prompt queued");
        Ok(())
    }

    /// Cancel the session's current logical unit.
    ///
    /// Sends the cancel token to the agent, drops buffered output and forces
    /// the session back to `Idle`.
    ///
    /// # Errors
    ///
    /// - `AppError::SessionNotFound` if the session does not exist.
    /// - `AppError::ProcessCrash` if the session is `Errored`.
    pub async fn cancel(&self, session_id: &str) -> Result<()> {
        let state = self.registry.state(session_id).await?;
        if state == SessionState::Errored {
            return Err(AppError::ProcessCrash(format!(
                "session '{session_id}' is errored"
            )));
        }

        let runtimes = self.runtimes.read().await;
        let runtime = runtimes
            .get(session_id)
            .ok_or_else(|| AppError::SessionNotFound(session_id.to_owned()))?;

        runtime.cancel.notify_one();
        if let Err(err) = runtime.handle.write(&self.config.markers.cancel).await {
            warn!(session_id, %err, "cancel token not delivered");
        }
        info!(session_id, "cancel requested");
        Ok(())
    }

    /// Stop the session's agent and forget the session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::SessionNotFound` if the session does not exist.
    pub async fn remove_session(&self, session_id: &str) -> Result<Session> {
        let runtime = self.runtimes.write().await.remove(session_id);
        if let Some(runtime) = runtime {
            shutdown_runtime(session_id, runtime).await;
        }
        self.registry.remove(session_id).await
    }

    /// Deliver the host's answer to a pending permission request.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no request with that id is waiting.
    pub fn permission_response(&self, request_id: &str, option: PermissionOption) -> Result<()> {
        self.arbiter.resolve(request_id, option)
    }

    /// Status of the session's agent process.
    ///
    /// # Errors
    ///
    /// Returns `AppError::SessionNotFound` if the session does not exist.
    pub async fn process_status(&self, session_id: &str) -> Result<ProcessStatus> {
        self.runtimes
            .read()
            .await
            .get(session_id)
            .map(|runtime| runtime.handle.status())
            .ok_or_else(|| AppError::SessionNotFound(session_id.to_owned()))
    }

    /// Stop every session.
    pub async fn shutdown(&self) {
        let runtimes: Vec<(String, SessionRuntime)> =
            self.runtimes.write().await.drain().collect();
        for (session_id, runtime) in runtimes {
            shutdown_runtime(&session_id, runtime).await;
            let _ = self.registry.remove(&session_id).await;
        }
        info!("bridge shut down");
    }

    fn spawn_config(&self, session: &Session) -> SpawnConfig {
        let mut env = self.config.agent.env.clone();
        if let Some(credential) = self
            .credential
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            env.insert(self.config.auth.env_var.clone(), credential);
        }

        SpawnConfig {
            executable: self.config.agent.executable.clone(),
            args: self.config.agent.args.clone(),
            env,
            working_directory: session.working_directory.clone(),
        }
    }
}

async fn shutdown_runtime(session_id: &str, runtime: SessionRuntime) {
    runtime.shutdown.cancel();
    runtime.handle.stop().await;
    if let Err(err) = runtime.task.await {
        warn!(session_id, %err, "session worker ended abnormally");
    }
}
