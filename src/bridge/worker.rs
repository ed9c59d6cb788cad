//! Per-session processing loop.
//!
//! One [`SessionWorker`] runs for every live session. It is the only
//! consumer of the session's process events, the only owner of its
//! [`OutputClassifier`] and the only holder of its [`SessionWriter`], so
//! notifications for a session leave in exactly the order the agent wrote
//! them.
//!
//! While a permission request is outstanding the worker stops reading
//! process output for its session; other sessions are unaffected. Prompts
//! queue up and are dispatched one at a time whenever the session is
//! `Idle` and the agent is `Ready`.

use std::ops::ControlFlow;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::classifier::OutputClassifier;
use crate::models::event::ParseEvent;
use crate::models::message::{Message, Role};
use crate::models::notification::Notification;
use crate::models::operation::Operation;
use crate::models::session::{SessionState, SessionTransition};
use crate::paths::resolve_within;
use crate::permission::PermissionArbiter;
use crate::process::{ProcessEvent, ProcessHandle, ProcessStatus};
use crate::registry::SessionWriter;
use crate::AppError;

/// Operation type raised by a file-update line.
pub const FILE_WRITE_OPERATION: &str = "file_write";

/// Everything a worker needs; assembled by the bridge when a session starts.
pub(crate) struct SessionWorker {
    pub(crate) writer: SessionWriter,
    pub(crate) handle: ProcessHandle,
    pub(crate) classifier: OutputClassifier,
    pub(crate) arbiter: PermissionArbiter,
    pub(crate) cancel_token: String,
    pub(crate) events: mpsc::Receiver<ProcessEvent>,
    pub(crate) prompts: mpsc::UnboundedReceiver<String>,
    pub(crate) cancel: Arc<Notify>,
    pub(crate) shutdown: CancellationToken,
    pub(crate) outbound: mpsc::Sender<Notification>,
}

impl SessionWorker {
    /// Drive the session until it is removed, its process is gone, or it errors.
    pub(crate) async fn run(mut self) {
        info!(session_id = %self.writer.id(), "session worker started");

        loop {
            let dispatchable = self.writer.state().await == SessionState::Idle
                && self.handle.status() == ProcessStatus::Ready;

            tokio::select! {
                biased;

                () = self.shutdown.cancelled() => break,

                () = self.cancel.notified() => self.on_cancel().await,

                event = self.events.recv() => {
                    let Some(event) = event else {
                        debug!(session_id = %self.writer.id(), "process event channel closed");
                        break;
                    };
                    if self.on_process_event(event).await.is_break() {
                        break;
                    }
                }

                prompt = self.prompts.recv(), if dispatchable => {
                    let Some(prompt) = prompt else { break };
                    self.dispatch(prompt).await;
                }
            }
        }

        info!(session_id = %self.writer.id(), "session worker stopped");
    }

    async fn on_process_event(&mut self, event: ProcessEvent) -> ControlFlow<()> {
        match event {
            ProcessEvent::Output(bytes) => {
                let events = self.classifier.feed(&bytes);
                self.handle_events(events).await;
            }
            ProcessEvent::Ready => {
                debug!(session_id = %self.writer.id(), "agent ready");
            }
            ProcessEvent::Restarting {
                attempt,
                delay,
                reason,
            } => {
                self.classifier.reset();
                self.force_idle().await;
                self.emit(Notification::lifecycle(
                    self.writer.id(),
                    "restarting",
                    json!({
                        "attempt": attempt,
                        "delayMs": u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "reason": reason,
                    }),
                ))
                .await;
            }
            ProcessEvent::Crashed { reason, restarts } => {
                self.classifier.reset();
                self.apply(SessionTransition::ProcessExhausted).await;
                let err = AppError::ProcessCrash(format!(
                    "agent exited after {restarts} restarts: {reason}"
                ));
                warn!(session_id = %self.writer.id(), %err, "session errored");
                self.emit(Notification::lifecycle(
                    self.writer.id(),
                    "errored",
                    json!({
                        "code": err.code(),
                        "message": err.to_string(),
                        "remediation": err.remediation(),
                    }),
                ))
                .await;
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    async fn handle_events(&mut self, events: Vec<ParseEvent>) {
        for event in events {
            if self.handle_event(event).await.is_break() {
                // Denied or cancelled: the rest of the batch belongs to the aborted unit.
                return;
            }
        }
        self.sync_flow().await;
    }

    async fn handle_event(&mut self, event: ParseEvent) -> ControlFlow<()> {
        if let Some(next) = event.next_flow() {
            self.apply(SessionTransition::Flow(next)).await;
        }

        if let Some(operation) = self.risky_operation(&event) {
            self.arbitrate(&operation).await?;
        }

        match &event {
            ParseEvent::FileUpdate(path) => {
                let root = self.writer.working_directory().await;
                match resolve_within(&root, path) {
                    Ok(resolved) => self.writer.touch_file(resolved).await,
                    Err(err) => warn!(session_id = %self.writer.id(), %err, "not tracking file"),
                }
            }
            ParseEvent::Chunk(text) => {
                self.writer.record(Message::new(Role::Agent, text.clone())).await;
            }
            ParseEvent::Complete => {
                self.apply(SessionTransition::Complete).await;
                self.handle.notify_idle();
            }
            ParseEvent::ParseError(reason) => {
                debug!(session_id = %self.writer.id(), reason, "classifier recovered");
            }
            _ => {}
        }

        self.emit(Notification::from_event(self.writer.id(), &event)).await;
        ControlFlow::Continue(())
    }

    /// Hold the session in `WaitingForPermission` until the arbiter decides.
    async fn arbitrate(&mut self, operation: &Operation) -> ControlFlow<()> {
        self.apply(SessionTransition::PermissionRequested).await;

        let decision = tokio::select! {
            biased;
            // Dropping the request future withdraws the pending entry.
            () = self.shutdown.cancelled() => {
                debug!(session_id = %self.writer.id(), op_type = %operation.op_type, "shutdown while awaiting permission");
                return ControlFlow::Break(());
            }
            () = self.cancel.notified() => {
                self.on_cancel().await;
                return ControlFlow::Break(());
            }
            decision = self.arbiter.request_permission(self.writer.id(), operation, &self.outbound) => decision,
        };

        self.apply(SessionTransition::PermissionResolved {
            granted: decision.granted,
        })
        .await;

        if decision.granted {
            return ControlFlow::Continue(());
        }

        let err = AppError::PermissionDenied(format!("{} was not allowed", operation.op_type));
        info!(session_id = %self.writer.id(), op_type = %operation.op_type, "operation denied, cancelling");
        self.send_cancel().await;
        self.classifier.reset();
        self.emit(Notification::lifecycle(
            self.writer.id(),
            "permission_denied",
            json!({
                "operation": operation,
                "code": err.code(),
                "message": err.to_string(),
            }),
        ))
        .await;
        ControlFlow::Break(())
    }

    fn risky_operation(&self, event: &ParseEvent) -> Option<Operation> {
        match event {
            ParseEvent::FileUpdate(path) => Some(
                self.arbiter
                    .operation(FILE_WRITE_OPERATION)
                    .with_detail("path", path.clone()),
            ),
            ParseEvent::ToolCallStart { name, args } if self.arbiter.risk_table().contains(name) => {
                Some(self.arbiter.operation(name).with_detail("args", args.clone()))
            }
            _ => None,
        }
    }

    async fn on_cancel(&mut self) {
        info!(session_id = %self.writer.id(), "cancelling current unit");
        self.classifier.reset();
        self.force_idle().await;
        self.emit(Notification::lifecycle(self.writer.id(), "cancelled", json!({})))
            .await;
    }

    async fn dispatch(&mut self, prompt: String) {
        match self.handle.write(&prompt).await {
            Ok(()) => {
                self.handle.mark_busy();
                debug!(session_id = %self.writer.id(), bytes = prompt.len(), "prompt dispatched");
                self.writer.record(Message::new(Role::User, prompt)).await;
            }
            Err(err) => {
                warn!(session_id = %self.writer.id(), %err, "prompt dispatch failed");
                self.emit(Notification::lifecycle(
                    self.writer.id(),
                    "prompt_failed",
                    json!({ "code": err.code(), "message": err.to_string() }),
                ))
                .await;
            }
        }
    }

    async fn send_cancel(&self) {
        if let Err(err) = self.handle.write(&self.cancel_token).await {
            warn!(session_id = %self.writer.id(), %err, "failed to send cancel token");
        }
    }

    /// Bring the session state in line with the classifier after a batch.
    async fn sync_flow(&mut self) {
        let flow = self.classifier.state();
        let state = self.writer.state().await;
        if state.flow().is_some_and(|current| current != flow) {
            self.apply(SessionTransition::Flow(flow)).await;
        }
    }

    async fn force_idle(&mut self) {
        let state = self.writer.state().await;
        if state != SessionState::Idle && !state.is_terminal() {
            self.apply(SessionTransition::Cancel).await;
        }
    }

    async fn apply(&self, transition: SessionTransition) {
        if let Err(err) = self.writer.transition(transition).await {
            warn!(session_id = %self.writer.id(), %err, "session transition rejected");
        }
    }

    async fn emit(&self, notification: Notification) {
        if self.outbound.send(notification).await.is_err() {
            debug!(session_id = %self.writer.id(), "host channel closed, dropping notification");
        }
    }
}
