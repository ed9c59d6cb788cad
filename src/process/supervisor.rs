//! Per-session process supervision.
//!
//! [`ProcessSupervisor::spawn`] launches the first agent process (failing
//! fast with `ProcessUnavailable`) and hands the rest of its life to a
//! supervisory task that:
//!
//! - forwards raw stdout bytes to the session as [`ProcessEvent::Output`];
//! - drains the FIFO command queue into the agent's stdin;
//! - flips `Starting → Ready` when the readiness timeout elapses and the
//!   session has not already reported the idle marker;
//! - relaunches the agent after an unexpected exit with exponential backoff,
//!   up to the configured maximum, then marks the handle `Crashed`.
//!
//! Each session has its own supervisory task, so restarts and backoff
//! sleeps never block other sessions.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStderr, ChildStdout};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::codec::{BytesCodec, FramedRead};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::{BridgeConfig, RestartConfig};
use crate::process::spawner::{spawn_agent, AgentProcess, SpawnConfig};
use crate::process::{ProcessEvent, ProcessStatus};
use crate::{AppError, Result};

/// Capacity of the per-process command queue.
const COMMAND_QUEUE_DEPTH: usize = 64;

/// How long to wait for trailing stdout after the process exits.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Launches and supervises agent processes.
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    restart: RestartConfig,
    ready_timeout: Duration,
}

impl ProcessSupervisor {
    /// Create a supervisor with an explicit restart policy and readiness timeout.
    #[must_use]
    pub fn new(restart: RestartConfig, ready_timeout: Duration) -> Self {
        Self {
            restart,
            ready_timeout,
        }
    }

    /// Create a supervisor from the bridge configuration.
    #[must_use]
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(config.restart.clone(), config.ready_timeout())
    }

    /// Spawn the agent for `session_id` and start supervising it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ProcessUnavailable` if the first launch fails.
    /// Failures of later relaunches count against the restart budget instead.
    pub fn spawn(
        &self,
        session_id: &str,
        spawn: SpawnConfig,
        events: mpsc::Sender<ProcessEvent>,
    ) -> Result<ProcessHandle> {
        let process = spawn_agent(&spawn, session_id)?;

        let (status_tx, status_rx) = watch::channel(ProcessStatus::Starting);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let pid = Arc::new(AtomicU32::new(process.pid().unwrap_or(0)));
        let restarts = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let status_tx = Arc::new(status_tx);

        let ctx = SuperviseContext {
            session_id: session_id.to_owned(),
            spawn,
            restart: self.restart.clone(),
            ready_timeout: self.ready_timeout,
            status: Arc::clone(&status_tx),
            pid: Arc::clone(&pid),
            restarts: Arc::clone(&restarts),
            events,
            cancel: cancel.clone(),
        };

        let span = info_span!("supervise", session_id);
        tokio::spawn(supervise(process, ctx, command_rx).instrument(span));

        Ok(ProcessHandle {
            session_id: session_id.to_owned(),
            pid,
            restarts,
            status_tx,
            status_rx,
            commands: command_tx,
            cancel,
        })
    }
}

/// Shared handle to one supervised agent process.
///
/// Cheap to clone; every clone addresses the same process and command queue.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    session_id: String,
    pid: Arc<AtomicU32>,
    restarts: Arc<AtomicU32>,
    status_tx: Arc<watch::Sender<ProcessStatus>>,
    status_rx: watch::Receiver<ProcessStatus>,
    commands: mpsc::Sender<String>,
    cancel: CancellationToken,
}

impl ProcessHandle {
    /// OS process id of the current agent process, if any.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        match self.pid.load(Ordering::SeqCst) {
            0 => None,
            pid => Some(pid),
        }
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> ProcessStatus {
        *self.status_rx.borrow()
    }

    /// Restarts performed so far.
    #[must_use]
    pub fn restarts(&self) -> u32 {
        self.restarts.load(Ordering::SeqCst)
    }

    /// Enqueue `command` for the agent's stdin (a newline is appended).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Process` if the process is not live (`Starting`,
    /// `Crashed` or `Stopped`) or the queue has been closed.
    pub async fn write(&self, command: &str) -> Result<()> {
        let status = self.status();
        if !status.accepts_commands() {
            return Err(AppError::Process(format!(
                "agent for session '{}' is {status:?}, not ready for commands",
                self.session_id
            )));
        }

        self.commands.send(command.to_owned()).await.map_err(|_| {
            AppError::Process(format!(
                "command queue closed for session '{}'",
                self.session_id
            ))
        })
    }

    /// Mark the process `Busy` after a prompt was dispatched.
    pub fn mark_busy(&self) {
        self.status_tx.send_if_modified(|status| {
            if *status == ProcessStatus::Ready {
                *status = ProcessStatus::Busy;
                true
            } else {
                false
            }
        });
    }

    /// Report that the idle marker was seen: `Starting`/`Busy` become `Ready`.
    ///
    /// Returns `true` if the status changed.
    pub fn notify_idle(&self) -> bool {
        self.status_tx.send_if_modified(|status| {
            if matches!(*status, ProcessStatus::Starting | ProcessStatus::Busy) {
                *status = ProcessStatus::Ready;
                true
            } else {
                false
            }
        })
    }

    /// Wait until the process leaves `Starting`, returning the new status.
    pub async fn wait_ready(&self) -> ProcessStatus {
        let mut rx = self.status_rx.clone();
        let status = match rx.wait_for(|status| *status != ProcessStatus::Starting).await {
            Ok(status) => *status,
            Err(_) => self.status(),
        };
        status
    }

    /// Stop the process without triggering a restart.
    ///
    /// Idempotent; waits (bounded) for the supervisory task to acknowledge.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let mut rx = self.status_rx.clone();
        let waited = tokio::time::timeout(
            Duration::from_secs(5),
            rx.wait_for(|status| status.is_final()),
        )
        .await;
        if waited.is_err() {
            warn!(session_id = %self.session_id, "agent did not acknowledge stop in time");
        }
    }
}

struct SuperviseContext {
    session_id: String,
    spawn: SpawnConfig,
    restart: RestartConfig,
    ready_timeout: Duration,
    status: Arc<watch::Sender<ProcessStatus>>,
    pid: Arc<AtomicU32>,
    restarts: Arc<AtomicU32>,
    events: mpsc::Sender<ProcessEvent>,
    cancel: CancellationToken,
}

enum GenerationEnd {
    Stopped,
    Exited(String),
}

async fn supervise(
    first: AgentProcess,
    ctx: SuperviseContext,
    mut commands: mpsc::Receiver<String>,
) {
    let mut process = first;
    let mut attempts: u32 = 0;

    'generations: loop {
        let mut reason = match run_generation(process, &ctx, &mut commands).await {
            GenerationEnd::Stopped => break 'generations,
            GenerationEnd::Exited(reason) => reason,
        };
        ctx.pid.store(0, Ordering::SeqCst);

        // Relaunch until one succeeds or the budget runs out.
        loop {
            attempts += 1;
            if attempts > ctx.restart.max_attempts {
                let restarts = attempts - 1;
                warn!(
                    session_id = %ctx.session_id,
                    restarts,
                    %reason,
                    "restart attempts exhausted, marking crashed"
                );
                ctx.status.send_replace(ProcessStatus::Crashed);
                let _ = ctx
                    .events
                    .send(ProcessEvent::Crashed { reason, restarts })
                    .await;
                return;
            }

            let delay = ctx.restart.backoff_for(attempts);
            info!(
                session_id = %ctx.session_id,
                attempt = attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                %reason,
                "agent exited unexpectedly, restarting"
            );
            ctx.status.send_replace(ProcessStatus::Starting);
            let _ = ctx
                .events
                .send(ProcessEvent::Restarting {
                    attempt: attempts,
                    delay,
                    reason: reason.clone(),
                })
                .await;

            tokio::select! {
                () = ctx.cancel.cancelled() => break 'generations,
                () = tokio::time::sleep(delay) => {}
            }

            ctx.restarts.store(attempts, Ordering::SeqCst);
            match spawn_agent(&ctx.spawn, &ctx.session_id) {
                Ok(next) => {
                    ctx.pid.store(next.pid().unwrap_or(0), Ordering::SeqCst);
                    process = next;
                    continue 'generations;
                }
                Err(err) => {
                    warn!(session_id = %ctx.session_id, %err, "relaunch failed");
                    reason = err.to_string();
                }
            }
        }
    }

    ctx.pid.store(0, Ordering::SeqCst);
    ctx.status.send_replace(ProcessStatus::Stopped);
    info!(session_id = %ctx.session_id, "agent process stopped");
}

async fn run_generation(
    process: AgentProcess,
    ctx: &SuperviseContext,
    commands: &mut mpsc::Receiver<String>,
) -> GenerationEnd {
    let AgentProcess {
        mut child,
        mut stdin,
        stdout,
        stderr,
    } = process;

    let reader = tokio::spawn(forward_output(
        ctx.session_id.clone(),
        stdout,
        ctx.events.clone(),
    ));
    if let Some(stderr) = stderr {
        drop(log_stderr(ctx.session_id.clone(), stderr));
    }

    let ready_deadline = tokio::time::sleep(ctx.ready_timeout);
    tokio::pin!(ready_deadline);
    let mut awaiting_ready = true;

    loop {
        tokio::select! {
            biased;

            () = ctx.cancel.cancelled() => {
                debug!(session_id = %ctx.session_id, "stop requested, killing agent");
                if let Err(err) = child.kill().await {
                    warn!(session_id = %ctx.session_id, %err, "failed to kill agent");
                }
                reader.abort();
                return GenerationEnd::Stopped;
            }

            result = child.wait() => {
                let reason = match result {
                    Ok(status) => status.code().map_or_else(
                        || "process terminated by signal".to_owned(),
                        |c| format!("process exited with code {c}"),
                    ),
                    Err(err) => format!("wait error: {err}"),
                };
                // Let trailing output reach the session before the restart notice.
                let abort = reader.abort_handle();
                if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, reader).await.is_err() {
                    debug!(session_id = %ctx.session_id, "stdout still open after exit, dropping forwarder");
                    abort.abort();
                }
                return GenerationEnd::Exited(reason);
            }

            command = commands.recv() => {
                let Some(command) = command else {
                    // Every handle is gone; nobody can talk to this agent anymore.
                    let _ = child.kill().await;
                    reader.abort();
                    return GenerationEnd::Stopped;
                };
                let mut bytes = command.into_bytes();
                bytes.push(b'\n');
                let written = async {
                    stdin.write_all(&bytes).await?;
                    stdin.flush().await
                }
                .await;
                if let Err(err) = written {
                    // The exit branch reports the crash.
                    warn!(session_id = %ctx.session_id, %err, "write to agent stdin failed");
                }
            }

            () = &mut ready_deadline, if awaiting_ready => {
                awaiting_ready = false;
                let promoted = ctx.status.send_if_modified(|status| {
                    if *status == ProcessStatus::Starting {
                        *status = ProcessStatus::Ready;
                        true
                    } else {
                        false
                    }
                });
                if promoted {
                    debug!(session_id = %ctx.session_id, "readiness timeout elapsed, assuming ready");
                    let _ = ctx.events.send(ProcessEvent::Ready).await;
                }
            }
        }
    }
}

async fn forward_output(
    session_id: String,
    stdout: ChildStdout,
    events: mpsc::Sender<ProcessEvent>,
) {
    let mut framed = FramedRead::new(stdout, BytesCodec::new());

    while let Some(chunk) = framed.next().await {
        match chunk {
            Ok(bytes) => {
                if events.send(ProcessEvent::Output(bytes.freeze())).await.is_err() {
                    debug!(session_id, "session loop gone, stopping output forwarder");
                    return;
                }
            }
            Err(err) => {
                warn!(session_id, %err, "agent stdout read failed");
                return;
            }
        }
    }

    debug!(session_id, "agent stdout closed");
}

fn log_stderr(session_id: String, stderr: ChildStderr) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(session_id, stderr = %line, "agent stderr");
        }
    })
}
