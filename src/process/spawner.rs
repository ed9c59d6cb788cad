//! Agent process spawner.
//!
//! Spawns headless agent processes with:
//! - `kill_on_drop(true)` so processes are cleaned up automatically.
//! - `env_clear()` + a safe variable allowlist so the bridge's own
//!   environment never leaks into the child; configured variables and the
//!   host's credential are injected explicitly.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::info;

use crate::{AppError, Result};

/// Environment variables inherited by the spawned agent process.
pub const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "LANG",
    "TERM",
    "RUST_LOG",
    // Windows-specific variables.
    "USERPROFILE",
    "SystemRoot",
    "TEMP",
    "TMP",
    "USERNAME",
    "APPDATA",
    "LOCALAPPDATA",
    "COMSPEC",
];

/// Variable carrying the owning session id into the agent process.
pub const SESSION_ENV_VAR: &str = "AGENT_BRIDGE_SESSION_ID";

/// Configuration for spawning an agent process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnConfig {
    /// Agent executable.
    pub executable: String,
    /// Arguments passed to the executable.
    pub args: Vec<String>,
    /// Extra variables set on top of the allowlist.
    pub env: HashMap<String, String>,
    /// Directory the process starts in.
    pub working_directory: PathBuf,
}

/// Piped stdio of a freshly spawned agent process.
#[derive(Debug)]
pub struct AgentProcess {
    /// Child process handle; kept alive so `kill_on_drop` works.
    pub child: Child,
    /// Agent's stdin for command text.
    pub stdin: ChildStdin,
    /// Agent's stdout carrying the classified text stream.
    pub stdout: ChildStdout,
    /// Agent's stderr, logged and otherwise ignored.
    pub stderr: Option<ChildStderr>,
}

impl AgentProcess {
    /// OS process id, if the process is still running.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }
}

/// Spawn an agent process for `session_id`.
///
/// # Errors
///
/// Returns `AppError::ProcessUnavailable` if the executable is missing, the
/// OS refused to start it, or its stdio pipes could not be attached.
pub fn spawn_agent(config: &SpawnConfig, session_id: &str) -> Result<AgentProcess> {
    let mut cmd = Command::new(&config.executable);
    cmd.args(&config.args);

    // Strip inherited environment, then inject only the safe allowlist.
    cmd.env_clear();
    for &key in ALLOWED_ENV_VARS {
        if let Ok(val) = std::env::var(key) {
            cmd.env(key, val);
        }
    }
    cmd.envs(&config.env);
    cmd.env(SESSION_ENV_VAR, session_id);

    cmd.current_dir(&config.working_directory)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|err| {
        AppError::ProcessUnavailable(format!(
            "failed to spawn agent '{}': {err}",
            config.executable
        ))
    })?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::ProcessUnavailable("failed to capture agent stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::ProcessUnavailable("failed to capture agent stdout".into()))?;
    let stderr = child.stderr.take();

    info!(
        session_id,
        pid = child.id(),
        executable = %config.executable,
        "agent process spawned"
    );

    Ok(AgentProcess {
        child,
        stdin,
        stdout,
        stderr,
    })
}
