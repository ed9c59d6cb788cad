//! Agent subprocess lifecycle.
//!
//! - `spawner`: launches one agent process with an isolated environment.
//! - `supervisor`: owns the process for a session, pipes its I/O, detects
//!   readiness and restarts it with exponential backoff after unexpected exits.

pub mod spawner;
pub mod supervisor;

use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

pub use spawner::SpawnConfig;
pub use supervisor::{ProcessHandle, ProcessSupervisor};

/// Lifecycle status of a supervised agent process.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    /// Launched; waiting for the idle marker or the readiness timeout.
    Starting,
    /// Live and waiting for input.
    Ready,
    /// Live and working on a command.
    Busy,
    /// Restart attempts exhausted; permanent.
    Crashed,
    /// Stopped on request; permanent.
    Stopped,
}

impl ProcessStatus {
    /// Whether the process accepts commands on stdin.
    #[must_use]
    pub fn accepts_commands(self) -> bool {
        matches!(self, Self::Ready | Self::Busy)
    }

    /// Whether the status can never change again.
    #[must_use]
    pub fn is_final(self) -> bool {
        matches!(self, Self::Crashed | Self::Stopped)
    }
}

/// Events a supervisor delivers to its session's processing loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// Raw bytes read from the agent's stdout, in arrival order.
    Output(Bytes),
    /// The readiness timeout elapsed without an idle marker.
    Ready,
    /// The process exited unexpectedly and will be relaunched after `delay`.
    Restarting {
        /// 1-based restart attempt.
        attempt: u32,
        /// Backoff before the relaunch.
        delay: Duration,
        /// Why the previous process ended.
        reason: String,
    },
    /// Restart attempts are exhausted; the handle is permanently `Crashed`.
    Crashed {
        /// Why the last process ended.
        reason: String,
        /// Restarts performed before giving up.
        restarts: u32,
    },
}
