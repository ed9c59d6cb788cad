//! Session model and lifecycle helpers.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::event::ParserState;
use crate::models::message::Message;
use crate::{AppError, Result};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionState {
    /// No logical unit in progress.
    Idle,
    /// The agent is planning.
    Thinking,
    /// The agent is emitting a code block.
    CodeGeneration,
    /// The agent is running a tool.
    ToolExecution,
    /// A risky operation awaits the host's decision.
    WaitingForPermission {
        /// Flow state restored if the operation is granted.
        resume: ParserState,
    },
    /// The agent process is gone for good; terminal.
    Errored,
}

/// Input to the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTransition {
    /// The session's classifier moved to a new state.
    Flow(ParserState),
    /// The agent finished its turn.
    Complete,
    /// A risky operation needs the host's decision.
    PermissionRequested,
    /// The host (or the timeout) decided.
    PermissionResolved {
        /// Whether the operation may proceed.
        granted: bool,
    },
    /// The host cancelled the current work.
    Cancel,
    /// The agent process exhausted its restart budget.
    ProcessExhausted,
}

impl From<ParserState> for SessionState {
    fn from(state: ParserState) -> Self {
        match state {
            ParserState::Idle => Self::Idle,
            ParserState::Thinking => Self::Thinking,
            ParserState::CodeGeneration => Self::CodeGeneration,
            ParserState::ToolExecution => Self::ToolExecution,
        }
    }
}

impl SessionState {
    /// Flow state equivalent, or `None` when waiting or errored.
    #[must_use]
    pub fn flow(self) -> Option<ParserState> {
        match self {
            Self::Idle => Some(ParserState::Idle),
            Self::Thinking => Some(ParserState::Thinking),
            Self::CodeGeneration => Some(ParserState::CodeGeneration),
            Self::ToolExecution => Some(ParserState::ToolExecution),
            Self::WaitingForPermission { .. } | Self::Errored => None,
        }
    }

    /// Whether the session can no longer accept work.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self == Self::Errored
    }

    /// Apply `transition`, returning the next state.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidTransition` for any pair outside the table,
    /// including every transition out of `Errored`.
    pub fn apply(self, transition: SessionTransition) -> Result<Self> {
        use SessionTransition as T;

        let next = match (self, transition) {
            (Self::Errored, _) => None,
            (_, T::ProcessExhausted) => Some(Self::Errored),

            (Self::WaitingForPermission { resume }, T::PermissionResolved { granted: true }) => {
                Some(resume.into())
            }
            (
                Self::WaitingForPermission { .. },
                T::PermissionResolved { granted: false } | T::Cancel,
            ) => Some(Self::Idle),
            (Self::WaitingForPermission { .. }, _) => None,

            (flow, T::Flow(next)) => flow.flow().map(|_| next.into()),
            (flow, T::PermissionRequested) => {
                flow.flow().map(|resume| Self::WaitingForPermission { resume })
            }
            (_, T::Complete | T::Cancel) => Some(Self::Idle),
            (_, T::PermissionResolved { .. }) => None,
        };

        next.ok_or_else(|| {
            AppError::InvalidTransition(format!("{transition:?} not allowed from {self:?}"))
        })
    }
}

/// A logical conversation bound to one working directory and one agent process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Session {
    /// Unique identifier.
    pub id: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
    /// Canonical working directory of the agent process.
    pub working_directory: PathBuf,
    /// Files the host has open, in the order supplied.
    pub open_files: Vec<PathBuf>,
    /// File the agent last touched.
    pub active_file: Option<PathBuf>,
    /// Current lifecycle state.
    pub state: SessionState,
    /// In-memory conversation history.
    pub history: Vec<Message>,
}

impl Session {
    /// Construct a new idle session with a generated identifier.
    #[must_use]
    pub fn new(working_directory: PathBuf, open_files: Vec<PathBuf>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            working_directory,
            open_files,
            active_file: None,
            state: SessionState::Idle,
            history: Vec::new(),
        }
    }

    /// Apply a state transition and bump `updated_at`.
    ///
    /// # Errors
    ///
    /// Propagates `AppError::InvalidTransition` from [`SessionState::apply`].
    pub fn transition(&mut self, transition: SessionTransition) -> Result<SessionState> {
        self.state = self.state.apply(transition)?;
        self.updated_at = Utc::now();
        Ok(self.state)
    }

    /// Record a file the agent wrote as the active file.
    pub fn touch_file(&mut self, path: PathBuf) {
        if !self.open_files.contains(&path) {
            self.open_files.push(path.clone());
        }
        self.active_file = Some(path);
        self.updated_at = Utc::now();
    }

    /// Append an entry to the history.
    pub fn record(&mut self, message: Message) {
        self.history.push(message);
        self.updated_at = Utc::now();
    }
}
