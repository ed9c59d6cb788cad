//! Error types shared across the bridge.
//!
//! Recoverable conditions (parse anomalies, a single permission denial)
//! stay local to the owning session. The unrecoverable kinds are surfaced
//! to the host with a stable [`code`](AppError::code) and
//! [`remediation`](AppError::remediation) text.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all bridge failure modes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// The agent executable is missing or could not be started.
    ProcessUnavailable(String),
    /// The agent process is not in a state that accepts the request.
    Process(String),
    /// The agent process crashed and restart attempts are exhausted.
    ProcessCrash(String),
    /// The supplied credential was rejected or is missing.
    AuthenticationFailed(String),
    /// The host denied a risk-bearing operation.
    PermissionDenied(String),
    /// No live session exists with the given identifier.
    SessionNotFound(String),
    /// The output classifier hit an internal invariant violation.
    Parse(String),
    /// The inbound request is malformed or references invalid input.
    InvalidRequest(String),
    /// A session state transition is not permitted from the current state.
    InvalidTransition(String),
    /// File system path failed validation against the working directory.
    PathViolation(String),
    /// Requested entity (other than a session) does not exist.
    NotFound(String),
    /// Host protocol framing or encoding failure.
    Protocol(String),
}

impl AppError {
    /// Stable, machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "config_error",
            Self::Io(_) => "io_error",
            Self::ProcessUnavailable(_) => "process_unavailable",
            Self::Process(_) => "process_error",
            Self::ProcessCrash(_) => "process_crash",
            Self::AuthenticationFailed(_) => "authentication_failed",
            Self::PermissionDenied(_) => "permission_denied",
            Self::SessionNotFound(_) => "session_not_found",
            Self::Parse(_) => "parse_error",
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidTransition(_) => "invalid_transition",
            Self::PathViolation(_) => "path_violation",
            Self::NotFound(_) => "not_found",
            Self::Protocol(_) => "protocol_error",
        }
    }

    /// JSON-RPC numeric error code used when the error is returned to the host.
    #[must_use]
    pub fn rpc_code(&self) -> i64 {
        match self {
            Self::Protocol(_) => -32700,
            Self::InvalidRequest(_) | Self::PathViolation(_) => -32602,
            Self::SessionNotFound(_) | Self::NotFound(_) => -32001,
            Self::AuthenticationFailed(_) => -32002,
            Self::ProcessUnavailable(_) => -32003,
            Self::ProcessCrash(_) => -32004,
            Self::Process(_) | Self::InvalidTransition(_) => -32005,
            Self::PermissionDenied(_) => -32006,
            Self::Config(_) | Self::Io(_) | Self::Parse(_) => -32603,
        }
    }

    /// Whether the condition is terminal for the session it occurred in.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ProcessUnavailable(_) | Self::ProcessCrash(_) | Self::AuthenticationFailed(_)
        )
    }

    /// Human-readable guidance for the host, if any applies.
    #[must_use]
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            Self::ProcessUnavailable(_) => Some(
                "check that the agent executable is installed, on PATH, and that \
                 [agent].executable in the bridge configuration points at it",
            ),
            Self::ProcessCrash(_) => Some(
                "the agent process kept exiting; inspect its stderr, fix the cause, \
                 and open a new session",
            ),
            Self::AuthenticationFailed(_) => Some(
                "call authenticate again with a valid credential, or obtain one from \
                 the agent provider's sign-in page",
            ),
            Self::SessionNotFound(_) => Some("create a session with session/new first"),
            Self::Config(_) => Some("fix the bridge configuration file and restart"),
            _ => None,
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::ProcessUnavailable(msg) => write!(f, "process unavailable: {msg}"),
            Self::Process(msg) => write!(f, "process: {msg}"),
            Self::ProcessCrash(msg) => write!(f, "process crash: {msg}"),
            Self::AuthenticationFailed(msg) => write!(f, "authentication failed: {msg}"),
            Self::PermissionDenied(msg) => write!(f, "permission denied: {msg}"),
            Self::SessionNotFound(msg) => write!(f, "session not found: {msg}"),
            Self::Parse(msg) => write!(f, "parse: {msg}"),
            Self::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
            Self::InvalidTransition(msg) => write!(f, "invalid transition: {msg}"),
            Self::PathViolation(msg) => write!(f, "path violation: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(format!("json: {err}"))
    }
}
