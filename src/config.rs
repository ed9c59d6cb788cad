//! Bridge configuration parsing and validation.
//!
//! The bridge consumes a pre-validated [`BridgeConfig`]; this module turns a
//! TOML document into one. Every field has a default so an empty document
//! (or [`BridgeConfig::default`]) is a working configuration.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::models::operation::RiskLevel;
use crate::{AppError, Result};

/// How to launch the wrapped agent process.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentConfig {
    /// Agent executable (absolute path or a name resolved through `PATH`).
    #[serde(default = "default_executable")]
    pub executable: String,
    /// Arguments passed to the executable.
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables injected into the agent process.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Upper bound on waiting for the idle marker after a (re)start.
    #[serde(default = "default_ready_timeout_seconds")]
    pub ready_timeout_seconds: u64,
}

fn default_executable() -> String {
    "agent".into()
}

fn default_ready_timeout_seconds() -> u64 {
    10
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            executable: default_executable(),
            args: Vec::new(),
            env: HashMap::new(),
            ready_timeout_seconds: default_ready_timeout_seconds(),
        }
    }
}

/// Restart policy applied when the agent exits unexpectedly.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RestartConfig {
    /// Maximum restart attempts over a session's lifetime.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first restart; doubled for each subsequent attempt.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Ceiling for the doubled delay.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    1000
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl RestartConfig {
    /// Backoff before restart `attempt` (1-based): `initial * 2^(attempt-1)`, capped.
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let millis = self
            .initial_backoff_ms
            .saturating_mul(1_u64 << exponent)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }
}

/// Permission arbitration settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PermissionConfig {
    /// Highest risk tier granted without asking the host.
    #[serde(default = "default_threshold")]
    pub auto_approve_threshold: RiskLevel,
    /// How long to wait for the host's answer before denying.
    #[serde(default = "default_permission_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Per-operation-type risk tier overrides.
    #[serde(default)]
    pub risk_overrides: HashMap<String, RiskLevel>,
}

fn default_threshold() -> RiskLevel {
    RiskLevel::Low
}

fn default_permission_timeout_seconds() -> u64 {
    30
}

impl Default for PermissionConfig {
    fn default() -> Self {
        Self {
            auto_approve_threshold: default_threshold(),
            timeout_seconds: default_permission_timeout_seconds(),
            risk_overrides: HashMap::new(),
        }
    }
}

/// Text markers recognised in the agent's output and accepted on its input.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct MarkerConfig {
    /// Prefix of a line that opens a planning block.
    #[serde(default = "default_plan_prefix")]
    pub plan_prefix: String,
    /// Prefix of a line that opens a tool-call block.
    #[serde(default = "default_exec_prefix")]
    pub exec_prefix: String,
    /// Prefix of a line announcing a file write.
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
    /// Line that closes a planning or tool-call block.
    #[serde(default = "default_completion")]
    pub completion: String,
    /// Code fence token.
    #[serde(default = "default_fence")]
    pub fence: String,
    /// Line the agent prints when it is waiting for input.
    #[serde(default = "default_idle")]
    pub idle: String,
    /// Command text that aborts the agent's current work.
    #[serde(default = "default_cancel")]
    pub cancel: String,
}

fn default_plan_prefix() -> String {
    "Planning:".into()
}

fn default_exec_prefix() -> String {
    "Executing:".into()
}

fn default_file_prefix() -> String {
    "Writing:".into()
}

fn default_completion() -> String {
    "Done".into()
}

fn default_fence() -> String {
    "```".into()
}

fn default_idle() -> String {
    "READY".into()
}

fn default_cancel() -> String {
    "/cancel".into()
}

impl Default for MarkerConfig {
    fn default() -> Self {
        Self {
            plan_prefix: default_plan_prefix(),
            exec_prefix: default_exec_prefix(),
            file_prefix: default_file_prefix(),
            completion: default_completion(),
            fence: default_fence(),
            idle: default_idle(),
            cancel: default_cancel(),
        }
    }
}

/// Credential pass-through settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AuthConfig {
    /// Whether `authenticate` must succeed before sessions can be created.
    #[serde(default)]
    pub required: bool,
    /// Environment variable the credential is handed to the agent through.
    #[serde(default = "default_auth_env_var")]
    pub env_var: String,
}

fn default_auth_env_var() -> String {
    "AGENT_API_KEY".into()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            required: false,
            env_var: default_auth_env_var(),
        }
    }
}

/// Top-level bridge configuration parsed from `config.toml`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BridgeConfig {
    /// Workspace used when `session/new` omits a working directory.
    #[serde(default)]
    pub default_workspace_root: Option<PathBuf>,
    /// Agent process launch settings.
    #[serde(default)]
    pub agent: AgentConfig,
    /// Crash recovery policy.
    #[serde(default)]
    pub restart: RestartConfig,
    /// Permission arbitration settings.
    #[serde(default)]
    pub permissions: PermissionConfig,
    /// Output and input markers of the agent's text protocol.
    #[serde(default)]
    pub markers: MarkerConfig,
    /// Credential pass-through.
    #[serde(default)]
    pub auth: AuthConfig,
}

impl BridgeConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Time to wait for the idle marker after a (re)start.
    #[must_use]
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.agent.ready_timeout_seconds)
    }

    /// Time to wait for the host's permission answer.
    #[must_use]
    pub fn permission_timeout(&self) -> Duration {
        Duration::from_secs(self.permissions.timeout_seconds)
    }

    fn validate(&mut self) -> Result<()> {
        if self.agent.executable.trim().is_empty() {
            return Err(AppError::Config("agent.executable must not be empty".into()));
        }

        if self.restart.initial_backoff_ms > self.restart.max_backoff_ms {
            return Err(AppError::Config(
                "restart.initial_backoff_ms must not exceed restart.max_backoff_ms".into(),
            ));
        }

        let markers = &self.markers;
        for (name, value) in [
            ("plan_prefix", &markers.plan_prefix),
            ("exec_prefix", &markers.exec_prefix),
            ("file_prefix", &markers.file_prefix),
            ("completion", &markers.completion),
            ("fence", &markers.fence),
            ("idle", &markers.idle),
            ("cancel", &markers.cancel),
        ] {
            if value.trim().is_empty() {
                return Err(AppError::Config(format!("markers.{name} must not be empty")));
            }
        }

        if let Some(ref root) = self.default_workspace_root {
            let canonical = root.canonicalize().map_err(|err| {
                AppError::Config(format!("default_workspace_root invalid: {err}"))
            })?;
            self.default_workspace_root = Some(canonical);
        }

        Ok(())
    }
}
