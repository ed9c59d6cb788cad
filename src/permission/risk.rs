//! Operation risk table.

use std::collections::HashMap;

use crate::models::operation::RiskLevel;

/// Built-in risk tiers by operation type.
pub const DEFAULT_RISKS: &[(&str, RiskLevel)] = &[
    ("file_read", RiskLevel::Low),
    ("list_files", RiskLevel::Low),
    ("file_write", RiskLevel::Medium),
    ("git_commit", RiskLevel::Medium),
    ("git_push", RiskLevel::High),
    ("terminal_exec", RiskLevel::High),
    ("delete_file", RiskLevel::High),
];

/// Tier assigned to operation types the table does not know.
pub const UNKNOWN_RISK: RiskLevel = RiskLevel::Medium;

/// Risk table consulted by the arbiter.
#[derive(Debug, Clone, Default)]
pub struct RiskTable {
    overrides: HashMap<String, RiskLevel>,
}

impl RiskTable {
    /// Build a table with per-type overrides layered over [`DEFAULT_RISKS`].
    #[must_use]
    pub fn with_overrides(overrides: HashMap<String, RiskLevel>) -> Self {
        Self { overrides }
    }

    /// Risk tier of `op_type`; unknown types are [`UNKNOWN_RISK`].
    #[must_use]
    pub fn assess(&self, op_type: &str) -> RiskLevel {
        self.lookup(op_type).unwrap_or(UNKNOWN_RISK)
    }

    /// Whether `op_type` appears in the table (built-in or override).
    #[must_use]
    pub fn contains(&self, op_type: &str) -> bool {
        self.lookup(op_type).is_some()
    }

    fn lookup(&self, op_type: &str) -> Option<RiskLevel> {
        self.overrides.get(op_type).copied().or_else(|| {
            DEFAULT_RISKS
                .iter()
                .find(|(name, _)| *name == op_type)
                .map(|(_, risk)| *risk)
        })
    }
}
