//! Risk-bearing operations and permission decisions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ordinal risk classification of an operation (`Low < Medium < High`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    /// Read-only or otherwise harmless.
    Low,
    /// Local mutation.
    Medium,
    /// Destructive or externally visible.
    High,
}

/// An operation the agent wants to perform that may need host approval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Operation {
    /// Unique identifier.
    pub id: String,
    /// Operation type tag (e.g. `file_write`).
    #[serde(rename = "type")]
    pub op_type: String,
    /// Risk tier assigned by the arbiter's risk table.
    pub risk_level: RiskLevel,
    /// Operation parameters.
    pub details: BTreeMap<String, String>,
}

impl Operation {
    /// Construct an operation with a fresh identifier.
    #[must_use]
    pub fn new(op_type: impl Into<String>, risk_level: RiskLevel) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            op_type: op_type.into(),
            risk_level,
            details: BTreeMap::new(),
        }
    }

    /// Attach a detail entry, replacing any previous value for `key`.
    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

/// How far a decision reaches.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PermissionScope {
    /// Applies to this operation only.
    Once,
    /// Applies to every later operation of the same type.
    AllSimilar,
}

/// Option the host may pick in answer to a permission request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum PermissionOption {
    /// Allow this operation.
    Allow,
    /// Allow this and every later operation of the same type.
    AllowAll,
    /// Refuse this operation.
    Deny,
}

impl PermissionOption {
    /// Full option set offered with every permission request.
    pub const ALL: [Self; 3] = [Self::Allow, Self::AllowAll, Self::Deny];
}

/// Outcome of a permission request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PermissionDecision {
    /// Whether the operation may proceed.
    pub granted: bool,
    /// Reach of the decision.
    pub scope: PermissionScope,
    /// Decided by policy without asking the host.
    pub automatic: bool,
    /// Served from the permission cache.
    pub cached: bool,
}

impl PermissionDecision {
    /// Granted by the auto-approve threshold.
    #[must_use]
    pub fn automatic() -> Self {
        Self {
            granted: true,
            scope: PermissionScope::Once,
            automatic: true,
            cached: false,
        }
    }

    /// Refused, either by the host or by timeout.
    #[must_use]
    pub fn denied() -> Self {
        Self {
            granted: false,
            scope: PermissionScope::Once,
            automatic: false,
            cached: false,
        }
    }

    /// Derived from the host's chosen option.
    #[must_use]
    pub fn from_option(option: PermissionOption) -> Self {
        match option {
            PermissionOption::Allow => Self {
                granted: true,
                scope: PermissionScope::Once,
                automatic: false,
                cached: false,
            },
            PermissionOption::AllowAll => Self {
                granted: true,
                scope: PermissionScope::AllSimilar,
                automatic: false,
                cached: false,
            },
            PermissionOption::Deny => Self::denied(),
        }
    }
}
