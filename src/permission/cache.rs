//! "Allow all similar" decision cache.
//!
//! Lives as long as the bridge process and is never persisted. Reads may
//! run concurrently; every mutation takes the write half of a single
//! [`RwLock`].

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::debug;

use crate::models::operation::{PermissionDecision, PermissionScope};

/// Operation-type keyed cache of `AllSimilar` decisions.
#[derive(Debug, Default)]
pub struct PermissionCache {
    entries: RwLock<HashMap<String, PermissionDecision>>,
}

impl PermissionCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached decision for `op_type`, marked `cached`.
    pub async fn get(&self, op_type: &str) -> Option<PermissionDecision> {
        self.entries
            .read()
            .await
            .get(op_type)
            .map(|decision| PermissionDecision {
                cached: true,
                automatic: false,
                ..*decision
            })
    }

    /// Store `decision` for `op_type`.
    ///
    /// Only `AllSimilar` decisions are kept; `Once` decisions are ignored
    /// and `false` is returned.
    pub async fn store(&self, op_type: &str, decision: PermissionDecision) -> bool {
        if decision.scope != PermissionScope::AllSimilar {
            debug!(op_type, "permission cache: ignoring single-use decision");
            return false;
        }

        self.entries
            .write()
            .await
            .insert(op_type.to_owned(), decision);
        debug!(op_type, granted = decision.granted, "permission cache: stored");
        true
    }

    /// Number of cached operation types.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the cache holds no decisions.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Drop every cached decision.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}
