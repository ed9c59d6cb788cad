//! Permission arbiter.
//!
//! Evaluation order for [`PermissionArbiter::request_permission`]:
//! 1. Cache hit for the operation type → cached decision, no round trip.
//! 2. Risk at or below the auto-approve threshold → granted automatically.
//! 3. Otherwise a `permission/request` goes to the host and the caller
//!    blocks until [`PermissionArbiter::resolve`] delivers the answer or the
//!    timeout elapses (timeout denies).
//!
//! An `allowAll` answer is written to the cache before returning.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::PermissionConfig;
use crate::models::notification::Notification;
use crate::models::operation::{
    Operation, PermissionDecision, PermissionOption, PermissionScope, RiskLevel,
};
use crate::permission::cache::PermissionCache;
use crate::permission::risk::RiskTable;
use crate::{AppError, Result};

/// Thread-safe map of pending permission `oneshot` senders keyed by `request_id`.
type PendingPermissions = Arc<Mutex<HashMap<String, oneshot::Sender<PermissionOption>>>>;

/// Arbitrates risk-bearing operations for every session of one bridge.
///
/// Cloning shares the cache and the pending-request map.
#[derive(Debug, Clone)]
pub struct PermissionArbiter {
    risk: RiskTable,
    threshold: RiskLevel,
    timeout: Duration,
    cache: Arc<PermissionCache>,
    pending: PendingPermissions,
}

impl PermissionArbiter {
    /// Create an arbiter with its own empty cache.
    #[must_use]
    pub fn new(risk: RiskTable, threshold: RiskLevel, timeout: Duration) -> Self {
        Self::with_cache(risk, threshold, timeout, Arc::new(PermissionCache::new()))
    }

    /// Create an arbiter over an explicitly supplied cache.
    #[must_use]
    pub fn with_cache(
        risk: RiskTable,
        threshold: RiskLevel,
        timeout: Duration,
        cache: Arc<PermissionCache>,
    ) -> Self {
        Self {
            risk,
            threshold,
            timeout,
            cache,
            pending: PendingPermissions::default(),
        }
    }

    /// Create an arbiter from the `[permissions]` configuration section.
    #[must_use]
    pub fn from_config(config: &PermissionConfig) -> Self {
        Self::new(
            RiskTable::with_overrides(config.risk_overrides.clone()),
            config.auto_approve_threshold,
            Duration::from_secs(config.timeout_seconds),
        )
    }

    /// The cache this arbiter owns.
    #[must_use]
    pub fn cache(&self) -> &Arc<PermissionCache> {
        &self.cache
    }

    /// The risk table in use.
    #[must_use]
    pub fn risk_table(&self) -> &RiskTable {
        &self.risk
    }

    /// Build an [`Operation`] of `op_type` with its assessed risk tier.
    #[must_use]
    pub fn operation(&self, op_type: &str) -> Operation {
        Operation::new(op_type, self.risk.assess(op_type))
    }

    /// Number of requests currently awaiting the host.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Decide whether `operation` may proceed.
    ///
    /// Never fails: a closed caller channel, a dropped responder, or a
    /// timeout all resolve to a denial.
    pub async fn request_permission(
        &self,
        session_id: &str,
        operation: &Operation,
        caller: &mpsc::Sender<Notification>,
    ) -> PermissionDecision {
        let span = info_span!(
            "request_permission",
            session_id,
            op_type = %operation.op_type,
            risk_level = ?operation.risk_level,
        );

        async move {
            if let Some(decision) = self.cache.get(&operation.op_type).await {
                debug!(granted = decision.granted, "permission served from cache");
                return decision;
            }

            if operation.risk_level <= self.threshold {
                debug!(threshold = ?self.threshold, "auto-approved under threshold");
                return PermissionDecision::automatic();
            }

            let request_id = Uuid::new_v4().to_string();
            let (tx, rx) = oneshot::channel();
            let _guard = PendingGuard::register(&self.pending, &request_id, tx);

            let request = Notification::PermissionRequest {
                request_id: request_id.clone(),
                session_id: session_id.to_owned(),
                operation: operation.clone(),
                risk_level: operation.risk_level,
                options: PermissionOption::ALL.to_vec(),
            };

            if caller.send(request).await.is_err() {
                warn!(request_id, "caller channel closed, denying");
                return PermissionDecision::denied();
            }

            let decision = match tokio::time::timeout(self.timeout, rx).await {
                Ok(Ok(option)) => PermissionDecision::from_option(option),
                Ok(Err(_)) => {
                    warn!(request_id, "permission responder dropped, denying");
                    PermissionDecision::denied()
                }
                Err(_elapsed) => {
                    info!(
                        request_id,
                        timeout_seconds = self.timeout.as_secs(),
                        "permission request timed out, denying"
                    );
                    PermissionDecision::denied()
                }
            };

            if decision.granted && decision.scope == PermissionScope::AllSimilar {
                self.cache.store(&operation.op_type, decision).await;
            }

            info!(request_id, granted = decision.granted, "permission resolved");
            decision
        }
        .instrument(span)
        .await
    }

    /// Deliver the host's answer for `request_id`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no request with that id is pending
    /// (already answered, timed out, or never issued).
    pub fn resolve(&self, request_id: &str, option: PermissionOption) -> Result<()> {
        let sender = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(request_id);

        let Some(sender) = sender else {
            return Err(AppError::NotFound(format!(
                "no pending permission request '{request_id}'"
            )));
        };

        sender.send(option).map_err(|_| {
            AppError::NotFound(format!(
                "permission request '{request_id}' is no longer waiting"
            ))
        })
    }
}

/// Removes a pending entry when the waiting future finishes or is dropped.
struct PendingGuard {
    pending: PendingPermissions,
    request_id: String,
}

impl PendingGuard {
    fn register(
        pending: &PendingPermissions,
        request_id: &str,
        tx: oneshot::Sender<PermissionOption>,
    ) -> Self {
        pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(request_id.to_owned(), tx);
        Self {
            pending: Arc::clone(pending),
            request_id: request_id.to_owned(),
        }
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.request_id);
    }
}
