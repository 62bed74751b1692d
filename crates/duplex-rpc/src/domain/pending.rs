//! Pending Call Store - maps correlation IDs to callers awaiting a response.
//!
//! Every entry is fulfilled at most once. Whoever removes the entry from the
//! map (response, timeout, send failure or teardown) owns the single
//! resolution; every other path finds nothing and backs off.

use crate::domain::correlation::CorrelationId;
use crate::domain::error::RpcError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Outcome delivered to a waiting caller
pub type CallOutcome = Result<Value, RpcError>;

/// A call waiting for its response
struct PendingCall {
    /// Channel to deliver the outcome
    sender: oneshot::Sender<CallOutcome>,
    /// When the call was registered
    created_at: Instant,
    /// Method name (for logging)
    method: String,
}

/// Statistics for the pending call store
#[derive(Debug, Default)]
pub struct PendingStats {
    /// Total calls registered
    pub total_registered: AtomicU64,
    /// Total calls completed by a response
    pub total_completed: AtomicU64,
    /// Total calls reclaimed by timeout
    pub total_timeouts: AtomicU64,
    /// Total calls cancelled (send failure or caller gone)
    pub total_cancelled: AtomicU64,
    /// Total calls failed by teardown
    pub total_failed: AtomicU64,
}

/// Point-in-time copy of [`PendingStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PendingStatsSnapshot {
    pub registered: u64,
    pub completed: u64,
    pub timeouts: u64,
    pub cancelled: u64,
    pub failed: u64,
}

/// Pending call store for one session.
///
/// Flow:
/// 1. Caller calls `register()` to get a correlation ID and a oneshot receiver
/// 2. Caller sends the request frame carrying the ID
/// 3. Inbound response calls `complete()`
/// 4. Caller awaits the receiver or, on timeout, calls `expire()`
pub struct PendingCallStore {
    pending: DashMap<CorrelationId, PendingCall>,
    stats: PendingStats,
}

impl PendingCallStore {
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
            stats: PendingStats::default(),
        }
    }

    /// Register a pending call and get a receiver for its outcome.
    pub fn register(&self, method: &str) -> (CorrelationId, oneshot::Receiver<CallOutcome>) {
        let (tx, rx) = oneshot::channel();
        let call = PendingCall {
            sender: tx,
            created_at: Instant::now(),
            method: method.to_string(),
        };

        // Random 128-bit ids practically never collide; regenerate if one does.
        let correlation_id = loop {
            let candidate = CorrelationId::new();
            if let Entry::Vacant(slot) = self.pending.entry(candidate) {
                slot.insert(call);
                break candidate;
            }
        };

        self.stats.total_registered.fetch_add(1, Ordering::Relaxed);

        debug!(
            correlation_id = %correlation_id,
            method = method,
            "Registered pending call"
        );

        (correlation_id, rx)
    }

    /// Complete a pending call with its outcome.
    ///
    /// Returns true if the call was found and completed, false if unknown or already resolved.
    pub fn complete(&self, correlation_id: CorrelationId, outcome: CallOutcome) -> bool {
        let Some((_, pending)) = self.pending.remove(&correlation_id) else {
            warn!(
                correlation_id = %correlation_id,
                "Response for unknown or expired correlation ID"
            );
            return false;
        };

        let response_time = pending.created_at.elapsed();
        match pending.sender.send(outcome) {
            Ok(()) => {
                self.stats.total_completed.fetch_add(1, Ordering::Relaxed);
                debug!(
                    correlation_id = %correlation_id,
                    method = pending.method,
                    response_time_ms = response_time.as_millis(),
                    "Completed pending call"
                );
                true
            }
            Err(_) => {
                // Caller future was dropped before the response arrived
                self.stats.total_cancelled.fetch_add(1, Ordering::Relaxed);
                debug!(
                    correlation_id = %correlation_id,
                    method = pending.method,
                    "Pending call receiver dropped"
                );
                false
            }
        }
    }

    /// Reclaim a call whose timeout elapsed.
    ///
    /// Returns false if a response already claimed the entry.
    pub fn expire(&self, correlation_id: &CorrelationId, timeout: Duration) -> bool {
        let Some((_, pending)) = self.pending.remove(correlation_id) else {
            return false;
        };

        self.stats.total_timeouts.fetch_add(1, Ordering::Relaxed);
        warn!(
            correlation_id = %correlation_id,
            method = pending.method,
            timeout_ms = timeout.as_millis(),
            "Pending call timed out"
        );
        true
    }

    /// Remove a call without resolving it (send failed, caller gone).
    pub fn cancel(&self, correlation_id: &CorrelationId) -> bool {
        if self.pending.remove(correlation_id).is_some() {
            self.stats.total_cancelled.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Tie an entry's lifetime to the returned guard.
    ///
    /// Dropping the guard cancels the entry if it is still pending, so a
    /// caller that abandons its call future leaves nothing behind.
    pub fn guard(&self, correlation_id: CorrelationId) -> PendingCallGuard<'_> {
        PendingCallGuard {
            store: self,
            correlation_id,
        }
    }

    /// Fail every outstanding call with `SessionClosed`.
    ///
    /// Returns the number of calls failed.
    pub fn fail_all(&self) -> usize {
        let ids: Vec<CorrelationId> = self.pending.iter().map(|entry| *entry.key()).collect();
        let mut failed = 0;

        for id in ids {
            if let Some((_, pending)) = self.pending.remove(&id) {
                let _ = pending.sender.send(Err(RpcError::SessionClosed));
                failed += 1;
            }
        }

        if failed > 0 {
            self.stats
                .total_failed
                .fetch_add(failed as u64, Ordering::Relaxed);
            debug!(failed = failed, "Failed outstanding calls on teardown");
        }

        failed
    }

    /// Get number of currently pending calls
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Check if a correlation ID is pending
    pub fn is_pending(&self, correlation_id: &CorrelationId) -> bool {
        self.pending.contains_key(correlation_id)
    }

    /// Get statistics
    pub fn stats(&self) -> &PendingStats {
        &self.stats
    }

    /// Copy the counters
    pub fn snapshot(&self) -> PendingStatsSnapshot {
        PendingStatsSnapshot {
            registered: self.stats.total_registered.load(Ordering::Relaxed),
            completed: self.stats.total_completed.load(Ordering::Relaxed),
            timeouts: self.stats.total_timeouts.load(Ordering::Relaxed),
            cancelled: self.stats.total_cancelled.load(Ordering::Relaxed),
            failed: self.stats.total_failed.load(Ordering::Relaxed),
        }
    }
}

/// Cancels its pending call on drop. See [`PendingCallStore::guard`].
pub struct PendingCallGuard<'a> {
    store: &'a PendingCallStore,
    correlation_id: CorrelationId,
}

impl Drop for PendingCallGuard<'_> {
    fn drop(&mut self) {
        if self.store.cancel(&self.correlation_id) {
            debug!(
                correlation_id = %self.correlation_id,
                "Pending call abandoned by caller"
            );
        }
    }
}

impl Default for PendingCallStore {
    fn default() -> Self {
        Self::new()
    }
}
