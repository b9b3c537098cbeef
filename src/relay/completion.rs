//! # Call Completion Tracker
//!
//! Process-wide set of call identifiers that have reached a terminal state.
//! Consulted so that a hang-up request or a relay teardown is idempotent:
//! once a call is marked completed, nobody re-issues a provider hang-up or
//! sends a second "call ended" notification for it.
//!
//! ## Why entries are never removed:
//! Call identifiers are never reused within a process run, so the set only
//! grows with call volume and is reset on restart. A production deployment
//! would externalize this to a store with TTL; that is explicitly out of
//! scope here.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

/// Thread-safe set of completed call IDs.
///
/// ## Thread Safety:
/// Uses `Arc<RwLock<HashSet>>` so many connection actors can check
/// membership concurrently while completion marks take a short exclusive
/// lock. This is a separate lock from the Session Registry on purpose - a
/// detach and a completion-mark are independent operations and may
/// interleave freely.
#[derive(Debug, Clone, Default)]
pub struct CompletionTracker {
    completed: Arc<RwLock<HashSet<String>>>,
}

impl CompletionTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a call as completed.
    ///
    /// Idempotent: marking the same call twice is harmless. Returns `true`
    /// only the first time, so callers can log (or count) the transition
    /// exactly once.
    pub fn mark_completed(&self, call_id: &str) -> bool {
        let mut completed = self.completed.write().unwrap();
        completed.insert(call_id.to_string())
    }

    /// Check whether a call has been marked completed.
    pub fn is_completed(&self, call_id: &str) -> bool {
        let completed = self.completed.read().unwrap();
        completed.contains(call_id)
    }

    /// Number of calls marked completed since process start.
    pub fn len(&self) -> usize {
        self.completed.read().unwrap().len()
    }

    /// True if no call has completed yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
