//! # Session Registry
//!
//! Single source of truth for which WebSocket legs belong to which call.
//! Replaces the ad hoc per-variant connection maps of earlier servers with
//! one authoritative structure and a consistent locking discipline.
//!
//! ## Session Lifecycle:
//! 1. **Created**: lazily, when the first leg (either role) attaches
//! 2. **Waiting**: one leg attached, counterpart not yet present - valid,
//!    not an error, frames sent now are dropped
//! 3. **Bridged**: both legs attached, frames flow in both directions
//! 4. **Removed**: when the last remaining leg detaches
//!
//! ## Locking Discipline:
//! The outer `RwLock<HashMap>` is touched only to create, look up, or delete
//! sessions. Slot mutation happens under a per-session `Mutex`, so calls
//! don't contend with each other. Lock order is always map, then session.
//!
//! ## Why generic over the handle type:
//! Production stores actor addresses (`Addr<BridgeSocket>`); tests store
//! plain strings. The registry only needs to clone handles and compare them
//! for identity, so that is all it asks for.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

/// Which side of the bridge a connection belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegRole {
    /// The voice provider's media leg
    Provider,
    /// The browser's media leg
    Browser,
}

impl LegRole {
    /// String form used in control messages and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            LegRole::Provider => "provider",
            LegRole::Browser => "browser",
        }
    }

    /// The other side of the bridge.
    pub fn counterpart(&self) -> LegRole {
        match self {
            LegRole::Provider => LegRole::Browser,
            LegRole::Browser => LegRole::Provider,
        }
    }
}

impl fmt::Display for LegRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One call's bridging state: up to two legs under one call ID.
#[derive(Debug)]
struct Session<H> {
    provider: Option<H>,
    browser: Option<H>,
    /// Set when the first leg registered, never updated afterwards
    started_at: DateTime<Utc>,
}

impl<H> Session<H> {
    fn new() -> Self {
        Self {
            provider: None,
            browser: None,
            started_at: Utc::now(),
        }
    }

    fn slot(&self, role: LegRole) -> &Option<H> {
        match role {
            LegRole::Provider => &self.provider,
            LegRole::Browser => &self.browser,
        }
    }

    fn slot_mut(&mut self, role: LegRole) -> &mut Option<H> {
        match role {
            LegRole::Provider => &mut self.provider,
            LegRole::Browser => &mut self.browser,
        }
    }

    fn is_empty(&self) -> bool {
        self.provider.is_none() && self.browser.is_none()
    }
}

/// Result of attaching a leg to a session.
#[derive(Debug)]
pub struct AttachResult<H> {
    /// Whether the other leg is already attached - the caller can start
    /// forwarding immediately instead of waiting
    pub counterpart_present: bool,
    /// A previous occupant of the same slot, evicted by this attach.
    /// The caller is responsible for closing it.
    pub evicted: Option<H>,
}

/// Why an attach was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachError {
    /// Creating this session would exceed the configured call cap.
    /// Attaching a second leg to an existing session never hits this.
    CapacityReached { max: usize },
}

impl fmt::Display for AttachError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttachError::CapacityReached { max } => {
                write!(f, "maximum concurrent calls ({}) reached", max)
            }
        }
    }
}

impl std::error::Error for AttachError {}

/// Result of detaching a leg from a session.
#[derive(Debug)]
pub enum DetachOutcome<H> {
    /// This leg was attached and has been removed. `counterpart` is the
    /// other leg if one is still present, so the caller can cascade
    /// teardown without a second lookup.
    Removed { counterpart: Option<H> },
    /// The slot was empty or held a different handle (e.g. this leg was
    /// already evicted by a reconnect). Nothing changed; safe to ignore.
    NotAttached,
}

/// Diagnostic view of one session, for the `/api/v1/calls` endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionSnapshot {
    pub call_id: String,
    pub has_provider: bool,
    pub has_browser: bool,
    pub started_at: DateTime<Utc>,
}

/// In-memory mapping from call ID to session.
///
/// ## Thread Safety:
/// Cheap to clone - clones share the underlying map. All operations are
/// short, lock-scoped, and never block on network I/O.
#[derive(Debug, Clone)]
pub struct SessionRegistry<H> {
    sessions: Arc<RwLock<HashMap<String, Arc<Mutex<Session<H>>>>>>,
    max_concurrent_calls: usize,
}

impl<H> SessionRegistry<H>
where
    H: Clone + PartialEq,
{
    /// Create a registry that allows at most `max_concurrent_calls` live
    /// sessions.
    pub fn new(max_concurrent_calls: usize) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            max_concurrent_calls,
        }
    }

    /// Attach a leg to a call, creating the session if this is the first
    /// leg to arrive. Either arrival order works.
    ///
    /// If the slot for `role` is already occupied, the new connection
    /// replaces the old one and the stale handle is returned in
    /// `AttachResult::evicted` - a late reconnect must not leak two live
    /// sockets in one slot.
    pub fn attach_leg(
        &self,
        call_id: &str,
        role: LegRole,
        handle: H,
    ) -> Result<AttachResult<H>, AttachError> {
        let session = self.get_or_create(call_id)?;
        let mut session = session.lock().unwrap();

        let evicted = session.slot_mut(role).replace(handle);
        let counterpart_present = session.slot(role.counterpart()).is_some();

        Ok(AttachResult {
            counterpart_present,
            evicted,
        })
    }

    /// Non-blocking lookup of the other leg's current connection.
    ///
    /// Called on every inbound frame; the counterpart may appear or
    /// disappear between two calls, which is fine - a missing counterpart
    /// means "no listener yet", not an error.
    pub fn counterpart(&self, call_id: &str, role: LegRole) -> Option<H> {
        let session = self.sessions.read().unwrap().get(call_id).cloned()?;
        let session = session.lock().unwrap();
        session.slot(role.counterpart()).clone()
    }

    /// Detach a leg. The slot is cleared only if it still holds `handle`,
    /// so a leg that was evicted by a reconnect cannot detach its
    /// replacement. Removes the session entirely once both slots are empty.
    /// Safe to call twice for the same leg.
    pub fn detach_leg(&self, call_id: &str, role: LegRole, handle: &H) -> DetachOutcome<H> {
        let Some(session_arc) = self.sessions.read().unwrap().get(call_id).cloned() else {
            return DetachOutcome::NotAttached;
        };

        let (outcome, now_empty) = {
            let mut session = session_arc.lock().unwrap();
            match session.slot(role) {
                Some(current) if current == handle => {
                    session.slot_mut(role).take();
                    let counterpart = session.slot(role.counterpart()).clone();
                    let now_empty = session.is_empty();
                    (DetachOutcome::Removed { counterpart }, now_empty)
                }
                _ => return DetachOutcome::NotAttached,
            }
        };

        if now_empty {
            let mut sessions = self.sessions.write().unwrap();
            // Re-check under the write lock: a new leg may have attached
            // between releasing the session mutex and acquiring this lock.
            let still_empty = sessions
                .get(call_id)
                .map(|s| s.lock().unwrap().is_empty())
                .unwrap_or(false);
            if still_empty {
                sessions.remove(call_id);
            }
        }

        outcome
    }

    /// Diagnostic enumeration of all live sessions. No mutation.
    pub fn snapshot(&self) -> Vec<SessionSnapshot> {
        let sessions = self.sessions.read().unwrap();
        sessions
            .iter()
            .map(|(call_id, session)| {
                let session = session.lock().unwrap();
                SessionSnapshot {
                    call_id: call_id.clone(),
                    has_provider: session.provider.is_some(),
                    has_browser: session.browser.is_some(),
                    started_at: session.started_at,
                }
            })
            .collect()
    }

    /// Number of live sessions.
    pub fn active_call_count(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    /// Look up the session for `call_id`, creating it if absent.
    ///
    /// The capacity cap is checked only on the create path, under the
    /// write lock, so two racing first-legs can't both slip past it.
    fn get_or_create(&self, call_id: &str) -> Result<Arc<Mutex<Session<H>>>, AttachError> {
        if let Some(existing) = self.sessions.read().unwrap().get(call_id) {
            return Ok(existing.clone());
        }

        let mut sessions = self.sessions.write().unwrap();
        if let Some(existing) = sessions.get(call_id) {
            // Another leg created it while we waited for the write lock
            return Ok(existing.clone());
        }

        if sessions.len() >= self.max_concurrent_calls {
            return Err(AttachError::CapacityReached {
                max: self.max_concurrent_calls,
            });
        }

        let session = Arc::new(Mutex::new(Session::new()));
        sessions.insert(call_id.to_string(), session.clone());
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> SessionRegistry<String> {
        SessionRegistry::new(8)
    }

    #[test]
    fn test_attach_order_does_not_matter() {
        // Provider first, then browser
        let reg = registry();
        let first = reg
            .attach_leg("c1", LegRole::Provider, "prov".to_string())
            .unwrap();
        assert!(!first.counterpart_present);

        let second = reg
            .attach_leg("c1", LegRole::Browser, "brow".to_string())
            .unwrap();
        assert!(second.counterpart_present);

        // Browser first, then provider
        let reg = registry();
        let first = reg
            .attach_leg("c2", LegRole::Browser, "brow".to_string())
            .unwrap();
        assert!(!first.counterpart_present);

        let second = reg
            .attach_leg("c2", LegRole::Provider, "prov".to_string())
            .unwrap();
        assert!(second.counterpart_present);
    }

    #[test]
    fn test_counterpart_lookup() {
        let reg = registry();
        reg.attach_leg("c1", LegRole::Provider, "prov".to_string())
            .unwrap();

        // No browser attached yet - frames sent now would be dropped
        assert_eq!(reg.counterpart("c1", LegRole::Provider), None);
        // Unknown call
        assert_eq!(reg.counterpart("nope", LegRole::Provider), None);

        reg.attach_leg("c1", LegRole::Browser, "brow".to_string())
            .unwrap();
        assert_eq!(
            reg.counterpart("c1", LegRole::Provider),
            Some("brow".to_string())
        );
        assert_eq!(
            reg.counterpart("c1", LegRole::Browser),
            Some("prov".to_string())
        );
    }

    #[test]
    fn test_duplicate_attach_evicts_stale_handle() {
        let reg = registry();
        reg.attach_leg("c1", LegRole::Browser, "old".to_string())
            .unwrap();

        let result = reg
            .attach_leg("c1", LegRole::Browser, "new".to_string())
            .unwrap();
        assert_eq!(result.evicted, Some("old".to_string()));

        // The slot now holds the replacement
        reg.attach_leg("c1", LegRole::Provider, "prov".to_string())
            .unwrap();
        assert_eq!(
            reg.counterpart("c1", LegRole::Provider),
            Some("new".to_string())
        );
    }

    #[test]
    fn test_evicted_handle_cannot_detach_replacement() {
        let reg = registry();
        reg.attach_leg("c1", LegRole::Browser, "old".to_string())
            .unwrap();
        reg.attach_leg("c1", LegRole::Browser, "new".to_string())
            .unwrap();

        // The evicted leg's teardown runs after the replacement attached
        let outcome = reg.detach_leg("c1", LegRole::Browser, &"old".to_string());
        assert!(matches!(outcome, DetachOutcome::NotAttached));

        // The replacement is untouched
        let snapshot = reg.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot[0].has_browser);
    }

    #[test]
    fn test_detach_last_leg_removes_session() {
        let reg = registry();
        reg.attach_leg("c1", LegRole::Provider, "prov".to_string())
            .unwrap();
        assert_eq!(reg.snapshot().len(), 1);

        let outcome = reg.detach_leg("c1", LegRole::Provider, &"prov".to_string());
        match outcome {
            DetachOutcome::Removed { counterpart } => assert_eq!(counterpart, None),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(reg.snapshot().is_empty());
        assert_eq!(reg.active_call_count(), 0);
    }

    #[test]
    fn test_detach_reports_remaining_counterpart() {
        let reg = registry();
        reg.attach_leg("c1", LegRole::Provider, "prov".to_string())
            .unwrap();
        reg.attach_leg("c1", LegRole::Browser, "brow".to_string())
            .unwrap();

        let outcome = reg.detach_leg("c1", LegRole::Provider, &"prov".to_string());
        match outcome {
            DetachOutcome::Removed { counterpart } => {
                assert_eq!(counterpart, Some("brow".to_string()))
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        // Session survives with the browser leg still attached
        let snapshot = reg.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!(!snapshot[0].has_provider);
        assert!(snapshot[0].has_browser);
    }

    #[test]
    fn test_detach_is_idempotent() {
        let reg = registry();
        reg.attach_leg("c1", LegRole::Provider, "prov".to_string())
            .unwrap();

        let first = reg.detach_leg("c1", LegRole::Provider, &"prov".to_string());
        assert!(matches!(first, DetachOutcome::Removed { .. }));

        let second = reg.detach_leg("c1", LegRole::Provider, &"prov".to_string());
        assert!(matches!(second, DetachOutcome::NotAttached));
    }

    #[test]
    fn test_capacity_cap_applies_to_new_calls_only() {
        let reg: SessionRegistry<String> = SessionRegistry::new(1);
        reg.attach_leg("c1", LegRole::Provider, "prov".to_string())
            .unwrap();

        // A second call is refused
        let err = reg
            .attach_leg("c2", LegRole::Provider, "other".to_string())
            .unwrap_err();
        assert_eq!(err, AttachError::CapacityReached { max: 1 });

        // But the second leg of the existing call attaches fine
        let result = reg
            .attach_leg("c1", LegRole::Browser, "brow".to_string())
            .unwrap();
        assert!(result.counterpart_present);
    }

    #[test]
    fn test_snapshot_reflects_leg_presence() {
        let reg = registry();
        reg.attach_leg("c1", LegRole::Provider, "prov".to_string())
            .unwrap();
        reg.attach_leg("c2", LegRole::Browser, "brow".to_string())
            .unwrap();

        let mut snapshot = reg.snapshot();
        snapshot.sort_by(|a, b| a.call_id.cmp(&b.call_id));

        assert_eq!(snapshot.len(), 2);
        assert!(snapshot[0].has_provider && !snapshot[0].has_browser);
        assert!(!snapshot[1].has_provider && snapshot[1].has_browser);
    }
}
