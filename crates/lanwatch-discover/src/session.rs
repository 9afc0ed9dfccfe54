//! Process-wide scan pass exclusion.
//!
//! At most one pass runs at a time. A second request is rejected with
//! [`DiscoverError::SessionBusy`], never queued. The claim is held by a
//! [`PassGuard`] and released when the guard drops, so a pass that errors
//! or is cancelled cannot leave the engine stuck.

use std::sync::{Mutex, MutexGuard};

use lanwatch_core::types::SessionId;

use crate::error::{DiscoverError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum SessionState {
    #[default]
    Idle,
    /// Claimed, session record not opened yet.
    Claimed,
    Running(SessionId),
}

#[derive(Debug, Default)]
pub struct SessionManager {
    state: Mutex<SessionState>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Atomically move from idle to claimed.
    pub fn try_claim(&self) -> Result<PassGuard<'_>> {
        let mut state = self.lock();
        if *state != SessionState::Idle {
            return Err(DiscoverError::SessionBusy);
        }
        *state = SessionState::Claimed;
        Ok(PassGuard { manager: self })
    }

    /// Id of the running pass, once its session is open.
    pub fn active_session(&self) -> Option<SessionId> {
        match *self.lock() {
            SessionState::Running(id) => Some(id),
            _ => None,
        }
    }

    pub fn is_busy(&self) -> bool {
        *self.lock() != SessionState::Idle
    }
}

/// Exclusive right to run one pass.
#[derive(Debug)]
pub struct PassGuard<'a> {
    manager: &'a SessionManager,
}

impl PassGuard<'_> {
    /// Record the session opened for this pass.
    pub fn activate(&self, id: SessionId) {
        *self.manager.lock() = SessionState::Running(id);
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        *self.manager.lock() = SessionState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_claim_is_rejected() {
        let sessions = SessionManager::new();
        let _guard = sessions.try_claim().unwrap();
        assert!(matches!(sessions.try_claim(), Err(DiscoverError::SessionBusy)));
        assert!(sessions.is_busy());
    }

    #[test]
    fn dropping_guard_releases_claim() {
        let sessions = SessionManager::new();
        {
            let guard = sessions.try_claim().unwrap();
            let id = SessionId::new();
            guard.activate(id);
            assert_eq!(sessions.active_session(), Some(id));
        }
        assert!(!sessions.is_busy());
        assert_eq!(sessions.active_session(), None);
        assert!(sessions.try_claim().is_ok());
    }

    #[test]
    fn claimed_pass_has_no_session_yet() {
        let sessions = SessionManager::new();
        let _guard = sessions.try_claim().unwrap();
        assert_eq!(sessions.active_session(), None);
    }
}
