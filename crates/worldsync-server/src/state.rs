//! Shared application state for the WorldSync server.
//!
//! [`AppState`] owns the one [`WorldStore`] every handler and session works
//! against, plus a registry of live sessions so shutdown can release them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};
use worldsync_core::{SessionHandle, SessionId, WorldStore};

/// Shared state for the Axum application.
///
/// Wrapped in [`Arc`] and injected via Axum's `State` extractor.
#[derive(Debug)]
pub struct AppState {
    /// The shared world.
    pub world: Arc<WorldStore>,
    /// Live session registry.
    sessions: Mutex<Registry>,
}

/// Handles of running sessions, and whether shutdown has swept them.
#[derive(Debug, Default)]
struct Registry {
    live: HashMap<SessionId, SessionHandle>,
    closing: bool,
}

impl AppState {
    /// Create application state around a fresh, empty world.
    pub fn new() -> Self {
        Self::with_world(Arc::new(WorldStore::new()))
    }

    /// Create application state around an existing world.
    pub fn with_world(world: Arc<WorldStore>) -> Self {
        Self {
            world,
            sessions: Mutex::new(Registry::default()),
        }
    }

    /// Record a running session.
    ///
    /// Once [`close_all_sessions`](Self::close_all_sessions) has run, new
    /// sessions are closed instead of tracked and `false` is returned.
    pub fn track(&self, handle: SessionHandle) -> bool {
        let mut registry = self.lock_sessions();
        if registry.closing {
            handle.close();
            debug!(session_id = %handle.id(), "Session refused during shutdown");
            return false;
        }
        registry.live.insert(handle.id(), handle);
        true
    }

    /// Forget a session that has finished. Unknown ids are ignored.
    pub fn untrack(&self, id: SessionId) {
        self.lock_sessions().live.remove(&id);
    }

    /// Number of sessions currently running.
    pub fn session_count(&self) -> usize {
        self.lock_sessions().live.len()
    }

    /// Release every live session: sweep all listeners off the world in
    /// one pass, then close each session's queue so both of its loops
    /// exit. Sessions removing their own listener afterwards is harmless.
    /// Sessions that try to register later are refused by [`track`](Self::track).
    ///
    /// Returns the number of sessions closed.
    pub fn close_all_sessions(&self) -> usize {
        let handles: Vec<SessionHandle> = {
            let mut registry = self.lock_sessions();
            registry.closing = true;
            registry.live.drain().map(|(_, h)| h).collect()
        };
        let listeners = self.world.remove_all_listeners();
        for handle in &handles {
            handle.close();
        }
        info!(sessions = handles.len(), listeners, "Closed all sessions");
        handles.len()
    }

    fn lock_sessions(&self) -> MutexGuard<'_, Registry> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use worldsync_core::Session;

    use super::*;

    #[test]
    fn track_and_untrack() {
        let state = AppState::new();
        let session = Session::connect(Arc::clone(&state.world)).unwrap();
        let id = session.id();

        assert!(state.track(session.handle()));
        assert_eq!(state.session_count(), 1);

        state.untrack(id);
        state.untrack(id);
        assert_eq!(state.session_count(), 0);
    }

    #[test]
    fn close_all_sessions_closes_handles_and_sweeps_listeners() {
        let state = AppState::new();
        let a = Session::connect(Arc::clone(&state.world)).unwrap();
        let b = Session::connect(Arc::clone(&state.world)).unwrap();
        state.track(a.handle());
        state.track(b.handle());
        assert_eq!(state.world.listener_count(), 2);

        assert_eq!(state.close_all_sessions(), 2);
        assert_eq!(state.session_count(), 0);
        assert_eq!(state.world.listener_count(), 0);
        assert!(a.handle().is_closed());
        assert!(b.handle().is_closed());

        // Each session's own teardown still runs cleanly on drop.
        drop(a);
        drop(b);
        assert_eq!(state.world.listener_count(), 0);
    }

    #[test]
    fn session_connecting_during_shutdown_is_closed_not_tracked() {
        let state = AppState::new();
        let early = Session::connect(Arc::clone(&state.world)).unwrap();
        assert!(state.track(early.handle()));

        // Connected before the sweep, tracked after it.
        let late = Session::connect(Arc::clone(&state.world)).unwrap();
        assert_eq!(state.close_all_sessions(), 1);

        assert!(!state.track(late.handle()));
        assert!(late.handle().is_closed());
        assert_eq!(state.session_count(), 0);

        drop(late);
        assert_eq!(state.world.listener_count(), 0);
    }
}
