//! Type-safe identifier wrappers.
//!
//! Sessions are identified by UUID v7 so log lines sort by connect time.

use uuid::Uuid;

/// Unique identifier for one connected subscriber session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Create a new identifier using UUID v7 (time-ordered).
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Return the inner [`Uuid`] value.
    pub const fn into_inner(self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for SessionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle returned when a listener is registered with the
/// [`WorldStore`](crate::world::WorldStore).
///
/// Ids are allocated from a per-store counter and never reused, so a stale
/// id can only ever miss on removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(pub(crate) u64);

impl ListenerId {
    /// Return the raw counter value.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl core::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}
