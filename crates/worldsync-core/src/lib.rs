//! Core of the WorldSync shared-world service.
//!
//! Clients connected over persistent duplex connections share one
//! key-value world: any client's change to an entity is broadcast to every
//! connected client, and a newly connected client first receives the whole
//! world.
//!
//! # Modules
//!
//! - [`world`] -- [`WorldStore`], the concurrency-safe entity map with
//!   synchronous listener fan-out.
//! - [`queue`] -- Unbounded per-session outbound queue with a close
//!   (poison) signal.
//! - [`session`] -- [`Session`], which ties one connection to the world
//!   through its own queue and tears down exactly once.
//! - [`config`] -- Configuration loading from `worldsync.yaml`.
//! - [`ids`] -- Typed identifiers.
//! - [`error`] -- Session error type.
//!
//! [`WorldStore`]: world::WorldStore
//! [`Session`]: session::Session

pub mod config;
pub mod error;
pub mod ids;
pub mod queue;
pub mod session;
pub mod world;

// Re-export primary types for convenience.
pub use error::SessionError;
pub use ids::{ListenerId, SessionId};
pub use session::{ExitCause, Session, SessionHandle, SessionSummary};
pub use world::{Fields, Listener, WorldMap, WorldStore};
