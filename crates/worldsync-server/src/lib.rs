//! HTTP + `WebSocket` server for the WorldSync shared world.
//!
//! This crate provides an Axum server that exposes:
//!
//! - **`WebSocket` endpoint** (`/subscribe`) -- each connection becomes a
//!   [`Session`](worldsync_core::Session): it receives the whole world,
//!   then every change, and may write changes of its own
//! - **REST pass-throughs** for reading and replacing entities, reading
//!   the whole world, and clearing it
//! - **Static files** under `/static` for the bundled browser client
//!
//! # Architecture
//!
//! One [`WorldStore`](worldsync_core::WorldStore) lives in [`AppState`].
//! Changes fan out synchronously from the store into per-session queues,
//! so a slow client only ever delays itself.

pub mod error;
pub mod handlers;
pub mod router;
pub mod server;
pub mod state;
pub mod ws;

// Re-export primary types for convenience.
pub use error::ApiError;
pub use router::build_router;
pub use server::{ServerConfig, ServerError, ctrl_c, start_server};
pub use state::AppState;
