//! Error types for the WorldSync binary.
//!
//! [`AppError`] is the top-level error that `main` propagates with `?`.

/// Top-level error for the WorldSync binary.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: worldsync_core::config::ConfigError,
    },

    /// The configured log filter could not be parsed.
    #[error("invalid log filter {filter:?}: {message}")]
    LogFilter {
        /// The rejected directive.
        filter: String,
        /// Parser message.
        message: String,
    },

    /// The HTTP server failed to start or crashed.
    #[error("server error: {source}")]
    Server {
        /// The underlying server error.
        #[from]
        source: worldsync_server::ServerError,
    },
}
