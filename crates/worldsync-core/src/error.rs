//! Error types for the WorldSync core.
//!
//! Session errors never escape a session: they end the loop that raised
//! them, get logged, and trigger that session's teardown.

/// Errors that can end a subscriber session's inbound loop or its setup.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The inbound frame was not valid JSON.
    #[error("malformed frame: {source}")]
    MalformedFrame {
        /// The underlying JSON error.
        #[from]
        source: serde_json::Error,
    },

    /// The inbound frame parsed, but its top level was not a JSON object.
    #[error("frame is not an object of entities (found {found})")]
    NotAnObject {
        /// JSON type name of what was received instead.
        found: &'static str,
    },

    /// One entity in the frame did not map to an object of fields.
    #[error("entity {entity:?} must map to an object of fields (found {found})")]
    InvalidEntity {
        /// The offending entity id.
        entity: String,
        /// JSON type name of the value received for it.
        found: &'static str,
    },

    /// The initial world snapshot could not be encoded.
    #[error("failed to encode world snapshot: {source}")]
    Encode {
        /// The underlying JSON error.
        source: serde_json::Error,
    },
}

/// Name of a JSON value's type, for error messages.
pub(crate) const fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
