//! Error types for PromptGate

/// Result type alias using PromptGate's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for PromptGate operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A judge model response failed structural or nonce validation.
    /// Treated as a security event, not a transient fault.
    #[error("schema violation: {0}")]
    SchemaViolation(String),

    /// Every candidate model in a judge pass errored or timed out
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    /// The session/reputation store is unreachable or timed out
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Input exceeds the maximum accepted prompt size
    #[error("input too large: {size} bytes (limit {limit})")]
    InputTooLarge { size: usize, limit: usize },

    /// Admin request is missing a required field or carries an invalid value
    #[error("invalid admin input: {0}")]
    InvalidAdminInput(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Outbound HTTP errors
    #[error("http error: {0}")]
    Http(String),

    /// Network/IO errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new schema-violation error
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::SchemaViolation(msg.into())
    }

    /// Create a new model-unavailable error
    pub fn model_unavailable(msg: impl Into<String>) -> Self {
        Self::ModelUnavailable(msg.into())
    }

    /// Create a new store-unavailable error
    pub fn store_unavailable(msg: impl Into<String>) -> Self {
        Self::StoreUnavailable(msg.into())
    }

    /// Create a new admin-input error
    pub fn admin(msg: impl Into<String>) -> Self {
        Self::InvalidAdminInput(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
