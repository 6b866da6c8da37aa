//! Unified error handling for the gateway core.
//!
//! These errors cover construction and lifecycle failures (bad configuration,
//! a policy that cannot be instantiated, a collaborator that fails to start).
//! Per-request short-circuits are not errors; they travel as
//! [`Interruption`](super::interruption::Interruption) signals instead.

use std::fmt;

/// Unified error types for the request-execution core.
#[derive(Debug)]
pub enum GatewayError {
    /// Configuration parsing or validation errors
    Configuration(String),

    /// Policy instantiation or execution errors
    Policy(String),

    /// Security plan construction errors
    Security(String),

    /// Lifecycle errors (start/stop of reactors and collaborators)
    Lifecycle(String),

    /// Entrypoint connector resolution errors
    Entrypoint(String),

    /// Endpoint/invoker selection errors
    Endpoint(String),

    /// Validation errors
    Validation(String),

    /// Internal system errors
    Internal(String),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::Configuration(msg) => write!(f, "Configuration error: {msg}"),
            GatewayError::Policy(msg) => write!(f, "Policy error: {msg}"),
            GatewayError::Security(msg) => write!(f, "Security error: {msg}"),
            GatewayError::Lifecycle(msg) => write!(f, "Lifecycle error: {msg}"),
            GatewayError::Entrypoint(msg) => write!(f, "Entrypoint error: {msg}"),
            GatewayError::Endpoint(msg) => write!(f, "Endpoint error: {msg}"),
            GatewayError::Validation(msg) => write!(f, "Validation error: {msg}"),
            GatewayError::Internal(msg) => write!(f, "Internal error: {msg}"),
        }
    }
}

impl std::error::Error for GatewayError {}

impl From<validator::ValidationErrors> for GatewayError {
    fn from(err: validator::ValidationErrors) -> Self {
        GatewayError::Validation(err.to_string())
    }
}

impl From<serde_yaml::Error> for GatewayError {
    fn from(err: serde_yaml::Error) -> Self {
        GatewayError::Configuration(err.to_string())
    }
}

/// Result type alias for gateway operations
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Helper trait for adding context to errors
pub trait ErrorContext<T> {
    fn with_context(self, context: &str) -> GatewayResult<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: fmt::Display,
{
    fn with_context(self, context: &str) -> GatewayResult<T> {
        self.map_err(|e| GatewayError::Internal(format!("{context}: {e}")))
    }
}
