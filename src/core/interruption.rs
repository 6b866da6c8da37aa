//! Interruption signals and execution failures.
//!
//! A phase that wants to stop the request pipeline does not return a
//! [`GatewayError`]; it returns an [`Interruption`]. The reactor inspects the
//! kind of interruption to pick the right recovery chain: benign interruptions
//! resume through the post-execution processors, failures and unexpected
//! errors go through the error processors.

use http::StatusCode;

use super::error::GatewayError;

/// Failure key set when the request timeout budget is exhausted.
pub const REQUEST_TIMEOUT_KEY: &str = "REQUEST_TIMEOUT";
/// Failure key set when no security plan matches the incoming request.
pub const PLAN_UNRESOLVABLE_KEY: &str = "PLAN_UNRESOLVABLE";
/// Failure key set when no endpoint can be resolved for the backend call.
pub const NO_ENDPOINT_KEY: &str = "NO_ENDPOINT_FOUND";

pub const NO_ENTRYPOINT_FAILURE_MESSAGE: &str = "No entrypoint matches the incoming request";
pub const REQUEST_TIMEOUT_MESSAGE: &str = "Request timeout";

/// A deliberate execution failure carrying what the client should see.
///
/// The reactor never writes a response body itself; the on-error processor
/// chain shapes the final response from the failure recorded here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionFailure {
    status: StatusCode,
    key: Option<String>,
    message: Option<String>,
    content_type: Option<String>,
}

impl ExecutionFailure {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            key: None,
            message: None,
            content_type: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }
}

/// The three ways a phase can short-circuit the pipeline.
#[derive(Debug)]
pub enum Interruption {
    /// Deliberate early-exit with no failure attached (e.g. a CORS pre-flight
    /// that needs no further flows).
    Stop,

    /// Deliberate early-exit carrying an HTTP status/message/key.
    Failure(ExecutionFailure),

    /// Anything not raised through the interruption mechanism. Always logged
    /// before recovery.
    Unexpected(GatewayError),
}

impl std::fmt::Display for Interruption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Interruption::Stop => write!(f, "interrupted"),
            Interruption::Failure(failure) => {
                write!(f, "interrupted with failure: status={}", failure.status())?;
                if let Some(key) = failure.key() {
                    write!(f, " key={key}")?;
                }
                if let Some(message) = failure.message() {
                    write!(f, " message={message}")?;
                }
                Ok(())
            }
            Interruption::Unexpected(err) => write!(f, "{err}"),
        }
    }
}

impl From<GatewayError> for Interruption {
    fn from(err: GatewayError) -> Self {
        Interruption::Unexpected(err)
    }
}

/// Result of one phase of the request pipeline.
pub type PhaseResult = Result<(), Interruption>;
