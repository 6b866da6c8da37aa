//! Core abstractions of the request-execution engine.
//!
//! This module provides the per-request context, the interruption signal
//! model, the metrics record and the error types every other layer builds on.

pub mod context;
pub mod error;
pub mod interruption;
pub mod metrics;

pub use context::{
    Attributes, ComponentProvider, ExecutionContext, InternalAttributes, Request, Response,
    TemplateVariableProvider,
};
pub use error::{ErrorContext, GatewayError, GatewayResult};
pub use interruption::{ExecutionFailure, Interruption, PhaseResult};
pub use metrics::Metrics;

/// Execution phase at which flows and processors are selected and run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionPhase {
    Request,
    Response,
    MessageRequest,
    MessageResponse,
}

/// Lifecycle state shared by reactors and the host process.
///
/// Transitions only move forward: Initialized -> Started -> Stopping -> Stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Initialized,
    Started,
    Stopping,
    Stopped,
}

/// Host-process lifecycle view, consulted once during reactor shutdown to
/// choose between immediate stop and graceful drain.
pub trait Node: Send + Sync {
    fn lifecycle_state(&self) -> LifecycleState;
}
