//! Processors and processor chains.
//!
//! A processor is an internal pipeline participant (unlike policies, which are
//! user-configured). The reactor owns a fixed set of chains (before-handle,
//! before-security, on-error, after-handle, ...) assembled once per API by the
//! [`factory::ProcessorChainFactory`].

pub mod cors;
pub mod factory;
pub mod failure;
pub mod metrics;
pub mod transaction;

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::{ExecutionContext, ExecutionPhase, PhaseResult};

#[async_trait]
pub trait Processor: Send + Sync {
    fn id(&self) -> &str;

    async fn process(&self, ctx: &mut ExecutionContext, phase: ExecutionPhase) -> PhaseResult;
}

/// An ordered list of processors executed for one phase.
///
/// The chain completes normally if every processor completes normally, stops
/// at the first interruption (skipping the rest) and propagates unexpected
/// errors to the caller. No retries happen here.
pub struct ProcessorChain {
    id: String,
    processors: Vec<Arc<dyn Processor>>,
}

impl ProcessorChain {
    pub fn new(id: impl Into<String>, processors: Vec<Arc<dyn Processor>>) -> Self {
        Self {
            id: id.into(),
            processors,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn execute(&self, ctx: &mut ExecutionContext, phase: ExecutionPhase) -> PhaseResult {
        for processor in &self.processors {
            log::trace!("Executing processor {} of chain {}", processor.id(), self.id);
            processor.process(ctx, phase).await?;
        }
        Ok(())
    }
}
