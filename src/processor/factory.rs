use std::sync::Arc;

use crate::config::Api;

use super::{
    cors::CorsProcessor, failure::FailureProcessor, metrics::MetricsProcessor,
    transaction::TransactionProcessor, Processor, ProcessorChain,
};

/// Builds the per-API processor chains the reactor runs around flows.
///
/// Chains are assembled once at reactor construction; most of them are empty
/// unless the API definition asks for more (e.g. CORS).
pub struct ProcessorChainFactory;

impl ProcessorChainFactory {
    pub fn before_handle(_api: &Api) -> ProcessorChain {
        ProcessorChain::new(
            "before-handle",
            vec![Arc::new(TransactionProcessor) as Arc<dyn Processor>],
        )
    }

    pub fn before_security_chain(api: &Api) -> ProcessorChain {
        let mut processors: Vec<Arc<dyn Processor>> = Vec::new();
        if let Some(cors) = &api.cors {
            processors.push(Arc::new(CorsProcessor::new(cors.clone())));
        }
        ProcessorChain::new("before-security-chain", processors)
    }

    pub fn before_api_execution(_api: &Api) -> ProcessorChain {
        ProcessorChain::new("before-api-execution", Vec::new())
    }

    pub fn after_api_execution(_api: &Api) -> ProcessorChain {
        ProcessorChain::new("after-api-execution", Vec::new())
    }

    /// Message APIs only: runs right after the entrypoint connector has taken
    /// over the request.
    pub fn after_entrypoint_request(_api: &Api) -> ProcessorChain {
        ProcessorChain::new("after-entrypoint-request", Vec::new())
    }

    /// Message APIs only: runs right before the entrypoint connector writes
    /// the response.
    pub fn before_entrypoint_response(_api: &Api) -> ProcessorChain {
        ProcessorChain::new("before-entrypoint-response", Vec::new())
    }

    pub fn on_error(_api: &Api) -> ProcessorChain {
        ProcessorChain::new(
            "on-error",
            vec![Arc::new(FailureProcessor) as Arc<dyn Processor>],
        )
    }

    pub fn after_handle(_api: &Api) -> ProcessorChain {
        ProcessorChain::new(
            "after-handle",
            vec![Arc::new(MetricsProcessor) as Arc<dyn Processor>],
        )
    }
}
