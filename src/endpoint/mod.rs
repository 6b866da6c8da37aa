//! Endpoints and backend invocation.
//!
//! The invoker is the backend-facing seam of the pipeline: the reactor stores
//! the default invoker as an internal context attribute so policies can
//! replace it (or flag it to be skipped) before the backend call happens.
//! Actual connection handling belongs to the [`EndpointConnector`]
//! implementations supplied by the integration layer.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dashmap::DashMap;
use http::StatusCode;

use crate::core::interruption::NO_ENDPOINT_KEY;
use crate::core::{ExecutionContext, ExecutionFailure, GatewayResult, PhaseResult};

#[async_trait]
pub trait Invoker: Send + Sync {
    /// Identifier used for hooks and tracing.
    fn id(&self) -> &str;

    async fn invoke(&self, ctx: &mut ExecutionContext) -> PhaseResult;
}

/// Backend adapter bound to one endpoint.
#[async_trait]
pub trait EndpointConnector: Send + Sync {
    fn id(&self) -> &str;

    async fn invoke(&self, ctx: &mut ExecutionContext) -> PhaseResult;
}

pub struct ManagedEndpoint {
    pub name: String,
    pub target: String,
    pub connector: Arc<dyn EndpointConnector>,
}

/// Registry of the endpoints an API can reach.
///
/// The first registered endpoint acts as the default. Registration happens at
/// wiring time; per-request code only reads.
#[derive(Default)]
pub struct EndpointManager {
    endpoints: DashMap<String, Arc<ManagedEndpoint>>,
    order: Mutex<Vec<String>>,
}

impl EndpointManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, endpoint: ManagedEndpoint) {
        let name = endpoint.name.clone();
        self.endpoints.insert(name.clone(), Arc::new(endpoint));
        let mut order = self.order.lock().unwrap_or_else(|e| e.into_inner());
        if !order.contains(&name) {
            order.push(name);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<ManagedEndpoint>> {
        self.endpoints.get(name).map(|e| e.value().clone())
    }

    pub fn default_endpoint(&self) -> Option<Arc<ManagedEndpoint>> {
        let order = self.order.lock().unwrap_or_else(|e| e.into_inner());
        order.iter().find_map(|name| self.get(name))
    }

    pub fn start(&self) -> GatewayResult<()> {
        log::debug!("Endpoint manager started ({} endpoints)", self.endpoints.len());
        Ok(())
    }

    pub fn pre_stop(&self) {
        log::debug!("Endpoint manager preparing to stop");
    }

    pub fn stop(&self) -> GatewayResult<()> {
        log::debug!("Endpoint manager stopped");
        Ok(())
    }
}

/// Default invoker: resolves the default endpoint and delegates to its
/// connector.
pub struct EndpointInvoker {
    manager: Arc<EndpointManager>,
}

impl EndpointInvoker {
    pub fn new(manager: Arc<EndpointManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Invoker for EndpointInvoker {
    fn id(&self) -> &str {
        "endpoint-invoker"
    }

    async fn invoke(&self, ctx: &mut ExecutionContext) -> PhaseResult {
        let Some(endpoint) = self.manager.default_endpoint() else {
            return Err(ctx.interrupt_with(
                ExecutionFailure::new(StatusCode::SERVICE_UNAVAILABLE)
                    .with_key(NO_ENDPOINT_KEY)
                    .with_message("No endpoint available"),
            ));
        };
        log::trace!("Invoking endpoint '{}' ({})", endpoint.name, endpoint.target);
        endpoint.connector.invoke(ctx).await
    }
}
