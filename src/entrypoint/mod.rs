//! Entrypoint connectors.
//!
//! The entrypoint connector is the protocol-facing front-end adapter: it takes
//! over the inbound request after the security chain and writes the outbound
//! response at the end of the pipeline. The core only resolves and drives it;
//! concrete wire handling lives with the transport layer.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{Api, ListenerType};
use crate::core::{ExecutionContext, PhaseResult};

#[async_trait]
pub trait EntrypointConnector: Send + Sync {
    fn id(&self) -> &str;

    /// Whether this connector can take over the given request.
    fn supports(&self, ctx: &ExecutionContext) -> bool;

    async fn handle_request(&self, ctx: &mut ExecutionContext) -> PhaseResult;

    async fn handle_response(&self, ctx: &mut ExecutionContext) -> PhaseResult;
}

pub trait EntrypointConnectorResolver: Send + Sync {
    fn resolve(&self, ctx: &ExecutionContext) -> Option<Arc<dyn EntrypointConnector>>;

    /// Early shutdown signal, sent before the drain starts.
    fn pre_stop(&self) {}

    fn stop(&self) {}
}

/// Resolver over the connectors derived from the API's listeners. Evaluated
/// in registration order, first supporting connector wins.
pub struct DefaultEntrypointConnectorResolver {
    connectors: Vec<Arc<dyn EntrypointConnector>>,
}

impl DefaultEntrypointConnectorResolver {
    pub fn new(connectors: Vec<Arc<dyn EntrypointConnector>>) -> Self {
        Self { connectors }
    }

    pub fn from_api(api: &Api) -> Self {
        let mut connectors: Vec<Arc<dyn EntrypointConnector>> = Vec::new();
        for listener in &api.listeners {
            match listener.listener_type {
                ListenerType::Http => {
                    connectors.push(Arc::new(HttpProxyEntrypointConnector));
                }
                ListenerType::Subscription => {
                    log::warn!(
                        "No entrypoint connector available for subscription listener of api '{}'",
                        api.id
                    );
                }
            }
        }
        Self { connectors }
    }
}

impl EntrypointConnectorResolver for DefaultEntrypointConnectorResolver {
    fn resolve(&self, ctx: &ExecutionContext) -> Option<Arc<dyn EntrypointConnector>> {
        self.connectors.iter().find(|c| c.supports(ctx)).cloned()
    }

    fn stop(&self) {
        log::debug!("Entrypoint connector resolver stopped");
    }
}

/// Plain request/response front-end for proxy APIs.
pub struct HttpProxyEntrypointConnector;

#[async_trait]
impl EntrypointConnector for HttpProxyEntrypointConnector {
    fn id(&self) -> &str {
        "http-proxy"
    }

    fn supports(&self, ctx: &ExecutionContext) -> bool {
        ctx.metrics().api_type.as_deref() != Some("message")
    }

    async fn handle_request(&self, ctx: &mut ExecutionContext) -> PhaseResult {
        log::trace!("http-proxy entrypoint took over request {}", ctx.request().id);
        Ok(())
    }

    async fn handle_response(&self, _ctx: &mut ExecutionContext) -> PhaseResult {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use http::Method;

    use super::*;
    use crate::core::Request;

    #[test]
    fn test_resolver_returns_first_supporting_connector() {
        let api = Api::from_yaml(
            r#"
id: plain
name: Plain
listeners:
  - paths:
      - path: /plain
"#,
        )
        .unwrap();
        let resolver = DefaultEntrypointConnectorResolver::from_api(&api);

        let ctx = ExecutionContext::new(Request::new(Method::GET, "/plain"));
        let connector = resolver.resolve(&ctx).unwrap();
        assert_eq!(connector.id(), "http-proxy");
    }

    #[test]
    fn test_resolver_returns_none_for_message_contexts() {
        let api = Api::from_yaml(
            r#"
id: plain
name: Plain
listeners:
  - paths:
      - path: /plain
"#,
        )
        .unwrap();
        let resolver = DefaultEntrypointConnectorResolver::from_api(&api);

        let mut ctx = ExecutionContext::new(Request::new(Method::GET, "/plain"));
        ctx.metrics_mut().api_type = Some("message".to_string());
        assert!(resolver.resolve(&ctx).is_none());
    }
}
