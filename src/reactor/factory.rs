use std::sync::Arc;

use validator::Validate;

use crate::config::{Api, Flow, GatewayConfig};
use crate::core::{GatewayResult, Node};
use crate::endpoint::{EndpointInvoker, EndpointManager};
use crate::entrypoint::DefaultEntrypointConnectorResolver;
use crate::flow::{FlowChain, PlanFlowChain};
use crate::policy::{DefaultPolicyManager, PolicyManager};
use crate::processor::factory::ProcessorChainFactory;
use crate::resource::ResourceLifecycleManager;

use super::{ApiReactor, ReactorChains, ReactorWiring};

/// Builds one reactor per deployed API definition.
///
/// Construction validates the definition and compiles every chain; a
/// definition that fails here never becomes a reactor, so it can never
/// receive traffic.
pub struct ReactorFactory {
    configuration: GatewayConfig,
    node: Arc<dyn Node>,
}

impl ReactorFactory {
    pub fn new(configuration: GatewayConfig, node: Arc<dyn Node>) -> Self {
        Self {
            configuration,
            node,
        }
    }

    pub fn create(
        &self,
        api: Api,
        platform_flows: &[Flow],
        endpoint_manager: Arc<EndpointManager>,
    ) -> GatewayResult<ApiReactor> {
        api.validate()?;
        log::info!("Configuring API reactor: {}", api.id);

        let policy_manager: Arc<dyn PolicyManager> = Arc::new(DefaultPolicyManager::new());
        let resource_manager = Arc::new(ResourceLifecycleManager::new());
        let entrypoint_resolver = Arc::new(DefaultEntrypointConnectorResolver::from_api(&api));
        let default_invoker = Arc::new(EndpointInvoker::new(endpoint_manager.clone()));

        let chains = ReactorChains {
            before_handle: ProcessorChainFactory::before_handle(&api),
            before_security_chain: ProcessorChainFactory::before_security_chain(&api),
            before_api_execution: ProcessorChainFactory::before_api_execution(&api),
            after_api_execution: ProcessorChainFactory::after_api_execution(&api),
            after_entrypoint_request: ProcessorChainFactory::after_entrypoint_request(&api),
            before_entrypoint_response: ProcessorChainFactory::before_entrypoint_response(&api),
            on_error: ProcessorChainFactory::on_error(&api),
            after_handle: ProcessorChainFactory::after_handle(&api),
            platform_flow_chain: FlowChain::compile(
                "platform",
                platform_flows,
                api.flow_mode,
                policy_manager.as_ref(),
            )?,
            plan_flow_chain: PlanFlowChain::compile(
                &api.plans,
                api.flow_mode,
                policy_manager.as_ref(),
            )?,
            api_flow_chain: FlowChain::compile(
                "api",
                &api.flows,
                api.flow_mode,
                policy_manager.as_ref(),
            )?,
        };

        let wiring = ReactorWiring {
            component_provider: None,
            template_variable_providers: Vec::new(),
            policy_manager,
            resource_manager,
            endpoint_manager,
            entrypoint_resolver,
            default_invoker,
            node: self.node.clone(),
        };

        Ok(ApiReactor::new(
            api,
            self.configuration.clone(),
            wiring,
            chains,
        ))
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use bytes::Bytes;
    use http::{Method, StatusCode};

    use super::*;
    use crate::core::{
        ExecutionContext, LifecycleState, PhaseResult, Request,
    };
    use crate::endpoint::{EndpointConnector, ManagedEndpoint};

    struct TestNode;

    impl Node for TestNode {
        fn lifecycle_state(&self) -> LifecycleState {
            LifecycleState::Started
        }
    }

    struct BackendConnector;

    #[async_trait]
    impl EndpointConnector for BackendConnector {
        fn id(&self) -> &str {
            "backend"
        }

        async fn invoke(&self, ctx: &mut ExecutionContext) -> PhaseResult {
            ctx.response_mut().status = StatusCode::OK;
            ctx.response_mut().body = Some(Bytes::from_static(b"backend"));
            Ok(())
        }
    }

    const API_YAML: &str = r#"
id: store-api
name: Store API
listeners:
  - paths:
      - path: /store
plans:
  - id: open
    name: Open
    security:
      type: keyless
flows:
  - response:
      - policy: header-rewrite
        configuration:
          set_response_headers:
            X-Gateway: apiflow
"#;

    fn endpoint_manager() -> Arc<EndpointManager> {
        let manager = Arc::new(EndpointManager::new());
        manager.register(ManagedEndpoint {
            name: "default".to_string(),
            target: "http://backend.local".to_string(),
            connector: Arc::new(BackendConnector),
        });
        manager
    }

    #[tokio::test]
    async fn test_created_reactor_serves_a_request_end_to_end() {
        let api = Api::from_yaml(API_YAML).unwrap();
        let factory = ReactorFactory::new(GatewayConfig::default(), Arc::new(TestNode));
        let reactor = factory.create(api, &[], endpoint_manager()).unwrap();

        reactor.start().unwrap();
        assert_eq!(reactor.lifecycle_state(), LifecycleState::Started);

        let request = Request::new(Method::GET, "/store/items").with_context_path("/store");
        let mut ctx = ExecutionContext::new(request);
        reactor.handle(&mut ctx).await;

        assert!(ctx.response().ended());
        assert_eq!(ctx.response().status, StatusCode::OK);
        assert_eq!(ctx.response().body.as_deref(), Some(b"backend".as_slice()));
        assert_eq!(ctx.attributes.plan.as_deref(), Some("open"));
        assert!(ctx.response().headers.contains_key("x-gateway"));
        assert!(ctx.response().headers.contains_key("x-request-id"));
        assert_eq!(ctx.metrics().status, Some(200));
        assert_eq!(reactor.pending_requests(), 0);

        reactor.stop().await;
        assert_eq!(reactor.lifecycle_state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_rejected_request_gets_error_body_from_on_error_chain() {
        let api = Api::from_yaml(
            r#"
id: secured-api
name: Secured API
listeners:
  - paths:
      - path: /secured
plans:
  - id: gold
    name: Gold
    security:
      type: key-auth
      configuration:
        keys: ["s3cr3t"]
"#,
        )
        .unwrap();
        let factory = ReactorFactory::new(GatewayConfig::default(), Arc::new(TestNode));
        let reactor = factory.create(api, &[], endpoint_manager()).unwrap();
        reactor.start().unwrap();

        // No credentials at all: no plan matches, the chain fails closed.
        let request = Request::new(Method::GET, "/secured/items").with_context_path("/secured");
        let mut ctx = ExecutionContext::new(request);
        reactor.handle(&mut ctx).await;

        assert!(ctx.response().ended());
        assert_eq!(ctx.response().status, StatusCode::UNAUTHORIZED);
        let body = ctx.response().body.as_ref().unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(body).unwrap();
        assert_eq!(parsed["http_status_code"], 401);
    }

    #[test]
    fn test_invalid_definition_is_rejected() {
        let api = Api {
            listeners: Vec::new(),
            ..Api::from_yaml(API_YAML).unwrap()
        };
        let factory = ReactorFactory::new(GatewayConfig::default(), Arc::new(TestNode));
        assert!(factory.create(api, &[], endpoint_manager()).is_err());
    }

    #[test]
    fn test_unknown_flow_policy_is_rejected() {
        let api = Api::from_yaml(
            r#"
id: broken-api
name: Broken API
listeners:
  - paths:
      - path: /broken
flows:
  - request:
      - policy: does-not-exist
"#,
        )
        .unwrap();
        let factory = ReactorFactory::new(GatewayConfig::default(), Arc::new(TestNode));
        assert!(factory.create(api, &[], endpoint_manager()).is_err());
    }
}
