//! The per-API request reactor.
//!
//! One [`ApiReactor`] instance serves one deployed API definition. It owns the
//! full per-request lifecycle: the phased pipeline (processor chains, platform
//! flows, security chain, plan/API flows, backend invocation, response flows),
//! the timeout budget, the error-recovery branches, the lifecycle state and
//! the pending-request accounting that gates graceful shutdown.
//!
//! The reactor itself is shared, read-mostly wiring; everything mutable about
//! a request lives in its [`ExecutionContext`].

pub mod factory;

use std::sync::{
    atomic::{AtomicI64, AtomicU8, Ordering},
    Arc,
};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use http::StatusCode;
use once_cell::sync::OnceCell;

use crate::config::{Api, ApiType, GatewayConfig, ListenerType};
use crate::core::interruption::{
    NO_ENTRYPOINT_FAILURE_MESSAGE, REQUEST_TIMEOUT_KEY, REQUEST_TIMEOUT_MESSAGE,
};
use crate::core::{
    ComponentProvider, ExecutionContext, ExecutionFailure, ExecutionPhase, GatewayResult,
    Interruption, LifecycleState, Node, PhaseResult, TemplateVariableProvider,
};
use crate::endpoint::{EndpointManager, Invoker};
use crate::entrypoint::EntrypointConnectorResolver;
use crate::flow::{FlowChain, PlanFlowChain};
use crate::policy::PolicyManager;
use crate::processor::ProcessorChain;
use crate::resource::ResourceLifecycleManager;
use crate::security::SecurityChain;

/// Route descriptor derived from the API's listeners; an external router uses
/// these to decide which reactor receives a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acceptor {
    pub host: Option<String>,
    pub path: String,
}

/// Collaborators wired into a reactor at construction time.
pub struct ReactorWiring {
    pub component_provider: Option<Arc<dyn ComponentProvider>>,
    pub template_variable_providers: Vec<Arc<dyn TemplateVariableProvider>>,
    pub policy_manager: Arc<dyn PolicyManager>,
    pub resource_manager: Arc<ResourceLifecycleManager>,
    pub endpoint_manager: Arc<EndpointManager>,
    pub entrypoint_resolver: Arc<dyn EntrypointConnectorResolver>,
    pub default_invoker: Arc<dyn Invoker>,
    pub node: Arc<dyn Node>,
}

/// Processor and flow chains assembled once per API.
pub struct ReactorChains {
    pub before_handle: ProcessorChain,
    pub before_security_chain: ProcessorChain,
    pub before_api_execution: ProcessorChain,
    pub after_api_execution: ProcessorChain,
    pub after_entrypoint_request: ProcessorChain,
    pub before_entrypoint_response: ProcessorChain,
    pub on_error: ProcessorChain,
    pub after_handle: ProcessorChain,
    pub platform_flow_chain: FlowChain,
    pub plan_flow_chain: PlanFlowChain,
    pub api_flow_chain: FlowChain,
}

/// Sections the request timeout budget is applied to independently.
#[derive(Clone, Copy)]
enum TimedSection {
    RequestChain,
    PlatformResponseFlows,
    EntrypointResponse,
}

pub struct ApiReactor {
    api: Api,
    configuration: GatewayConfig,
    component_provider: Option<Arc<dyn ComponentProvider>>,
    template_variable_providers: Vec<Arc<dyn TemplateVariableProvider>>,
    policy_manager: Arc<dyn PolicyManager>,
    resource_manager: Arc<ResourceLifecycleManager>,
    endpoint_manager: Arc<EndpointManager>,
    entrypoint_resolver: Arc<dyn EntrypointConnectorResolver>,
    default_invoker: Arc<dyn Invoker>,
    chains: ReactorChains,
    // Built during start(), once the policy manager is up.
    security_chain: ArcSwapOption<SecurityChain>,
    node: Arc<dyn Node>,
    lifecycle_state: AtomicU8,
    pending_requests: Arc<AtomicI64>,
    acceptors: OnceCell<Vec<Acceptor>>,
}

impl ApiReactor {
    pub fn new(
        api: Api,
        configuration: GatewayConfig,
        wiring: ReactorWiring,
        chains: ReactorChains,
    ) -> Self {
        Self {
            api,
            configuration,
            component_provider: wiring.component_provider,
            template_variable_providers: wiring.template_variable_providers,
            policy_manager: wiring.policy_manager,
            resource_manager: wiring.resource_manager,
            endpoint_manager: wiring.endpoint_manager,
            entrypoint_resolver: wiring.entrypoint_resolver,
            default_invoker: wiring.default_invoker,
            chains,
            security_chain: ArcSwapOption::empty(),
            node: wiring.node,
            lifecycle_state: AtomicU8::new(state_to_u8(LifecycleState::Initialized)),
            pending_requests: Arc::new(AtomicI64::new(0)),
            acceptors: OnceCell::new(),
        }
    }

    pub fn api(&self) -> &Api {
        &self.api
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        state_from_u8(self.lifecycle_state.load(Ordering::SeqCst))
    }

    /// Number of requests currently executing inside this reactor.
    pub fn pending_requests(&self) -> i64 {
        self.pending_requests.load(Ordering::SeqCst)
    }

    /// Route descriptors derived from the API's HTTP listeners, built lazily
    /// and cached.
    pub fn acceptors(&self) -> &[Acceptor] {
        self.acceptors.get_or_init(|| {
            let mut acceptors = Vec::new();
            for listener in &self.api.listeners {
                if listener.listener_type == ListenerType::Http {
                    for path in &listener.paths {
                        acceptors.push(Acceptor {
                            host: path.host.clone(),
                            path: path.path.clone(),
                        });
                    }
                }
            }
            acceptors
        })
    }

    /// Wires runtime collaborators and flips the reactor to `Started`.
    ///
    /// A reactor whose start fails must not be registered to receive traffic.
    pub fn start(&self) -> GatewayResult<()> {
        log::debug!("API reactor is now starting, preparing API context...");
        let start_time = std::time::Instant::now();

        // Start resources before the policy manager.
        self.resource_manager.start()?;
        self.policy_manager.start()?;

        // Create the security chain once the policy manager has been started.
        let security_chain = SecurityChain::new(&self.api, self.policy_manager.as_ref());
        self.security_chain.store(Some(Arc::new(security_chain)));

        self.endpoint_manager.start()?;

        self.advance_lifecycle(LifecycleState::Started);

        log::debug!(
            "API reactor started in {} ms",
            start_time.elapsed().as_millis()
        );
        self.dump_acceptors();
        Ok(())
    }

    /// Flips to `Stopping`, drains pending requests (bounded by
    /// `pending_requests_timeout`, skipped entirely when the host process is
    /// not fully started) and releases collaborators.
    pub async fn stop(&self) {
        self.advance_lifecycle(LifecycleState::Stopping);

        self.entrypoint_resolver.pre_stop();
        self.endpoint_manager.pre_stop();

        if self.node.lifecycle_state() != LifecycleState::Started {
            log::debug!("Current node is not started, API reactor will be stopped immediately");
            self.stop_now();
        } else {
            log::debug!(
                "Current node is started, API reactor will wait for pending requests before stopping"
            );
            let deadline = tokio::time::Instant::now()
                + Duration::from_millis(self.configuration.pending_requests_timeout);
            let mut tick = tokio::time::interval(Duration::from_millis(100));
            tick.tick().await;
            while self.pending_requests.load(Ordering::SeqCst) > 0
                && tokio::time::Instant::now() < deadline
            {
                tick.tick().await;
            }
            self.stop_now();
        }
    }

    fn stop_now(&self) {
        log::debug!("API reactor is now stopping, closing context for api '{}'", self.api.id);

        self.entrypoint_resolver.stop();
        if let Err(e) = self.endpoint_manager.stop() {
            log::warn!("Failed to stop endpoint manager: {e}");
        }
        if let Err(e) = self.policy_manager.stop() {
            log::warn!("Failed to stop policy manager: {e}");
        }
        if let Err(e) = self.resource_manager.stop() {
            log::warn!("Failed to stop resource manager: {e}");
        }

        self.advance_lifecycle(LifecycleState::Stopped);
        log::debug!("API reactor is now stopped: api '{}'", self.api.id);
    }

    // Lifecycle only moves forward; a stale transition is ignored.
    fn advance_lifecycle(&self, state: LifecycleState) {
        self.lifecycle_state
            .fetch_max(state_to_u8(state), Ordering::SeqCst);
    }

    fn dump_acceptors(&self) {
        log::debug!("API '{}' ready to accept requests on:", self.api.id);
        for acceptor in self.acceptors() {
            log::debug!("\thost={:?} path={}", acceptor.host, acceptor.path);
        }
    }

    /// Runs the full request lifecycle for one context.
    ///
    /// Never fails and never panics the caller: every interruption or error is
    /// converted into a recovery path, and the response is always ended. The
    /// pending-request counter is balanced even if the future is dropped
    /// mid-flight.
    pub async fn handle(&self, ctx: &mut ExecutionContext) {
        debug_assert!(
            ctx.attributes.api.is_none(),
            "context is already bound to a reactor"
        );
        let _pending = PendingRequest::enter(&self.pending_requests);

        if self.configuration.tracing {
            log::debug!(
                "Handling request {} on api '{}'",
                ctx.request().id,
                self.api.id
            );
        }

        if let Some(provider) = &self.component_provider {
            ctx.bind_component_provider(provider.clone());
        }
        if !self.template_variable_providers.is_empty() {
            ctx.bind_template_variable_providers(self.template_variable_providers.clone());
        }

        self.prepare_context_attributes(ctx);
        self.prepare_metrics(ctx);

        self.handle_request(ctx).await;
    }

    fn prepare_context_attributes(&self, ctx: &mut ExecutionContext) {
        ctx.attributes.context_path = Some(ctx.request().context_path.clone());
        ctx.attributes.api = Some(self.api.id.clone());
        ctx.attributes.deployed_at = self.api.deployed_at;
        ctx.attributes.organization = self.api.organization_id.clone();
        ctx.attributes.environment = self.api.environment_id.clone();
        ctx.internal.invoker = Some(self.default_invoker.clone());
    }

    fn prepare_metrics(&self, ctx: &mut ExecutionContext) {
        let metrics = ctx.metrics_mut();
        metrics.api_id = Some(self.api.id.clone());
        metrics.api_name = Some(self.api.name.clone());
        metrics.api_type = Some(self.api.api_type.label().to_string());
    }

    async fn handle_request(&self, ctx: &mut ExecutionContext) {
        // Main chain (request phases + their recovery), under the timeout
        // budget.
        let mut outcome = self.timed(ctx, TimedSection::RequestChain).await;

        // Platform response flows always run, whatever happened upstream,
        // under their own timeout budget.
        let platform = self.timed(ctx, TimedSection::PlatformResponseFlows).await;
        outcome = outcome.and(platform);

        if self.is_message_api() {
            let before_response = self
                .chains
                .before_entrypoint_response
                .execute(ctx, ExecutionPhase::MessageResponse)
                .await;
            outcome = outcome.and(before_response);
        }

        let entrypoint = self.timed(ctx, TimedSection::EntrypointResponse).await;
        outcome = outcome.and(entrypoint);

        if let Err(interruption) = outcome {
            self.handle_unexpected_error(ctx, &interruption);
        }

        if let Err(interruption) = self
            .chains
            .after_handle
            .execute(ctx, ExecutionPhase::Response)
            .await
        {
            self.handle_unexpected_error(ctx, &interruption);
        }

        ctx.response_mut().end();
    }

    /// Applies the request timeout budget to one section.
    ///
    /// Zero or negative `request_timeout` disables the budget. Otherwise the
    /// remaining budget is at least the grace delay, so post phases get a
    /// chance to shape the response even when the deadline already passed.
    async fn timed(&self, ctx: &mut ExecutionContext, section: TimedSection) -> PhaseResult {
        if self.configuration.request_timeout <= 0 {
            return self.run_section(ctx, section).await;
        }

        let elapsed = ctx.request().timestamp.elapsed().as_millis() as i64;
        let budget = (self.configuration.request_timeout - elapsed)
            .max(self.configuration.request_timeout_grace_delay)
            .max(0) as u64;

        let outcome = tokio::time::timeout(
            Duration::from_millis(budget),
            self.run_section(ctx, section),
        )
        .await;

        match outcome {
            Ok(result) => result,
            Err(_) => self.on_timeout(ctx).await,
        }
    }

    async fn run_section(&self, ctx: &mut ExecutionContext, section: TimedSection) -> PhaseResult {
        match section {
            TimedSection::RequestChain => {
                let result = self.request_chain(ctx).await;
                self.process_result(ctx, result).await
            }
            TimedSection::PlatformResponseFlows => {
                self.chains
                    .platform_flow_chain
                    .execute(ctx, ExecutionPhase::Response)
                    .await?;
                if self.is_message_api() {
                    self.chains
                        .platform_flow_chain
                        .execute(ctx, ExecutionPhase::MessageResponse)
                        .await?;
                }
                Ok(())
            }
            TimedSection::EntrypointResponse => self.handle_entrypoint_response(ctx).await,
        }
    }

    /// The happy-path phase sequence. Any interruption or error short-circuits
    /// to the recovery branch in [`Self::process_result`].
    async fn request_chain(&self, ctx: &mut ExecutionContext) -> PhaseResult {
        self.chains
            .before_handle
            .execute(ctx, ExecutionPhase::Request)
            .await?;
        self.chains
            .platform_flow_chain
            .execute(ctx, ExecutionPhase::Request)
            .await?;
        self.chains
            .before_security_chain
            .execute(ctx, ExecutionPhase::Request)
            .await?;
        self.execute_security_chain(ctx).await?;
        self.chains
            .before_api_execution
            .execute(ctx, ExecutionPhase::Request)
            .await?;
        self.handle_entrypoint_request(ctx).await?;

        if self.is_message_api() {
            self.chains
                .after_entrypoint_request
                .execute(ctx, ExecutionPhase::MessageRequest)
                .await?;
            self.chains
                .platform_flow_chain
                .execute(ctx, ExecutionPhase::MessageRequest)
                .await?;
        }

        self.chains
            .plan_flow_chain
            .execute(ctx, ExecutionPhase::Request)
            .await?;
        self.chains
            .api_flow_chain
            .execute(ctx, ExecutionPhase::Request)
            .await?;
        if self.is_message_api() {
            self.chains
                .plan_flow_chain
                .execute(ctx, ExecutionPhase::MessageRequest)
                .await?;
            self.chains
                .api_flow_chain
                .execute(ctx, ExecutionPhase::MessageRequest)
                .await?;
        }

        self.invoke_backend(ctx).await?;

        self.chains
            .plan_flow_chain
            .execute(ctx, ExecutionPhase::Response)
            .await?;
        self.chains
            .api_flow_chain
            .execute(ctx, ExecutionPhase::Response)
            .await?;
        if self.is_message_api() {
            self.chains
                .plan_flow_chain
                .execute(ctx, ExecutionPhase::MessageResponse)
                .await?;
            self.chains
                .api_flow_chain
                .execute(ctx, ExecutionPhase::MessageResponse)
                .await?;
        }

        self.chains
            .after_api_execution
            .execute(ctx, ExecutionPhase::Response)
            .await?;
        if self.is_message_api() {
            self.chains
                .after_api_execution
                .execute(ctx, ExecutionPhase::MessageResponse)
                .await?;
        }

        Ok(())
    }

    async fn execute_security_chain(&self, ctx: &mut ExecutionContext) -> PhaseResult {
        match self.security_chain.load_full() {
            Some(chain) => chain.execute(ctx).await,
            None => Err(Interruption::Unexpected(
                crate::core::GatewayError::Lifecycle(
                    "Security chain is not available, reactor is not started".to_string(),
                ),
            )),
        }
    }

    /// Dispatches a request-chain result to the right recovery chain and
    /// absorbs it: benign interruptions resume through the post-execution
    /// processors, failures and unexpected errors through the error
    /// processors. Only the recovery chain's own outcome propagates further.
    async fn process_result(&self, ctx: &mut ExecutionContext, result: PhaseResult) -> PhaseResult {
        match result {
            Ok(()) => Ok(()),
            Err(Interruption::Stop) => {
                self.chains
                    .after_api_execution
                    .execute(ctx, ExecutionPhase::Response)
                    .await
            }
            Err(Interruption::Failure(_)) => {
                self.chains
                    .on_error
                    .execute(ctx, ExecutionPhase::Response)
                    .await
            }
            Err(Interruption::Unexpected(e)) => {
                log::error!("Unexpected error while handling request: {e}");
                self.chains
                    .on_error
                    .execute(ctx, ExecutionPhase::Response)
                    .await
            }
        }
    }

    async fn handle_entrypoint_request(&self, ctx: &mut ExecutionContext) -> PhaseResult {
        let Some(connector) = self.entrypoint_resolver.resolve(ctx) else {
            log::debug!("No entrypoint connector matches the incoming request");
            return Err(ctx.interrupt_with(
                ExecutionFailure::new(StatusCode::NOT_FOUND)
                    .with_message(NO_ENTRYPOINT_FAILURE_MESSAGE),
            ));
        };
        ctx.internal.entrypoint_connector = Some(connector.clone());
        connector.handle_request(ctx).await
    }

    // Skipped when an execution failure is already recorded: the error
    // processors own the response in that case.
    async fn handle_entrypoint_response(&self, ctx: &mut ExecutionContext) -> PhaseResult {
        if ctx.internal.execution_failure.is_some() {
            return Ok(());
        }
        let Some(connector) = ctx.internal.entrypoint_connector.clone() else {
            return Ok(());
        };
        connector.handle_response(ctx).await
    }

    /// Invokes the backend unless a policy asked to skip it. Endpoint response
    /// time is measured here for request/response APIs; message APIs compute
    /// it per message, outside the core.
    async fn invoke_backend(&self, ctx: &mut ExecutionContext) -> PhaseResult {
        let measure = !self.is_message_api();
        if measure {
            ctx.metrics_mut().start_endpoint_response();
        }

        let result = if ctx.internal.invoker_skip {
            Ok(())
        } else if let Some(invoker) = ctx.internal.invoker.clone() {
            invoker.invoke(ctx).await
        } else {
            Ok(())
        };

        if measure {
            ctx.metrics_mut().compute_endpoint_response_time();
        }
        result
    }

    async fn on_timeout(&self, ctx: &mut ExecutionContext) -> PhaseResult {
        let _ = ctx.interrupt_with(
            ExecutionFailure::new(StatusCode::GATEWAY_TIMEOUT)
                .with_key(REQUEST_TIMEOUT_KEY)
                .with_message(REQUEST_TIMEOUT_MESSAGE),
        );
        self.chains
            .on_error
            .execute(ctx, ExecutionPhase::Response)
            .await
    }

    fn handle_unexpected_error(&self, ctx: &mut ExecutionContext, interruption: &Interruption) {
        log::error!("Unexpected error while handling request: {interruption}");
        ctx.metrics_mut().compute_endpoint_response_time();

        let response = ctx.response_mut();
        response.status = StatusCode::INTERNAL_SERVER_ERROR;
        response.reason = Some("Internal Server Error".to_string());
    }

    fn is_message_api(&self) -> bool {
        self.api.api_type == ApiType::Message
    }
}

/// Balanced pending-request accounting: increments on creation, decrements on
/// drop, so cancellation counts as termination too.
struct PendingRequest {
    counter: Arc<AtomicI64>,
}

impl PendingRequest {
    fn enter(counter: &Arc<AtomicI64>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self {
            counter: counter.clone(),
        }
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

fn state_to_u8(state: LifecycleState) -> u8 {
    match state {
        LifecycleState::Initialized => 0,
        LifecycleState::Started => 1,
        LifecycleState::Stopping => 2,
        LifecycleState::Stopped => 3,
    }
}

fn state_from_u8(value: u8) -> LifecycleState {
    match value {
        0 => LifecycleState::Initialized,
        1 => LifecycleState::Started,
        2 => LifecycleState::Stopping,
        _ => LifecycleState::Stopped,
    }
}
