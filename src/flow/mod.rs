//! Flow resolution and execution.
//!
//! Flows are compiled once per API: selectors become path matchers, steps
//! become instantiated policies. At request time the chain selects the flows
//! whose selector matches (all of them in `default` mode, the single most
//! specific one in `best_match` mode) and runs the phase-appropriate steps.

use std::collections::HashMap;

use matchit::Router as MatchRouter;

use crate::config::{Flow, FlowMode, FlowSelector, Plan, PathOperator, Step, StepCondition};
use crate::core::{
    ExecutionContext, ExecutionPhase, GatewayError, GatewayResult, PhaseResult, Request,
};
use crate::policy::{Policy, PolicyManager};
use std::sync::Arc;

pub(crate) struct CompiledStep {
    name: String,
    policy: Arc<dyn Policy>,
    condition: Option<StepCondition>,
}

pub(crate) struct FlowMatcher {
    router: MatchRouter<()>,
    specificity: u32,
    methods: Vec<String>,
}

impl FlowMatcher {
    fn compile(selector: &FlowSelector) -> GatewayResult<Self> {
        let mut router = MatchRouter::new();
        let path = selector.path.trim_end_matches('/');
        let path = if path.is_empty() { "/" } else { path };

        let insert = |router: &mut MatchRouter<()>, pattern: String| {
            router.insert(&pattern, ()).map_err(|e| {
                GatewayError::Configuration(format!("Invalid flow path '{pattern}': {e}"))
            })
        };

        insert(&mut router, path.to_string())?;
        if selector.path_operator == PathOperator::StartsWith {
            if path == "/" {
                insert(&mut router, "/{*rest}".to_string())?;
            } else {
                insert(&mut router, format!("{path}/{{*rest}}"))?;
            }
        }

        // Literal segments weigh more than parameter segments so that
        // best-match selection prefers the most concrete path.
        let mut specificity = 0;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            specificity += if segment.starts_with('{') { 1 } else { 10 };
        }

        Ok(Self {
            router,
            specificity,
            methods: selector.methods.iter().map(|m| m.to_uppercase()).collect(),
        })
    }

    fn matches(&self, request: &Request) -> bool {
        if !self.methods.is_empty()
            && !self.methods.iter().any(|m| m == request.method.as_str())
        {
            return false;
        }
        self.router.at(request.path_info()).is_ok()
    }
}

pub(crate) struct CompiledFlow {
    name: String,
    matcher: FlowMatcher,
    request: Vec<CompiledStep>,
    response: Vec<CompiledStep>,
    message_request: Vec<CompiledStep>,
    message_response: Vec<CompiledStep>,
}

impl CompiledFlow {
    fn compile(index: usize, flow: &Flow, policy_manager: &dyn PolicyManager) -> GatewayResult<Self> {
        Ok(Self {
            name: flow
                .name
                .clone()
                .unwrap_or_else(|| format!("flow-{index}")),
            matcher: FlowMatcher::compile(&flow.selector)?,
            request: compile_steps(&flow.request, policy_manager)?,
            response: compile_steps(&flow.response, policy_manager)?,
            message_request: compile_steps(&flow.message_request, policy_manager)?,
            message_response: compile_steps(&flow.message_response, policy_manager)?,
        })
    }

    fn steps(&self, phase: ExecutionPhase) -> &[CompiledStep] {
        match phase {
            ExecutionPhase::Request => &self.request,
            ExecutionPhase::Response => &self.response,
            ExecutionPhase::MessageRequest => &self.message_request,
            ExecutionPhase::MessageResponse => &self.message_response,
        }
    }
}

fn compile_steps(
    steps: &[Step],
    policy_manager: &dyn PolicyManager,
) -> GatewayResult<Vec<CompiledStep>> {
    let mut compiled = Vec::new();
    for step in steps.iter().filter(|s| s.enabled) {
        let policy = policy_manager.create(step)?;
        compiled.push(CompiledStep {
            name: step.name.clone().unwrap_or_else(|| step.policy.clone()),
            policy,
            condition: step.condition.clone(),
        });
    }
    Ok(compiled)
}

fn condition_holds(condition: &StepCondition, ctx: &ExecutionContext) -> bool {
    match condition {
        StepCondition::HeaderEquals { name, value } => {
            ctx.request().header(name) == Some(value.as_str())
        }
        StepCondition::AttributeEquals { name, value } => {
            attribute_str(ctx, name).as_deref() == Some(value.as_str())
        }
    }
}

fn attribute_str(ctx: &ExecutionContext, name: &str) -> Option<String> {
    match name {
        "context-path" => ctx.attributes.context_path.clone(),
        "api" => ctx.attributes.api.clone(),
        "organization" => ctx.attributes.organization.clone(),
        "environment" => ctx.attributes.environment.clone(),
        "plan" => ctx.attributes.plan.clone(),
        "application" => ctx.attributes.application.clone(),
        _ => ctx.attributes.get_str(name).map(str::to_string),
    }
}

fn select_flows<'a>(
    flows: &'a [CompiledFlow],
    mode: FlowMode,
    request: &Request,
) -> Vec<&'a CompiledFlow> {
    let matching = flows.iter().filter(|f| f.matcher.matches(request));
    match mode {
        FlowMode::Default => matching.collect(),
        FlowMode::BestMatch => {
            // First declared flow wins specificity ties.
            let mut best: Option<&CompiledFlow> = None;
            for flow in matching {
                if best.is_none_or(|b| flow.matcher.specificity > b.matcher.specificity) {
                    best = Some(flow);
                }
            }
            best.into_iter().collect()
        }
    }
}

async fn execute_flow(
    flow: &CompiledFlow,
    ctx: &mut ExecutionContext,
    phase: ExecutionPhase,
) -> PhaseResult {
    for step in flow.steps(phase) {
        if let Some(condition) = &step.condition {
            if !condition_holds(condition, ctx) {
                log::trace!("Skipping step '{}' of flow '{}'", step.name, flow.name);
                continue;
            }
        }
        match phase {
            ExecutionPhase::Request => step.policy.on_request(ctx).await?,
            ExecutionPhase::Response => step.policy.on_response(ctx).await?,
            ExecutionPhase::MessageRequest => step.policy.on_message_request(ctx).await?,
            ExecutionPhase::MessageResponse => step.policy.on_message_response(ctx).await?,
        }
    }
    Ok(())
}

/// Ordered chain of flows scoped to one level (platform or API).
pub struct FlowChain {
    id: String,
    mode: FlowMode,
    flows: Vec<CompiledFlow>,
}

impl FlowChain {
    pub fn compile(
        id: impl Into<String>,
        flows: &[Flow],
        mode: FlowMode,
        policy_manager: &dyn PolicyManager,
    ) -> GatewayResult<Self> {
        let compiled = flows
            .iter()
            .filter(|f| f.enabled)
            .enumerate()
            .map(|(i, f)| CompiledFlow::compile(i, f, policy_manager))
            .collect::<GatewayResult<Vec<_>>>()?;
        Ok(Self {
            id: id.into(),
            mode,
            flows: compiled,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn execute(&self, ctx: &mut ExecutionContext, phase: ExecutionPhase) -> PhaseResult {
        for flow in select_flows(&self.flows, self.mode, ctx.request()) {
            log::trace!("Executing flow '{}' of chain {}", flow.name, self.id);
            execute_flow(flow, ctx, phase).await?;
        }
        Ok(())
    }
}

/// Flows scoped to the API's plans. The flows of the plan elected by the
/// security chain (via the `plan` attribute) are the only ones considered.
pub struct PlanFlowChain {
    mode: FlowMode,
    plans: HashMap<String, Vec<CompiledFlow>>,
}

impl PlanFlowChain {
    pub fn compile(
        plans: &[Plan],
        mode: FlowMode,
        policy_manager: &dyn PolicyManager,
    ) -> GatewayResult<Self> {
        let mut compiled = HashMap::with_capacity(plans.len());
        for plan in plans {
            let flows = plan
                .flows
                .iter()
                .filter(|f| f.enabled)
                .enumerate()
                .map(|(i, f)| CompiledFlow::compile(i, f, policy_manager))
                .collect::<GatewayResult<Vec<_>>>()?;
            compiled.insert(plan.id.clone(), flows);
        }
        Ok(Self {
            mode,
            plans: compiled,
        })
    }

    pub async fn execute(&self, ctx: &mut ExecutionContext, phase: ExecutionPhase) -> PhaseResult {
        let Some(plan_id) = ctx.attributes.plan.clone() else {
            return Ok(());
        };
        let Some(flows) = self.plans.get(&plan_id) else {
            return Ok(());
        };
        for flow in select_flows(flows, self.mode, ctx.request()) {
            log::trace!("Executing flow '{}' of plan '{}'", flow.name, plan_id);
            execute_flow(flow, ctx, phase).await?;
        }
        Ok(())
    }
}
