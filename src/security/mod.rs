//! Security chain and security plans.
//!
//! Every API carries a list of plans (api-key, JWT, basic, keyless). The chain
//! instantiates them once at construction, sorts them by order and, per
//! request, executes exactly the first plan whose predicate matches. No match
//! fails closed.

pub mod basic_auth;
pub mod jwt_auth;
pub mod key_auth;
pub mod keyless;

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use http::StatusCode;
use once_cell::sync::Lazy;
use serde_yaml::Value as YamlValue;

use crate::config::Api;
use crate::core::interruption::PLAN_UNRESOLVABLE_KEY;
use crate::core::{ExecutionContext, ExecutionFailure, GatewayError, GatewayResult, PhaseResult};
use crate::policy::PolicyManager;

/// One authentication/authorization method.
#[async_trait]
pub trait SecurityPolicy: Send + Sync {
    fn id(&self) -> &str;

    /// Static evaluation order; lower values are tried first.
    fn order(&self) -> i32;

    /// Cheap synchronous predicate over request attributes (headers, query,
    /// path). Must not perform I/O.
    fn can_handle(&self, ctx: &ExecutionContext) -> bool;

    async fn execute(&self, ctx: &mut ExecutionContext) -> PhaseResult;
}

pub type SecurityPolicyCreateFn = fn(YamlValue) -> GatewayResult<Arc<dyn SecurityPolicy>>;

/// Global registry mapping security types to their factory functions.
static SECURITY_REGISTRY: Lazy<HashMap<&'static str, SecurityPolicyCreateFn>> = Lazy::new(|| {
    let arr: Vec<(&str, SecurityPolicyCreateFn)> = vec![
        (jwt_auth::SECURITY_TYPE, jwt_auth::create_jwt_auth),
        (key_auth::SECURITY_TYPE, key_auth::create_key_auth),
        (basic_auth::SECURITY_TYPE, basic_auth::create_basic_auth),
        (keyless::SECURITY_TYPE, keyless::create_keyless),
    ];
    arr.into_iter().collect()
});

pub fn build_security_policy(
    security_type: &str,
    cfg: YamlValue,
) -> GatewayResult<Arc<dyn SecurityPolicy>> {
    let builder = SECURITY_REGISTRY.get(security_type).ok_or_else(|| {
        GatewayError::Security(format!("Unknown security type '{security_type}'"))
    })?;
    builder(cfg)
}

struct SecurityPlan {
    plan_id: String,
    plan_name: String,
    policy: Arc<dyn SecurityPolicy>,
}

/// Resolves and executes exactly one applicable security plan per request.
pub struct SecurityChain {
    plans: Vec<SecurityPlan>,
}

impl SecurityChain {
    /// Builds the chain from the API's plan list.
    ///
    /// Plans that cannot be instantiated are filtered out with a warning; the
    /// remaining plans are sorted ascending by order, ties broken by their
    /// position in the definition (the sort is stable).
    pub fn new(api: &Api, policy_manager: &dyn PolicyManager) -> Self {
        let mut plans: Vec<SecurityPlan> = Vec::with_capacity(api.plans.len());
        for plan in &api.plans {
            match policy_manager.create_security(plan) {
                Ok(policy) => plans.push(SecurityPlan {
                    plan_id: plan.id.clone(),
                    plan_name: plan.name.clone(),
                    policy,
                }),
                Err(e) => log::warn!(
                    "Skipping security plan '{}' of api '{}': {e}",
                    plan.id,
                    api.id
                ),
            }
        }

        plans.sort_by_key(|plan| plan.policy.order());

        Self { plans }
    }

    pub async fn execute(&self, ctx: &mut ExecutionContext) -> PhaseResult {
        for plan in &self.plans {
            if plan.policy.can_handle(ctx) {
                log::debug!(
                    "Executing security plan '{}' ({})",
                    plan.plan_name,
                    plan.policy.id()
                );
                ctx.attributes.plan = Some(plan.plan_id.clone());
                return plan.policy.execute(ctx).await;
            }
        }

        log::debug!("No security plan matches the incoming request");
        Err(ctx.interrupt_with(
            ExecutionFailure::new(StatusCode::UNAUTHORIZED)
                .with_key(PLAN_UNRESOLVABLE_KEY)
                .with_message("Unauthorized"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use http::Method;

    use super::*;
    use crate::core::{Interruption, Request};
    use crate::policy::DefaultPolicyManager;

    struct CountingPolicy {
        order: i32,
        matches: bool,
        predicate_calls: Arc<AtomicUsize>,
        executions: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SecurityPolicy for CountingPolicy {
        fn id(&self) -> &str {
            "counting"
        }

        fn order(&self) -> i32 {
            self.order
        }

        fn can_handle(&self, _ctx: &ExecutionContext) -> bool {
            self.predicate_calls.fetch_add(1, Ordering::SeqCst);
            self.matches
        }

        async fn execute(&self, _ctx: &mut ExecutionContext) -> PhaseResult {
            self.executions.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn counting_chain(specs: Vec<(i32, bool)>) -> (SecurityChain, Vec<(Arc<AtomicUsize>, Arc<AtomicUsize>)>) {
        let mut plans = Vec::new();
        let mut counters = Vec::new();
        for (i, (order, matches)) in specs.into_iter().enumerate() {
            let predicate_calls = Arc::new(AtomicUsize::new(0));
            let executions = Arc::new(AtomicUsize::new(0));
            counters.push((predicate_calls.clone(), executions.clone()));
            plans.push(SecurityPlan {
                plan_id: format!("plan-{i}"),
                plan_name: format!("Plan {i}"),
                policy: Arc::new(CountingPolicy {
                    order,
                    matches,
                    predicate_calls,
                    executions,
                }),
            });
        }
        let mut chain = SecurityChain { plans };
        chain.plans.sort_by_key(|plan| plan.policy.order());
        (chain, counters)
    }

    #[tokio::test]
    async fn test_lowest_order_matching_plan_wins() {
        // Declared out of order on purpose: orders 300, 100, 200, all matching.
        let (chain, counters) = counting_chain(vec![(300, true), (100, true), (200, true)]);
        let mut ctx = ExecutionContext::new(Request::new(Method::GET, "/"));

        chain.execute(&mut ctx).await.unwrap();

        // Only the order-100 plan (declared second) was executed, and no
        // predicate after the match was evaluated.
        assert_eq!(counters[1].1.load(Ordering::SeqCst), 1);
        assert_eq!(counters[0].0.load(Ordering::SeqCst), 0);
        assert_eq!(counters[2].0.load(Ordering::SeqCst), 0);
        assert_eq!(ctx.attributes.plan.as_deref(), Some("plan-1"));
    }

    #[tokio::test]
    async fn test_no_matching_plan_fails_closed() {
        let (chain, _) = counting_chain(vec![(100, false), (200, false)]);
        let mut ctx = ExecutionContext::new(Request::new(Method::GET, "/"));

        let result = chain.execute(&mut ctx).await;
        match result {
            Err(Interruption::Failure(failure)) => {
                assert_eq!(failure.status(), StatusCode::UNAUTHORIZED);
                assert_eq!(failure.key(), Some(PLAN_UNRESOLVABLE_KEY));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(ctx.is_interrupted());
    }

    #[tokio::test]
    async fn test_chain_from_api_definition_filters_broken_plans() {
        let api = Api::from_yaml(
            r#"
id: secured
name: Secured
listeners:
  - paths:
      - path: /secured
plans:
  - id: broken
    name: Broken
    security:
      type: does-not-exist
  - id: open
    name: Open
    security:
      type: keyless
"#,
        )
        .unwrap();

        let chain = SecurityChain::new(&api, &DefaultPolicyManager::new());
        assert_eq!(chain.plans.len(), 1);
        assert_eq!(chain.plans[0].plan_id, "open");
    }
}
