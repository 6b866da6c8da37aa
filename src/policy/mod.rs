//! Policies and policy management.
//!
//! Policies are the user-configured participants of flows. They are
//! instantiated once at reactor construction from their step configuration
//! through a factory registry, then shared across all concurrent requests.

pub mod header_rewrite;
pub mod mock;

use std::{collections::HashMap, sync::{atomic::{AtomicBool, Ordering}, Arc}};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde_yaml::Value as YamlValue;

use crate::config::{Plan, Step};
use crate::core::{ExecutionContext, GatewayError, GatewayResult, PhaseResult};
use crate::security::{build_security_policy, SecurityPolicy};

#[async_trait]
pub trait Policy: Send + Sync {
    fn id(&self) -> &str;

    async fn on_request(&self, _ctx: &mut ExecutionContext) -> PhaseResult {
        Ok(())
    }

    async fn on_response(&self, _ctx: &mut ExecutionContext) -> PhaseResult {
        Ok(())
    }

    async fn on_message_request(&self, _ctx: &mut ExecutionContext) -> PhaseResult {
        Ok(())
    }

    async fn on_message_response(&self, _ctx: &mut ExecutionContext) -> PhaseResult {
        Ok(())
    }
}

pub type PolicyCreateFn = fn(YamlValue) -> GatewayResult<Arc<dyn Policy>>;

/// Global registry mapping policy names to their factory functions.
static POLICY_REGISTRY: Lazy<HashMap<&'static str, PolicyCreateFn>> = Lazy::new(|| {
    let arr: Vec<(&str, PolicyCreateFn)> = vec![
        (
            header_rewrite::POLICY_NAME,
            header_rewrite::create_header_rewrite_policy,
        ),
        (mock::POLICY_NAME, mock::create_mock_policy),
    ];
    arr.into_iter().collect()
});

/// Creates a policy instance from a step configuration.
///
/// Fails fast for unknown policy names or invalid configuration.
pub fn build_policy(name: &str, cfg: YamlValue) -> GatewayResult<Arc<dyn Policy>> {
    let builder = POLICY_REGISTRY
        .get(name)
        .ok_or_else(|| GatewayError::Policy(format!("Unknown policy type '{name}'")))?;
    builder(cfg)
}

/// Lifecycle owner for everything policy-related. The reactor starts it before
/// building the security chain and stops it during shutdown.
pub trait PolicyManager: Send + Sync {
    fn start(&self) -> GatewayResult<()>;

    fn stop(&self) -> GatewayResult<()>;

    fn create(&self, step: &Step) -> GatewayResult<Arc<dyn Policy>>;

    fn create_security(&self, plan: &Plan) -> GatewayResult<Arc<dyn SecurityPolicy>>;
}

#[derive(Default)]
pub struct DefaultPolicyManager {
    started: AtomicBool,
}

impl DefaultPolicyManager {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PolicyManager for DefaultPolicyManager {
    fn start(&self) -> GatewayResult<()> {
        self.started.store(true, Ordering::SeqCst);
        log::debug!("Policy manager started");
        Ok(())
    }

    fn stop(&self) -> GatewayResult<()> {
        self.started.store(false, Ordering::SeqCst);
        log::debug!("Policy manager stopped");
        Ok(())
    }

    fn create(&self, step: &Step) -> GatewayResult<Arc<dyn Policy>> {
        build_policy(&step.policy, step.configuration.clone())
    }

    fn create_security(&self, plan: &Plan) -> GatewayResult<Arc<dyn SecurityPolicy>> {
        build_security_policy(&plan.security.security_type, plan.security.configuration.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_policy_rejects_unknown_names() {
        let result = build_policy("no-such-policy", YamlValue::Null);
        assert!(matches!(result, Err(GatewayError::Policy(_))));
    }

    #[test]
    fn test_manager_creates_policy_from_step() {
        let manager = DefaultPolicyManager::new();
        let step: Step = serde_yaml::from_str(
            r#"
policy: mock
configuration:
  status: 200
  body: "{}"
"#,
        )
        .unwrap();
        assert!(manager.create(&step).is_ok());
    }
}
