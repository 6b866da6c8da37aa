use std::sync::Arc;

use async_trait::async_trait;
use serde_yaml::Value as YamlValue;

use crate::core::{ExecutionContext, GatewayResult, PhaseResult};

use super::SecurityPolicy;

pub const SECURITY_TYPE: &str = "keyless";

// Highest order: keyless only wins when nothing stronger matched.
const ORDER: i32 = 1000;

pub fn create_keyless(_cfg: YamlValue) -> GatewayResult<Arc<dyn SecurityPolicy>> {
    Ok(Arc::new(Keyless))
}

/// Catch-all plan that accepts every request without credentials.
pub struct Keyless;

#[async_trait]
impl SecurityPolicy for Keyless {
    fn id(&self) -> &str {
        SECURITY_TYPE
    }

    fn order(&self) -> i32 {
        ORDER
    }

    fn can_handle(&self, _ctx: &ExecutionContext) -> bool {
        true
    }

    async fn execute(&self, _ctx: &mut ExecutionContext) -> PhaseResult {
        Ok(())
    }
}
