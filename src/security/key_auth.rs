use std::sync::Arc;

use async_trait::async_trait;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_yaml::Value as YamlValue;
use validator::Validate;

use crate::core::{
    ExecutionContext, ExecutionFailure, GatewayError, GatewayResult, PhaseResult,
};

use super::SecurityPolicy;

pub const SECURITY_TYPE: &str = "key-auth";
pub const API_KEY_INVALID_KEY: &str = "API_KEY_INVALID";

const ORDER: i32 = 200;

/// Creates a key auth plan instance with the given configuration.
pub fn create_key_auth(cfg: YamlValue) -> GatewayResult<Arc<dyn SecurityPolicy>> {
    let config: PlanConfig = serde_yaml::from_value(cfg)
        .map_err(|e| GatewayError::Security(format!("Invalid key auth config: {e}")))?;
    config
        .validate()
        .map_err(|e| GatewayError::Security(format!("Invalid key auth config: {e}")))?;
    Ok(Arc::new(KeyAuth { config }))
}

/// Configuration for the key auth plan.
#[derive(Default, Debug, Serialize, Deserialize, Validate)]
struct PlanConfig {
    #[serde(default = "PlanConfig::default_header")]
    header: String,
    #[serde(default = "PlanConfig::default_query")]
    query: String,
    #[validate(length(min = 1))]
    keys: Vec<String>,
    #[serde(default)]
    hide_credentials: bool,
}

impl PlanConfig {
    fn default_header() -> String {
        "x-api-key".to_string()
    }

    fn default_query() -> String {
        "apikey".to_string()
    }
}

pub struct KeyAuth {
    config: PlanConfig,
}

impl KeyAuth {
    fn extract_key(&self, ctx: &ExecutionContext) -> Option<(String, bool)> {
        if let Some(value) = ctx.request().header(&self.config.header) {
            if !value.is_empty() {
                return Some((value.to_string(), true));
            }
        }
        ctx.request()
            .query_param(&self.config.query)
            .filter(|v| !v.is_empty())
            .map(|v| (v.to_string(), false))
    }
}

#[async_trait]
impl SecurityPolicy for KeyAuth {
    fn id(&self) -> &str {
        SECURITY_TYPE
    }

    fn order(&self) -> i32 {
        ORDER
    }

    fn can_handle(&self, ctx: &ExecutionContext) -> bool {
        self.extract_key(ctx).is_some()
    }

    async fn execute(&self, ctx: &mut ExecutionContext) -> PhaseResult {
        let Some((key, from_header)) = self.extract_key(ctx) else {
            return Err(ctx.interrupt_with(unauthorized()));
        };

        if !self.config.keys.iter().any(|k| *k == key) {
            return Err(ctx.interrupt_with(unauthorized()));
        }

        if self.config.hide_credentials {
            if from_header {
                ctx.request_mut().headers.remove(self.config.header.as_str());
            } else {
                strip_query_param(ctx, &self.config.query);
            }
        }

        Ok(())
    }
}

fn unauthorized() -> ExecutionFailure {
    ExecutionFailure::new(StatusCode::UNAUTHORIZED)
        .with_key(API_KEY_INVALID_KEY)
        .with_message("Unauthorized")
}

fn strip_query_param(ctx: &mut ExecutionContext, name: &str) {
    let Some(query) = ctx.request().query.clone() else {
        return;
    };
    let kept: Vec<&str> = query
        .split('&')
        .filter(|item| item.split_once('=').map(|(k, _)| k) != Some(name))
        .collect();
    ctx.request_mut().query = if kept.is_empty() {
        None
    } else {
        Some(kept.join("&"))
    };
}
