use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::{header, HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};
use serde_yaml::Value as YamlValue;

use crate::core::{ExecutionContext, GatewayError, GatewayResult, PhaseResult};

use super::Policy;

pub const POLICY_NAME: &str = "mock";

/// Creates a mock policy instance with the given configuration.
pub fn create_mock_policy(cfg: YamlValue) -> GatewayResult<Arc<dyn Policy>> {
    let config: PolicyConfig = serde_yaml::from_value(cfg)
        .map_err(|e| GatewayError::Policy(format!("Invalid mock policy config: {e}")))?;
    let status = StatusCode::from_u16(config.status)
        .map_err(|e| GatewayError::Policy(format!("Invalid mock status code: {e}")))?;
    Ok(Arc::new(MockPolicy { config, status }))
}

/// Configuration for the mock policy.
#[derive(Debug, Serialize, Deserialize)]
struct PolicyConfig {
    #[serde(default = "PolicyConfig::default_status")]
    status: u16,
    #[serde(default)]
    body: String,
    #[serde(default = "PolicyConfig::default_content_type")]
    content_type: String,
}

impl PolicyConfig {
    fn default_status() -> u16 {
        200
    }

    fn default_content_type() -> String {
        "application/json".to_string()
    }
}

/// Serves a canned response instead of calling the backend.
///
/// Sets the invoker-skip marker so the reactor bypasses the backend
/// invocation; the rest of the pipeline (response flows, post processors)
/// still runs.
pub struct MockPolicy {
    config: PolicyConfig,
    status: StatusCode,
}

#[async_trait]
impl Policy for MockPolicy {
    fn id(&self) -> &str {
        POLICY_NAME
    }

    async fn on_request(&self, ctx: &mut ExecutionContext) -> PhaseResult {
        ctx.internal.invoker_skip = true;

        let response = ctx.response_mut();
        response.status = self.status;
        if let Ok(value) = HeaderValue::from_str(&self.config.content_type) {
            response.headers.insert(header::CONTENT_TYPE, value);
        }
        response.body = Some(Bytes::from(self.config.body.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use http::Method;

    use super::*;
    use crate::core::Request;

    #[tokio::test]
    async fn test_mock_sets_response_and_skips_invoker() {
        let policy = create_mock_policy(
            serde_yaml::from_str(
                r#"
status: 202
body: '{"mocked": true}'
"#,
            )
            .unwrap(),
        )
        .unwrap();

        let mut ctx = ExecutionContext::new(Request::new(Method::POST, "/orders"));
        policy.on_request(&mut ctx).await.unwrap();

        assert!(ctx.internal.invoker_skip);
        assert_eq!(ctx.response().status, StatusCode::ACCEPTED);
        assert_eq!(
            ctx.response().body.as_deref(),
            Some(br#"{"mocked": true}"#.as_slice())
        );
    }

    #[test]
    fn test_invalid_status_is_rejected() {
        let result = create_mock_policy(serde_yaml::from_str("status: 99").unwrap());
        assert!(result.is_err());
    }
}
