use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use http::header::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_yaml::Value as YamlValue;

use crate::core::{ExecutionContext, GatewayError, GatewayResult, PhaseResult};

use super::Policy;

pub const POLICY_NAME: &str = "header-rewrite";

/// Creates a header rewrite policy instance with the given configuration.
pub fn create_header_rewrite_policy(cfg: YamlValue) -> GatewayResult<Arc<dyn Policy>> {
    let config: PolicyConfig = serde_yaml::from_value(cfg)
        .map_err(|e| GatewayError::Policy(format!("Invalid header rewrite config: {e}")))?;
    Ok(Arc::new(HeaderRewritePolicy { config }))
}

/// Configuration for the header rewrite policy.
///
/// BTreeMap keeps the application order deterministic across restarts.
#[derive(Default, Debug, Serialize, Deserialize)]
struct PolicyConfig {
    #[serde(default)]
    set_request_headers: BTreeMap<String, String>,
    #[serde(default)]
    remove_request_headers: Vec<String>,
    #[serde(default)]
    set_response_headers: BTreeMap<String, String>,
    #[serde(default)]
    remove_response_headers: Vec<String>,
}

pub struct HeaderRewritePolicy {
    config: PolicyConfig,
}

#[async_trait]
impl Policy for HeaderRewritePolicy {
    fn id(&self) -> &str {
        POLICY_NAME
    }

    async fn on_request(&self, ctx: &mut ExecutionContext) -> PhaseResult {
        let headers = &mut ctx.request_mut().headers;
        apply(headers, &self.config.set_request_headers, &self.config.remove_request_headers);
        Ok(())
    }

    async fn on_response(&self, ctx: &mut ExecutionContext) -> PhaseResult {
        let headers = &mut ctx.response_mut().headers;
        apply(headers, &self.config.set_response_headers, &self.config.remove_response_headers);
        Ok(())
    }
}

fn apply(headers: &mut http::HeaderMap, set: &BTreeMap<String, String>, remove: &[String]) {
    for name in remove {
        if let Ok(name) = HeaderName::from_bytes(name.as_bytes()) {
            headers.remove(name);
        }
    }
    for (name, value) in set {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => log::debug!("Skipping invalid header {name}: {value}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use http::Method;

    use super::*;
    use crate::core::Request;

    #[tokio::test]
    async fn test_request_headers_are_rewritten() {
        let policy = create_header_rewrite_policy(
            serde_yaml::from_str(
                r#"
set_request_headers:
  X-Gateway: apiflow
remove_request_headers: [X-Secret]
"#,
            )
            .unwrap(),
        )
        .unwrap();

        let request = Request::new(Method::GET, "/")
            .with_header(HeaderName::from_static("x-secret"), "hidden");
        let mut ctx = ExecutionContext::new(request);

        policy.on_request(&mut ctx).await.unwrap();

        assert_eq!(ctx.request().header("x-gateway"), Some("apiflow"));
        assert_eq!(ctx.request().header("x-secret"), None);
    }

    #[tokio::test]
    async fn test_response_headers_are_rewritten() {
        let policy = create_header_rewrite_policy(
            serde_yaml::from_str(
                r#"
set_response_headers:
  Cache-Control: no-store
"#,
            )
            .unwrap(),
        )
        .unwrap();

        let mut ctx = ExecutionContext::new(Request::new(Method::GET, "/"));
        policy.on_response(&mut ctx).await.unwrap();

        assert_eq!(
            ctx.response().headers.get("cache-control"),
            Some(&HeaderValue::from_static("no-store"))
        );
    }
}
