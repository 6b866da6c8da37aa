use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_yaml::Value as YamlValue;
use validator::Validate;

use crate::core::{
    ExecutionContext, ExecutionFailure, GatewayError, GatewayResult, PhaseResult,
};

use super::SecurityPolicy;

pub const SECURITY_TYPE: &str = "basic-auth";
pub const BASIC_AUTH_INVALID_KEY: &str = "BASIC_AUTH_INVALID";

const ORDER: i32 = 300;
const BASIC_PREFIX: &str = "basic ";

/// Creates a basic auth plan instance with the given configuration.
pub fn create_basic_auth(cfg: YamlValue) -> GatewayResult<Arc<dyn SecurityPolicy>> {
    let config: PlanConfig = serde_yaml::from_value(cfg)
        .map_err(|e| GatewayError::Security(format!("Invalid basic auth config: {e}")))?;
    config
        .validate()
        .map_err(|e| GatewayError::Security(format!("Invalid basic auth config: {e}")))?;
    Ok(Arc::new(BasicAuth { config }))
}

/// Configuration for the basic auth plan.
#[derive(Debug, Serialize, Deserialize, Validate)]
struct PlanConfig {
    /// Username to password.
    #[validate(length(min = 1))]
    users: BTreeMap<String, String>,
}

pub struct BasicAuth {
    config: PlanConfig,
}

impl BasicAuth {
    fn decode_credentials(value: &str) -> Option<(String, String)> {
        if value.len() <= BASIC_PREFIX.len()
            || !value[..BASIC_PREFIX.len()].eq_ignore_ascii_case(BASIC_PREFIX)
        {
            return None;
        }
        let decoded = general_purpose::STANDARD
            .decode(value[BASIC_PREFIX.len()..].trim())
            .ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (user, password) = decoded.split_once(':')?;
        Some((user.to_string(), password.to_string()))
    }
}

#[async_trait]
impl SecurityPolicy for BasicAuth {
    fn id(&self) -> &str {
        SECURITY_TYPE
    }

    fn order(&self) -> i32 {
        ORDER
    }

    fn can_handle(&self, ctx: &ExecutionContext) -> bool {
        ctx.request()
            .header("authorization")
            .is_some_and(|v| v.len() > BASIC_PREFIX.len()
                && v[..BASIC_PREFIX.len()].eq_ignore_ascii_case(BASIC_PREFIX))
    }

    async fn execute(&self, ctx: &mut ExecutionContext) -> PhaseResult {
        let credentials = ctx
            .request()
            .header("authorization")
            .and_then(BasicAuth::decode_credentials);

        match credentials {
            Some((user, password))
                if self.config.users.get(&user).is_some_and(|p| *p == password) =>
            {
                ctx.attributes.application = Some(user);
                Ok(())
            }
            _ => Err(ctx.interrupt_with(
                ExecutionFailure::new(StatusCode::UNAUTHORIZED)
                    .with_key(BASIC_AUTH_INVALID_KEY)
                    .with_message("Unauthorized"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use http::{header::AUTHORIZATION, Method};

    use super::*;
    use crate::core::{Interruption, Request};

    fn basic_auth() -> Arc<dyn SecurityPolicy> {
        create_basic_auth(
            serde_yaml::from_str(
                r#"
users:
  alice: wonderland
"#,
            )
            .unwrap(),
        )
        .unwrap()
    }

    fn ctx_with_credentials(credentials: &str) -> ExecutionContext {
        let encoded = general_purpose::STANDARD.encode(credentials);
        let request = Request::new(Method::GET, "/")
            .with_header(AUTHORIZATION, &format!("Basic {encoded}"));
        ExecutionContext::new(request)
    }

    #[tokio::test]
    async fn test_valid_credentials_are_accepted() {
        let mut ctx = ctx_with_credentials("alice:wonderland");
        let plan = basic_auth();

        assert!(plan.can_handle(&ctx));
        plan.execute(&mut ctx).await.unwrap();
        assert_eq!(ctx.attributes.application.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_wrong_password_is_rejected() {
        let mut ctx = ctx_with_credentials("alice:queen");
        let result = basic_auth().execute(&mut ctx).await;

        match result {
            Err(Interruption::Failure(failure)) => {
                assert_eq!(failure.status(), StatusCode::UNAUTHORIZED);
                assert_eq!(failure.key(), Some(BASIC_AUTH_INVALID_KEY));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_header_is_rejected() {
        let request =
            Request::new(Method::GET, "/").with_header(AUTHORIZATION, "Basic not-base64!!!");
        let mut ctx = ExecutionContext::new(request);

        assert!(basic_auth().execute(&mut ctx).await.is_err());
    }
}
