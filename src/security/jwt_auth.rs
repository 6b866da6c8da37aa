use std::sync::Arc;

use async_trait::async_trait;
use http::StatusCode;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use serde_yaml::Value as YamlValue;
use validator::Validate;

use crate::core::{
    ExecutionContext, ExecutionFailure, GatewayError, GatewayResult, PhaseResult,
};

use super::SecurityPolicy;

pub const SECURITY_TYPE: &str = "jwt-auth";
pub const JWT_INVALID_KEY: &str = "JWT_INVALID";

/// Context attribute the decoded claims are stored under.
pub const CLAIMS_ATTRIBUTE: &str = "jwt.claims";

const ORDER: i32 = 100;
const BEARER_PREFIX: &str = "bearer ";

/// Creates a JWT auth plan instance with the given configuration.
///
/// The decoding key and validation object are prepared once here and shared
/// across requests.
pub fn create_jwt_auth(cfg: YamlValue) -> GatewayResult<Arc<dyn SecurityPolicy>> {
    let config: PlanConfig = serde_yaml::from_value(cfg)
        .map_err(|e| GatewayError::Security(format!("Invalid jwt auth config: {e}")))?;
    config
        .validate()
        .map_err(|e| GatewayError::Security(format!("Invalid jwt auth config: {e}")))?;

    let decoding_key = DecodingKey::from_secret(config.secret.as_bytes());
    let mut validation = Validation::new(Algorithm::HS256);
    if let Some(issuer) = &config.issuer {
        validation.set_issuer(&[issuer]);
    }

    Ok(Arc::new(JwtAuth {
        config,
        decoding_key,
        validation,
    }))
}

/// Configuration for the JWT auth plan.
#[derive(Debug, Serialize, Deserialize, Validate)]
struct PlanConfig {
    #[validate(length(min = 1))]
    secret: String,
    #[serde(default)]
    issuer: Option<String>,
    #[serde(default = "PlanConfig::default_header")]
    header: String,
}

impl PlanConfig {
    fn default_header() -> String {
        "authorization".to_string()
    }
}

pub struct JwtAuth {
    config: PlanConfig,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtAuth {
    fn extract_token<'a>(&self, ctx: &'a ExecutionContext) -> Option<&'a str> {
        let value = ctx.request().header(&self.config.header)?;
        if value.len() > BEARER_PREFIX.len()
            && value[..BEARER_PREFIX.len()].eq_ignore_ascii_case(BEARER_PREFIX)
        {
            Some(value[BEARER_PREFIX.len()..].trim())
        } else {
            None
        }
    }
}

#[async_trait]
impl SecurityPolicy for JwtAuth {
    fn id(&self) -> &str {
        SECURITY_TYPE
    }

    fn order(&self) -> i32 {
        ORDER
    }

    fn can_handle(&self, ctx: &ExecutionContext) -> bool {
        self.extract_token(ctx).is_some()
    }

    async fn execute(&self, ctx: &mut ExecutionContext) -> PhaseResult {
        let Some(token) = self.extract_token(ctx) else {
            return Err(ctx.interrupt_with(unauthorized()));
        };

        match decode::<JsonValue>(token, &self.decoding_key, &self.validation) {
            Ok(data) => {
                if let Some(subject) = data.claims.get("sub").and_then(|s| s.as_str()) {
                    ctx.attributes.application = Some(subject.to_string());
                }
                ctx.attributes.set(CLAIMS_ATTRIBUTE, data.claims);
                Ok(())
            }
            Err(e) => {
                log::debug!("JWT validation failed: {e}");
                Err(ctx.interrupt_with(unauthorized()))
            }
        }
    }
}

fn unauthorized() -> ExecutionFailure {
    ExecutionFailure::new(StatusCode::UNAUTHORIZED)
        .with_key(JWT_INVALID_KEY)
        .with_message("Unauthorized")
}

#[cfg(test)]
mod tests {
    use http::{header::AUTHORIZATION, Method};
    use jsonwebtoken::{encode, EncodingKey, Header};

    use super::*;
    use crate::core::{Interruption, Request};

    const SECRET: &str = "test-secret";

    fn jwt_auth() -> Arc<dyn SecurityPolicy> {
        create_jwt_auth(serde_yaml::from_str(&format!("secret: {SECRET}")).unwrap()).unwrap()
    }

    fn token(secret: &str) -> String {
        let exp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs()
            + 3600;
        let claims = serde_json::json!({"sub": "app-1", "exp": exp});
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_valid_token_is_accepted() {
        let request = Request::new(Method::GET, "/")
            .with_header(AUTHORIZATION, &format!("Bearer {}", token(SECRET)));
        let mut ctx = ExecutionContext::new(request);

        let plan = jwt_auth();
        assert!(plan.can_handle(&ctx));
        plan.execute(&mut ctx).await.unwrap();

        assert_eq!(ctx.attributes.application.as_deref(), Some("app-1"));
        assert!(ctx.attributes.get::<JsonValue>(CLAIMS_ATTRIBUTE).is_some());
    }

    #[tokio::test]
    async fn test_token_with_wrong_signature_is_rejected() {
        let request = Request::new(Method::GET, "/")
            .with_header(AUTHORIZATION, &format!("Bearer {}", token("other-secret")));
        let mut ctx = ExecutionContext::new(request);

        let result = jwt_auth().execute(&mut ctx).await;
        match result {
            Err(Interruption::Failure(failure)) => {
                assert_eq!(failure.status(), StatusCode::UNAUTHORIZED);
                assert_eq!(failure.key(), Some(JWT_INVALID_KEY));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_non_bearer_authorization_does_not_match() {
        let request =
            Request::new(Method::GET, "/").with_header(AUTHORIZATION, "Basic dXNlcjpwYXNz");
        let ctx = ExecutionContext::new(request);
        assert!(!jwt_auth().can_handle(&ctx));
    }
}
