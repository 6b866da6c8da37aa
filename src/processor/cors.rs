use async_trait::async_trait;
use http::{
    header::{
        HeaderValue, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
        ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_MAX_AGE, ACCESS_CONTROL_REQUEST_METHOD,
        ORIGIN,
    },
    Method, StatusCode,
};

use crate::config::CorsConfig;
use crate::core::{ExecutionContext, ExecutionPhase, PhaseResult};

use super::Processor;

pub const PROCESSOR_ID: &str = "cors";

/// Handles cross-origin requests for APIs with a CORS configuration.
///
/// Pre-flight requests are answered directly and interrupt the pipeline
/// without failure: no security chain, flows or backend invocation run for
/// them, but the mandatory post phases still do. Actual requests get the
/// allow-origin header mirrored onto the response during the response phase.
pub struct CorsProcessor {
    config: CorsConfig,
}

impl CorsProcessor {
    pub fn new(config: CorsConfig) -> Self {
        Self { config }
    }

    fn origin_allowed(&self, origin: &str) -> bool {
        self.config
            .allow_origins
            .iter()
            .any(|allowed| allowed == "*" || allowed == origin)
    }

    fn is_preflight(ctx: &ExecutionContext) -> bool {
        ctx.request().method == Method::OPTIONS
            && ctx.request().headers.contains_key(ORIGIN)
            && ctx
                .request()
                .headers
                .contains_key(ACCESS_CONTROL_REQUEST_METHOD)
    }

    fn apply_preflight_headers(&self, ctx: &mut ExecutionContext, origin: &str) {
        let headers = &mut ctx.response_mut().headers;
        if let Ok(value) = HeaderValue::from_str(origin) {
            headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, value);
        }
        if let Ok(value) = HeaderValue::from_str(&self.config.allow_methods.join(", ")) {
            headers.insert(ACCESS_CONTROL_ALLOW_METHODS, value);
        }
        if !self.config.allow_headers.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&self.config.allow_headers.join(", ")) {
                headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, value);
            }
        }
        if let Some(max_age) = self.config.max_age {
            headers.insert(ACCESS_CONTROL_MAX_AGE, HeaderValue::from(max_age));
        }
    }
}

#[async_trait]
impl Processor for CorsProcessor {
    fn id(&self) -> &str {
        PROCESSOR_ID
    }

    async fn process(&self, ctx: &mut ExecutionContext, phase: ExecutionPhase) -> PhaseResult {
        let origin = match ctx.request().header(ORIGIN.as_str()) {
            Some(origin) => origin.to_string(),
            None => return Ok(()),
        };

        match phase {
            ExecutionPhase::Request => {
                if !Self::is_preflight(ctx) {
                    return Ok(());
                }
                if self.origin_allowed(&origin) {
                    self.apply_preflight_headers(ctx, &origin);
                    ctx.response_mut().status = StatusCode::NO_CONTENT;
                } else {
                    log::debug!("CORS pre-flight rejected for origin {origin}");
                    ctx.response_mut().status = StatusCode::FORBIDDEN;
                }
                Err(ctx.interrupt())
            }
            ExecutionPhase::Response => {
                if self.origin_allowed(&origin) {
                    if let Ok(value) = HeaderValue::from_str(&origin) {
                        ctx.response_mut()
                            .headers
                            .insert(ACCESS_CONTROL_ALLOW_ORIGIN, value);
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Interruption, Request};

    fn cors() -> CorsProcessor {
        CorsProcessor::new(CorsConfig {
            allow_origins: vec!["https://app.example.com".to_string()],
            allow_methods: vec!["GET".to_string(), "POST".to_string()],
            allow_headers: vec!["content-type".to_string()],
            max_age: Some(600),
        })
    }

    fn preflight_ctx(origin: &str) -> ExecutionContext {
        let request = Request::new(Method::OPTIONS, "/orders")
            .with_header(ORIGIN, origin)
            .with_header(ACCESS_CONTROL_REQUEST_METHOD, "POST");
        ExecutionContext::new(request)
    }

    #[tokio::test]
    async fn test_preflight_interrupts_without_failure() {
        let mut ctx = preflight_ctx("https://app.example.com");
        let result = cors().process(&mut ctx, ExecutionPhase::Request).await;

        assert!(matches!(result, Err(Interruption::Stop)));
        assert!(ctx.internal.execution_failure.is_none());
        assert_eq!(ctx.response().status, StatusCode::NO_CONTENT);
        assert_eq!(
            ctx.response().headers.get(ACCESS_CONTROL_ALLOW_ORIGIN),
            Some(&HeaderValue::from_static("https://app.example.com"))
        );
        assert_eq!(
            ctx.response().headers.get(ACCESS_CONTROL_MAX_AGE),
            Some(&HeaderValue::from(600u32))
        );
    }

    #[tokio::test]
    async fn test_preflight_from_unknown_origin_is_forbidden() {
        let mut ctx = preflight_ctx("https://evil.example.com");
        let result = cors().process(&mut ctx, ExecutionPhase::Request).await;

        assert!(matches!(result, Err(Interruption::Stop)));
        assert_eq!(ctx.response().status, StatusCode::FORBIDDEN);
        assert!(!ctx
            .response()
            .headers
            .contains_key(ACCESS_CONTROL_ALLOW_ORIGIN));
    }

    #[tokio::test]
    async fn test_actual_request_gets_allow_origin_on_response() {
        let request =
            Request::new(Method::GET, "/orders").with_header(ORIGIN, "https://app.example.com");
        let mut ctx = ExecutionContext::new(request);

        cors()
            .process(&mut ctx, ExecutionPhase::Request)
            .await
            .unwrap();
        assert!(!ctx.is_interrupted());

        cors()
            .process(&mut ctx, ExecutionPhase::Response)
            .await
            .unwrap();
        assert!(ctx
            .response()
            .headers
            .contains_key(ACCESS_CONTROL_ALLOW_ORIGIN));
    }
}
