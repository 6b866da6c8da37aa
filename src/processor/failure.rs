use async_trait::async_trait;
use bytes::Bytes;
use http::{header, HeaderValue, StatusCode};
use serde::Serialize;

use crate::core::{ExecutionContext, ExecutionFailure, ExecutionPhase, PhaseResult};

use super::Processor;

pub const PROCESSOR_ID: &str = "failure-response";

const APPLICATION_JSON: &str = "application/json";

#[derive(Serialize)]
struct FailureBody<'a> {
    message: &'a str,
    http_status_code: u16,
}

/// Shapes the client-visible response from the recorded execution failure.
///
/// Runs on the on-error chain: deliberate rejections and policy bugs converge
/// here, so the client sees the same response shape for both. When nothing was
/// recorded (a raw unexpected error), a plain 500 is produced.
pub struct FailureProcessor;

#[async_trait]
impl Processor for FailureProcessor {
    fn id(&self) -> &str {
        PROCESSOR_ID
    }

    async fn process(&self, ctx: &mut ExecutionContext, _phase: ExecutionPhase) -> PhaseResult {
        let failure = ctx
            .internal
            .execution_failure
            .clone()
            .unwrap_or_else(|| ExecutionFailure::new(StatusCode::INTERNAL_SERVER_ERROR));

        let message = failure
            .message()
            .unwrap_or_else(|| failure.status().canonical_reason().unwrap_or("Unknown error"));
        let body = FailureBody {
            message,
            http_status_code: failure.status().as_u16(),
        };

        let payload = match serde_json::to_vec(&body) {
            Ok(payload) => payload,
            Err(e) => {
                log::error!("Failed to serialize failure body: {e}");
                message.as_bytes().to_vec()
            }
        };

        let content_type = failure.content_type().unwrap_or(APPLICATION_JSON).to_string();

        let response = ctx.response_mut();
        response.status = failure.status();
        response.reason = failure.status().canonical_reason().map(|r| r.to_string());
        if let Ok(value) = HeaderValue::from_str(&content_type) {
            response.headers.insert(header::CONTENT_TYPE, value);
        }
        response
            .headers
            .insert(header::CONTENT_LENGTH, HeaderValue::from(payload.len()));
        response.body = Some(Bytes::from(payload));

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use http::Method;

    use super::*;
    use crate::core::Request;

    #[tokio::test]
    async fn test_recorded_failure_shapes_the_response() {
        let mut ctx = ExecutionContext::new(Request::new(Method::GET, "/"));
        let _ = ctx.interrupt_with(
            ExecutionFailure::new(StatusCode::UNAUTHORIZED).with_message("Unauthorized"),
        );

        FailureProcessor
            .process(&mut ctx, ExecutionPhase::Response)
            .await
            .unwrap();

        assert_eq!(ctx.response().status, StatusCode::UNAUTHORIZED);
        let body = ctx.response().body.as_ref().unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(body).unwrap();
        assert_eq!(parsed["message"], "Unauthorized");
        assert_eq!(parsed["http_status_code"], 401);
        assert_eq!(
            ctx.response().headers.get(header::CONTENT_TYPE),
            Some(&HeaderValue::from_static(APPLICATION_JSON))
        );
    }

    #[tokio::test]
    async fn test_missing_failure_defaults_to_500() {
        let mut ctx = ExecutionContext::new(Request::new(Method::GET, "/"));

        FailureProcessor
            .process(&mut ctx, ExecutionPhase::Response)
            .await
            .unwrap();

        assert_eq!(ctx.response().status, StatusCode::INTERNAL_SERVER_ERROR);
        let body = ctx.response().body.as_ref().unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(body).unwrap();
        assert_eq!(parsed["http_status_code"], 500);
    }
}
