use async_trait::async_trait;
use http::header::{HeaderName, HeaderValue};

use crate::core::{ExecutionContext, ExecutionPhase, PhaseResult};

use super::Processor;

pub const PROCESSOR_ID: &str = "transaction";

const TRANSACTION_ID_HEADER: &str = "x-transaction-id";
const REQUEST_ID_HEADER: &str = "x-request-id";

/// Propagates transaction and request identifiers.
///
/// A transaction id supplied by the caller is adopted; otherwise the one
/// generated at request creation is used. Both identifiers are reflected on
/// the request (for the backend) and on the response (for the client).
pub struct TransactionProcessor;

#[async_trait]
impl Processor for TransactionProcessor {
    fn id(&self) -> &str {
        PROCESSOR_ID
    }

    async fn process(&self, ctx: &mut ExecutionContext, _phase: ExecutionPhase) -> PhaseResult {
        if let Some(incoming) = ctx.request().header(TRANSACTION_ID_HEADER) {
            let incoming = incoming.to_string();
            ctx.request_mut().transaction_id = incoming;
        }

        let transaction_id = ctx.request().transaction_id.clone();
        let request_id = ctx.request().id.clone();

        set_header(ctx, TRANSACTION_ID_HEADER, &transaction_id);
        set_header(ctx, REQUEST_ID_HEADER, &request_id);

        Ok(())
    }
}

fn set_header(ctx: &mut ExecutionContext, name: &'static str, value: &str) {
    let name = HeaderName::from_static(name);
    match value.parse::<HeaderValue>() {
        Ok(value) => {
            ctx.request_mut().headers.insert(name.clone(), value.clone());
            ctx.response_mut().headers.insert(name, value);
        }
        Err(e) => log::debug!("Skipping invalid header value for {name}: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use http::Method;

    use super::*;
    use crate::core::Request;

    #[tokio::test]
    async fn test_generated_ids_are_reflected() {
        let mut ctx = ExecutionContext::new(Request::new(Method::GET, "/"));
        TransactionProcessor
            .process(&mut ctx, ExecutionPhase::Request)
            .await
            .unwrap();

        let transaction_id = ctx.request().transaction_id.clone();
        assert_eq!(
            ctx.request().header(TRANSACTION_ID_HEADER),
            Some(transaction_id.as_str())
        );
        assert!(ctx.response().headers.contains_key(REQUEST_ID_HEADER));
    }

    #[tokio::test]
    async fn test_incoming_transaction_id_is_adopted() {
        let request = Request::new(Method::GET, "/").with_header(
            HeaderName::from_static(TRANSACTION_ID_HEADER),
            "txn-123",
        );
        let mut ctx = ExecutionContext::new(request);
        TransactionProcessor
            .process(&mut ctx, ExecutionPhase::Request)
            .await
            .unwrap();

        assert_eq!(ctx.request().transaction_id, "txn-123");
    }
}
