use async_trait::async_trait;
use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, HistogramOpts,
    HistogramVec, IntCounter, IntCounterVec,
};

use crate::core::{ExecutionContext, ExecutionPhase, PhaseResult};

use super::Processor;

pub const PROCESSOR_ID: &str = "metrics";

const DEFAULT_BUCKETS: &[f64] = &[
    1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0, 200.0, 500.0, 1000.0, 2000.0, 5000.0, 10000.0,
    30000.0, 60000.0,
];

// Total number of requests handled by all reactors
static REQUESTS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "gateway_requests_total",
        "The total number of requests handled since the gateway started"
    )
    .unwrap()
});

// Counter for HTTP status codes per API
static STATUS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "gateway_http_status",
        "HTTP status codes per API",
        &[
            "code", // HTTP status code
            "api",  // API ID
        ]
    )
    .unwrap()
});

// Histogram for gateway latency
static LATENCY: Lazy<HistogramVec> = Lazy::new(|| {
    let opts = HistogramOpts::new(
        "gateway_latency",
        "Gateway response time in milliseconds per API",
    )
    .buckets(DEFAULT_BUCKETS.to_vec());
    register_histogram_vec!(opts, &["api"]).unwrap()
});

/// Finalizes the per-request metrics record and feeds the prometheus
/// registry. Runs on the after-handle chain so it observes the response the
/// client actually gets, whatever path produced it.
pub struct MetricsProcessor;

#[async_trait]
impl Processor for MetricsProcessor {
    fn id(&self) -> &str {
        PROCESSOR_ID
    }

    async fn process(&self, ctx: &mut ExecutionContext, _phase: ExecutionPhase) -> PhaseResult {
        let elapsed = ctx.request().timestamp.elapsed();
        let status = ctx.response().status;

        let metrics = ctx.metrics_mut();
        metrics.gateway_response_time = Some(elapsed);
        metrics.status = Some(status.as_u16());

        let api = metrics.api_id.clone().unwrap_or_else(|| "unknown".to_string());

        REQUESTS.inc();
        STATUS
            .with_label_values(&[status.as_str(), api.as_str()])
            .inc();
        LATENCY
            .with_label_values(&[api.as_str()])
            .observe(elapsed.as_secs_f64() * 1000.0);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use http::Method;

    use super::*;
    use crate::core::Request;

    #[tokio::test]
    async fn test_metrics_record_is_finalized() {
        let mut ctx = ExecutionContext::new(Request::new(Method::GET, "/"));
        ctx.metrics_mut().api_id = Some("store-api".to_string());

        MetricsProcessor
            .process(&mut ctx, ExecutionPhase::Response)
            .await
            .unwrap();

        assert_eq!(ctx.metrics().status, Some(200));
        assert!(ctx.metrics().gateway_response_time.is_some());
    }
}
