//! Per-request metrics record.
//!
//! One instance lives inside each [`ExecutionContext`](super::context::ExecutionContext)
//! and is updated at well-defined points of the request lifecycle: api
//! identity when the reactor takes the request, endpoint response time around
//! the backend invocation, status and gateway response time when the response
//! is reported.

use std::time::{Duration, Instant};

#[derive(Debug, Default, Clone)]
pub struct Metrics {
    pub api_id: Option<String>,
    pub api_name: Option<String>,
    pub api_type: Option<String>,
    pub status: Option<u16>,
    pub gateway_response_time: Option<Duration>,
    endpoint_response_start: Option<Instant>,
    endpoint_response_time: Option<Duration>,
}

impl Metrics {
    /// Marks the start of the backend invocation. Called when the invoker is
    /// subscribed, before any backend I/O happens.
    pub fn start_endpoint_response(&mut self) {
        self.endpoint_response_start = Some(Instant::now());
    }

    /// Computes the endpoint response time from the recorded start.
    ///
    /// Idempotent: once computed, later calls keep the first value. Callers
    /// invoke this both on normal termination and on error recovery, whichever
    /// comes first wins.
    pub fn compute_endpoint_response_time(&mut self) {
        if self.endpoint_response_time.is_none() {
            if let Some(start) = self.endpoint_response_start {
                self.endpoint_response_time = Some(start.elapsed());
            }
        }
    }

    pub fn endpoint_response_time(&self) -> Option<Duration> {
        self.endpoint_response_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_response_time_is_computed_once() {
        let mut metrics = Metrics::default();
        assert_eq!(metrics.endpoint_response_time(), None);

        // Compute without a start is a no-op.
        metrics.compute_endpoint_response_time();
        assert_eq!(metrics.endpoint_response_time(), None);

        metrics.start_endpoint_response();
        metrics.compute_endpoint_response_time();
        let first = metrics.endpoint_response_time().unwrap();

        std::thread::sleep(Duration::from_millis(5));
        metrics.compute_endpoint_response_time();
        assert_eq!(metrics.endpoint_response_time(), Some(first));
    }
}
