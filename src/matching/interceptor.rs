use std::time::Instant;
use tracing::{info, warn};

use super::error::MatcherError;

/// One call of a matcher operation, as seen by interceptors.
#[derive(Debug)]
pub struct Invocation<'a> {
    pub operation: &'static str,
    pub client_id: &'a str,
    pub started: Instant,
}

/// Policy wrapped around every matcher operation. `before` runs in
/// registration order, `after` in reverse.
pub trait Interceptor: Send + Sync {
    fn before(&self, _invocation: &Invocation<'_>) {}

    fn after(&self, _invocation: &Invocation<'_>, _outcome: Result<(), &MatcherError>) {}
}

/// Logs each operation with its duration.
pub struct TracingInterceptor;

impl Interceptor for TracingInterceptor {
    fn before(&self, invocation: &Invocation<'_>) {
        info!(
            operation = invocation.operation,
            client_id = %invocation.client_id,
            "Operation started"
        );
    }

    fn after(&self, invocation: &Invocation<'_>, outcome: Result<(), &MatcherError>) {
        let elapsed_ms = invocation.started.elapsed().as_millis() as u64;
        match outcome {
            Ok(()) => info!(
                operation = invocation.operation,
                client_id = %invocation.client_id,
                elapsed_ms,
                "Operation finished"
            ),
            Err(e) => warn!(
                operation = invocation.operation,
                client_id = %invocation.client_id,
                elapsed_ms,
                kind = ?e.kind(),
                "Operation failed: {}", e
            ),
        }
    }
}
