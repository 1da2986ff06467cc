use std::time::Duration;

use tarn_protocol::{Request, Response};

use crate::error::Result;
use crate::handler::Handler;
use crate::middleware::Middleware;

/// Delay before each retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Same delay before every retry
    Constant(Duration),
    /// `step * n` before the n-th retry
    Linear(Duration),
    /// `base * 2^(n-1)` before the n-th retry
    Exponential(Duration),
}

impl RetryPolicy {
    /// Delay before retry number `retry` (starting at 1).
    pub fn delay(&self, retry: u32) -> Duration {
        match *self {
            Self::Constant(delay) => delay,
            Self::Linear(step) => step.saturating_mul(retry),
            Self::Exponential(base) => {
                let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
                base.saturating_mul(factor)
            }
        }
    }
}

/// Re-issues a request after a transient failure.
///
/// Only failures for which [`crate::Error::is_transient`] holds are retried;
/// server errors surface immediately. After the last retry the last failure
/// is returned as is.
///
/// A retried write may be applied twice if the server executed it before the
/// connection broke. Only put requests that tolerate that behind this
/// middleware.
#[derive(Debug, Clone)]
pub struct RetryMiddleware {
    max_retries: u32,
    policy: RetryPolicy,
}

impl RetryMiddleware {
    pub fn new(max_retries: u32, policy: RetryPolicy) -> Self {
        Self {
            max_retries,
            policy,
        }
    }

    pub fn constant(max_retries: u32, delay: Duration) -> Self {
        Self::new(max_retries, RetryPolicy::Constant(delay))
    }

    pub fn linear(max_retries: u32, step: Duration) -> Self {
        Self::new(max_retries, RetryPolicy::Linear(step))
    }

    pub fn exponential(max_retries: u32, base: Duration) -> Self {
        Self::new(max_retries, RetryPolicy::Exponential(base))
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

#[async_trait::async_trait]
impl Middleware for RetryMiddleware {
    async fn process(&self, request: &Request, next: &dyn Handler) -> Result<Response> {
        let mut retry = 0;
        loop {
            match next.handle(request).await {
                Err(e) if e.is_transient() && retry < self.max_retries => {
                    retry += 1;
                    let delay = self.policy.delay(retry);
                    tracing::warn!(
                        retry,
                        max_retries = self.max_retries,
                        ?delay,
                        error = %e,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                result => return result,
            }
        }
    }
}
