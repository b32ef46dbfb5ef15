//! Timeout middleware for receives.
//!
//! Fails receives that run longer than `receive_timeout_ms` with
//! `BusError::Timeout`. The bound covers draining replies and faults.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tower::{Layer, Service};

use crate::context::ReceiveContext;
use crate::error::BusError;
use crate::service::dispatcher::ReceiveOutcome;

// ---------------------------------------------------------------------------
// TimeoutLayer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct TimeoutLayer {
    timeout_ms: u64,
}

impl TimeoutLayer {
    /// Create a new `TimeoutLayer` bounding each receive to `timeout_ms`.
    #[must_use]
    pub fn new(timeout_ms: u64) -> Self {
        Self { timeout_ms }
    }
}

impl<S> Layer<S> for TimeoutLayer {
    type Service = TimeoutService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TimeoutService {
            inner,
            timeout_ms: self.timeout_ms,
        }
    }
}

// ---------------------------------------------------------------------------
// TimeoutService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TimeoutService<S> {
    inner: S,
    timeout_ms: u64,
}

impl<S> Service<ReceiveContext> for TimeoutService<S>
where
    S: Service<ReceiveContext, Response = ReceiveOutcome, Error = BusError> + Send,
    S::Future: Send + 'static,
{
    type Response = ReceiveOutcome;
    type Error = BusError;
    type Future = Pin<Box<dyn Future<Output = Result<ReceiveOutcome, BusError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, receive: ReceiveContext) -> Self::Future {
        let timeout_ms = self.timeout_ms;
        // Cancel the receive's token on expiry so in-flight sends stop short
        // of transmission.
        let cancellation = receive.cancellation().clone();
        let fut = self.inner.call(receive);
        Box::pin(async move {
            match tokio::time::timeout(Duration::from_millis(timeout_ms), fut).await {
                Ok(result) => result,
                Err(_elapsed) => {
                    cancellation.cancel();
                    Err(BusError::Timeout { timeout_ms })
                }
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use conduit_core::Address;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    use super::*;

    /// Service that takes a configurable delay before responding.
    struct SlowService {
        delay_ms: u64,
    }

    impl Service<ReceiveContext> for SlowService {
        type Response = ReceiveOutcome;
        type Error = BusError;
        type Future = Pin<Box<dyn Future<Output = Result<ReceiveOutcome, BusError>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _receive: ReceiveContext) -> Self::Future {
            let delay = self.delay_ms;
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                Ok(ReceiveOutcome {
                    message_id: None,
                    consumed: 0,
                    faulted: 0,
                })
            })
        }
    }

    fn receive(cancel: CancellationToken) -> ReceiveContext {
        ReceiveContext::new(
            Address::from_static("loopback://localhost/input"),
            Bytes::new(),
            None,
            cancel,
        )
    }

    #[tokio::test]
    async fn completes_within_timeout() {
        let svc = TimeoutLayer::new(1000).layer(SlowService { delay_ms: 10 });
        let outcome = svc.oneshot(receive(CancellationToken::new())).await.unwrap();
        assert_eq!(outcome.consumed, 0);
    }

    #[tokio::test]
    async fn exceeds_timeout_returns_error_and_cancels() {
        let cancel = CancellationToken::new();
        let svc = TimeoutLayer::new(50).layer(SlowService { delay_ms: 200 });
        let err = svc.oneshot(receive(cancel.clone())).await.unwrap_err();
        assert!(matches!(err, BusError::Timeout { timeout_ms: 50 }));
        assert!(cancel.is_cancelled());
    }
}
