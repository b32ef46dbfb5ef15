//! Metrics middleware for receives.
//!
//! Records receive duration and outcome on a `tracing` span rather than
//! through a metrics crate.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use crate::context::ReceiveContext;
use crate::error::BusError;
use crate::service::dispatcher::ReceiveOutcome;

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

impl<S> Service<ReceiveContext> for MetricsService<S>
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
        let span = info_span!(
            "receive",
            input_address = %receive.input_address(),
            bytes = receive.body().len(),
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
            consumed = tracing::field::Empty,
        );

        let fut = self.inner.call(receive);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

                let (outcome, consumed) = match &result {
                    Ok(o) if o.faulted > 0 => ("faulted", o.consumed),
                    Ok(o) if o.consumed == 0 => ("unconsumed", 0),
                    Ok(o) => ("ok", o.consumed),
                    Err(_) => ("error", 0),
                };

                let span = tracing::Span::current();
                span.record("duration_ms", duration_ms);
                span.record("outcome", outcome);
                span.record("consumed", consumed);

                tracing::info!(duration_ms, outcome, consumed, "receive complete");

                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
