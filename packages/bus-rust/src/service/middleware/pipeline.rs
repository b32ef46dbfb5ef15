//! Pipeline composition: combines all middleware layers into a single receive stack.

use tower::ServiceBuilder;

use super::concurrency::{ConcurrencyLimitLayer, ConcurrencyLimitService};
use super::metrics::{MetricsLayer, MetricsService};
use super::timeout::{TimeoutLayer, TimeoutService};
use crate::service::config::BusConfig;
use crate::service::dispatcher::ConsumeDispatcher;

/// The full receive stack produced by [`build_receive_pipeline`].
pub type ReceivePipeline =
    ConcurrencyLimitService<TimeoutService<MetricsService<ConsumeDispatcher>>>;

/// Wraps the `ConsumeDispatcher` with middleware layers.
///
/// Layer order (outermost to innermost):
/// 1. `ConcurrencyLimitLayer` -- hold back readiness while saturated (before decoding)
/// 2. `TimeoutLayer` -- bound the receive, pending replies included
/// 3. `MetricsLayer` -- record timing and outcome (closest to the dispatcher)
#[must_use]
pub fn build_receive_pipeline(dispatcher: ConsumeDispatcher, config: &BusConfig) -> ReceivePipeline {
    ServiceBuilder::new()
        .layer(ConcurrencyLimitLayer::new(config.max_concurrent_receives))
        .layer(TimeoutLayer::new(config.receive_timeout_ms))
        .layer(MetricsLayer)
        .service(dispatcher)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
