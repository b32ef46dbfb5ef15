//! Tower middleware layers for the receive endpoint.
//!
//! - [`timeout`]: Per-receive timeout enforcement
//! - [`metrics`]: Receive timing and outcome via `tracing` spans
//! - [`concurrency`]: Semaphore-based backpressure on receives
//! - [`pipeline`]: Composes all layers into a single service stack

pub mod concurrency;
pub mod metrics;
pub mod pipeline;
pub mod timeout;

pub use concurrency::ConcurrencyLimitLayer;
pub use metrics::MetricsLayer;
pub use pipeline::{build_receive_pipeline, ReceivePipeline};
pub use timeout::TimeoutLayer;
