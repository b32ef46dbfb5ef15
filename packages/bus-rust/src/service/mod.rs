//! Receive endpoint.
//!
//! 1. **Middleware** (`middleware`): Tower layers (concurrency limit, timeout, metrics)
//! 2. **Dispatch** (`dispatcher`): body decoding and consume pipe execution
//! 3. **Inbound pipe** (`inbound`): fan-out to connected consumer bindings
//! 4. **Configuration** (`config`): endpoint and outbound defaults

pub mod config;
pub mod dispatcher;
pub mod inbound;
pub mod middleware;

pub use config::{BusConfig, LogConfig};
pub use dispatcher::{ConsumeDispatcher, ReceiveOutcome};
pub use inbound::{ConsumeHandler, InboundPipe};
pub use middleware::{build_receive_pipeline, ReceivePipeline};
