//! Conduit bus: transport-agnostic dispatch core.
//!
//! Inbound messages are wrapped in a [`ConsumeContext`], pushed through a
//! consume [`Pipe`], and offered to connected consumers. Replies, publishes
//! and faults are routed by the [`RoutingResolver`] into send pipes and
//! handed to a [`SendTransport`], whose observers see every send before and
//! after transmission and on failure.

pub mod bus;
pub mod connector;
pub mod context;
pub mod error;
pub mod logging;
pub mod observer;
pub mod pipeline;
pub mod retry;
pub mod routing;
pub mod service;
pub mod transport;

#[cfg(test)]
mod testing;

pub use bus::Bus;
pub use connector::{ConnectorCache, Consumer, Consumes, HandlerRegistry, InstanceConnector};
pub use context::{
    ConsumeContext, MessageConsumeContext, OutgoingMessage, PayloadCache, ReceiveContext,
    SendContext,
};
pub use error::BusError;
pub use logging::init_tracing;
pub use observer::{ConnectHandle, Connectable, ObserverError};
pub use pipeline::{Filter, Next, Pipe, PipeBuilder};
pub use retry::{ImmediateRetry, IntervalRetry, NoRetry, RetryDecision, RetryPolicy};
pub use routing::{
    PublishEndpoint, Route, RoutingResolver, SendEndpoint, SendEndpointExt, SendEndpointProvider,
};
pub use service::{BusConfig, ConsumeDispatcher, ConsumeHandler, InboundPipe, LogConfig, ReceiveOutcome};
pub use transport::{
    LoopbackHub, NativeMessage, PipelineSendTransport, SendObserver, SendTransport,
    SendTransportExt, TransportClient,
};
