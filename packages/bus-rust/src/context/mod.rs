//! Per-operation contexts.
//!
//! - [`receive`]: transport-level inbound delivery (body, input address, cancellation)
//! - [`consume`]: envelope view with lazy typed resolution and pending-work tracking
//! - [`send`]: outbound context mutated by send pipelines
//! - [`payload`]: type-indexed side table shared between filters

pub mod consume;
pub mod payload;
pub mod receive;
pub mod send;

pub use consume::{ConsumeContext, MessageConsumeContext};
pub use payload::PayloadCache;
pub use receive::ReceiveContext;
pub use send::{OutgoingMessage, SendContext};
