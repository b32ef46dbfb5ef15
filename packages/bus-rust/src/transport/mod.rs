//! Send transports.
//!
//! - [`send`]: [`PipelineSendTransport`], the pipe/serialize/observe/transmit sequence
//! - [`endpoint`]: [`TransportSendEndpoint`], a transport bound to one destination
//! - [`loopback`]: in-memory queues for tests and single-process buses

pub mod endpoint;
pub mod loopback;
pub mod send;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use conduit_core::{format_native_id, Message, SerializationError};
use tokio_util::sync::CancellationToken;

use crate::context::{OutgoingMessage, ReceiveContext, SendContext};
use crate::error::BusError;
use crate::observer::ConnectHandle;
use crate::pipeline::Pipe;

pub use endpoint::TransportSendEndpoint;
pub use loopback::{LoopbackClient, LoopbackHub};
pub use send::PipelineSendTransport;

// ---------------------------------------------------------------------------
// NativeMessage
// ---------------------------------------------------------------------------

/// The record handed to a physical transport.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeMessage {
    pub body: Bytes,
    pub content_type: String,
    pub durable: bool,
    pub time_to_live: Option<Duration>,
    /// Simple (unhyphenated) hex form.
    pub message_id: Option<String>,
    /// Simple (unhyphenated) hex form.
    pub correlation_id: Option<String>,
}

impl NativeMessage {
    /// Serializes `ctx` once. Optional properties are copied only when set.
    ///
    /// # Errors
    ///
    /// Returns an error if the body cannot be serialized.
    pub fn from_context(ctx: &SendContext) -> Result<Self, SerializationError> {
        Ok(Self {
            body: ctx.body()?,
            content_type: ctx.content_type().to_string(),
            durable: ctx.durable,
            time_to_live: ctx.time_to_live,
            message_id: ctx.message_id.as_ref().map(format_native_id),
            correlation_id: ctx.correlation_id.as_ref().map(format_native_id),
        })
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Physical send binding. Errors are opaque to the bus.
#[async_trait]
pub trait TransportClient: Send + Sync {
    async fn send_raw(&self, message: NativeMessage) -> anyhow::Result<()>;
}

/// Hooks around each physical send.
#[async_trait]
pub trait SendObserver: Send + Sync {
    async fn pre_send(&self, _ctx: &SendContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn post_send(&self, _ctx: &SendContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn send_fault(&self, _ctx: &SendContext, _error: &BusError) -> anyhow::Result<()> {
        Ok(())
    }
}

#[async_trait]
pub trait SendTransport: Send + Sync {
    /// Runs `pipe`, serializes, and transmits `message`.
    ///
    /// Observers see pre-send strictly before and post-send strictly after a
    /// successful transmission. On failure the send-fault hooks complete
    /// before the original error is returned.
    async fn send(
        &self,
        message: OutgoingMessage,
        pipe: &Pipe<SendContext>,
        cancel: CancellationToken,
    ) -> Result<(), BusError>;

    /// Redirects a received message elsewhere, e.g. to a dead-letter queue.
    async fn move_to(&self, _receive: &ReceiveContext) -> Result<(), BusError> {
        Err(BusError::UnsupportedOperation { operation: "move" })
    }

    fn connect_send_observer(&self, observer: Arc<dyn SendObserver>) -> ConnectHandle;
}

/// Typed convenience over [`SendTransport`].
#[async_trait]
pub trait SendTransportExt: SendTransport {
    /// # Errors
    ///
    /// Returns the conversion, pipeline or transport error.
    async fn send_message<T: Message>(
        &self,
        message: &T,
        pipe: &Pipe<SendContext>,
        cancel: CancellationToken,
    ) -> Result<(), BusError> {
        let outgoing = OutgoingMessage::new(message)?;
        self.send(outgoing, pipe, cancel).await
    }
}

impl<S: SendTransport + ?Sized> SendTransportExt for S {}
