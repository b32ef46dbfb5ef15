//! Reply and fault routing.
//!
//! A reply goes point-to-point when the inbound envelope names a response
//! address and is published otherwise. Faults follow the same rule. Both
//! carry the receiving endpoint's input address as their source plus the
//! inbound correlation and request ids; faults also copy every inbound header.

use std::sync::Arc;

use async_trait::async_trait;
use conduit_core::{Address, Headers, Message};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::context::{ConsumeContext, OutgoingMessage, SendContext};
use crate::error::BusError;
use crate::pipeline::{Filter, Next, Pipe};

// ---------------------------------------------------------------------------
// Endpoint traits
// ---------------------------------------------------------------------------

/// A destination that accepts outgoing messages.
#[async_trait]
pub trait SendEndpoint: Send + Sync {
    fn address(&self) -> &Address;

    /// Sends `message`, letting `pipe` adjust the context first.
    async fn send(
        &self,
        message: OutgoingMessage,
        pipe: &Pipe<SendContext>,
        cancel: CancellationToken,
    ) -> Result<(), BusError>;
}

/// Typed convenience over [`SendEndpoint`].
#[async_trait]
pub trait SendEndpointExt: SendEndpoint {
    /// # Errors
    ///
    /// Returns the conversion, pipeline or transport error.
    async fn send_message<T: Message>(&self, message: &T) -> Result<(), BusError> {
        let outgoing = OutgoingMessage::new(message)?;
        self.send(outgoing, &Pipe::empty(), CancellationToken::new()).await
    }

    /// # Errors
    ///
    /// Returns the conversion, pipeline or transport error.
    async fn send_message_with<T: Message>(
        &self,
        message: &T,
        pipe: &Pipe<SendContext>,
        cancel: CancellationToken,
    ) -> Result<(), BusError> {
        let outgoing = OutgoingMessage::new(message)?;
        self.send(outgoing, pipe, cancel).await
    }
}

impl<E: SendEndpoint + ?Sized> SendEndpointExt for E {}

/// Resolves an address to a send endpoint.
#[async_trait]
pub trait SendEndpointProvider: Send + Sync {
    async fn send_endpoint(&self, address: &Address) -> Result<Arc<dyn SendEndpoint>, BusError>;
}

/// Fan-out delivery to every subscriber of a message's types.
#[async_trait]
pub trait PublishEndpoint: Send + Sync {
    async fn publish(
        &self,
        message: OutgoingMessage,
        pipe: &Pipe<SendContext>,
        cancel: CancellationToken,
    ) -> Result<(), BusError>;
}

// ---------------------------------------------------------------------------
// Route
// ---------------------------------------------------------------------------

/// Where a reply or fault goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Direct(Address),
    Publish,
}

impl Route {
    #[must_use]
    pub fn for_response_address(response_address: Option<Address>) -> Self {
        response_address.map_or(Self::Publish, Self::Direct)
    }
}

// ---------------------------------------------------------------------------
// ReplyStamp
// ---------------------------------------------------------------------------

/// Stamps reply addressing onto an outbound context before the caller's pipe runs.
struct ReplyStamp {
    source_address: Address,
    correlation_id: Option<Uuid>,
    request_id: Option<Uuid>,
    headers: Option<Headers>,
}

impl ReplyStamp {
    fn from_context(ctx: &ConsumeContext, copy_headers: bool) -> Result<Self, BusError> {
        Ok(Self {
            source_address: ctx.input_address().clone(),
            correlation_id: ctx.correlation_id()?,
            request_id: ctx.request_id()?,
            headers: copy_headers.then(|| ctx.headers().clone()),
        })
    }
}

#[async_trait]
impl Filter<SendContext> for ReplyStamp {
    async fn send(&self, ctx: &mut SendContext, next: Next<'_, SendContext>) -> Result<(), BusError> {
        ctx.source_address = Some(self.source_address.clone());
        ctx.correlation_id = self.correlation_id;
        ctx.request_id = self.request_id;
        if let Some(headers) = &self.headers {
            for (key, value) in headers.iter() {
                ctx.headers.set(key, value.clone());
            }
        }
        next.send(ctx).await
    }
}

// ---------------------------------------------------------------------------
// RoutingResolver
// ---------------------------------------------------------------------------

/// Applies the reply/fault routing rule over pluggable endpoints.
#[derive(Clone)]
pub struct RoutingResolver {
    send_endpoints: Arc<dyn SendEndpointProvider>,
    publish: Arc<dyn PublishEndpoint>,
}

impl RoutingResolver {
    /// Create a new resolver over point-to-point and publish endpoints.
    #[must_use]
    pub fn new(send_endpoints: Arc<dyn SendEndpointProvider>, publish: Arc<dyn PublishEndpoint>) -> Self {
        Self {
            send_endpoints,
            publish,
        }
    }

    /// Replies to the message held by `ctx`.
    ///
    /// # Errors
    ///
    /// Returns a [`BusError::Format`] if the inbound response address or ids
    /// are malformed, otherwise the endpoint's error.
    pub async fn respond(
        &self,
        ctx: &ConsumeContext,
        message: OutgoingMessage,
        pipe: &Pipe<SendContext>,
    ) -> Result<(), BusError> {
        let route = Route::for_response_address(ctx.response_address()?);
        let pipe = Pipe::builder()
            .filter(ReplyStamp::from_context(ctx, false)?)
            .shared_filter(Arc::new(pipe.clone()))
            .build();
        self.deliver(route, message, &pipe, ctx.cancellation().clone()).await
    }

    /// Delivers a fault event for the message held by `ctx`.
    ///
    /// # Errors
    ///
    /// Same as [`RoutingResolver::respond`].
    pub async fn fault(&self, ctx: &ConsumeContext, fault: OutgoingMessage) -> Result<(), BusError> {
        let route = Route::for_response_address(ctx.response_address()?);
        let pipe = Pipe::builder()
            .filter(ReplyStamp::from_context(ctx, true)?)
            .build();
        self.deliver(route, fault, &pipe, ctx.cancellation().clone()).await
    }

    /// # Errors
    ///
    /// Returns the publish endpoint's error.
    pub async fn publish(
        &self,
        message: OutgoingMessage,
        pipe: &Pipe<SendContext>,
        cancel: CancellationToken,
    ) -> Result<(), BusError> {
        self.publish.publish(message, pipe, cancel).await
    }

    /// # Errors
    ///
    /// Returns an error if the provider cannot resolve `address`.
    pub async fn send_endpoint(&self, address: &Address) -> Result<Arc<dyn SendEndpoint>, BusError> {
        self.send_endpoints.send_endpoint(address).await
    }

    async fn deliver(
        &self,
        route: Route,
        message: OutgoingMessage,
        pipe: &Pipe<SendContext>,
        cancel: CancellationToken,
    ) -> Result<(), BusError> {
        match route {
            Route::Direct(address) => {
                debug!(%address, message_type = ?message.message_types().first(), "sending reply");
                let endpoint = self.send_endpoints.send_endpoint(&address).await?;
                endpoint.send(message, pipe, cancel).await
            }
            Route::Publish => {
                debug!(message_type = ?message.message_types().first(), "publishing reply");
                self.publish.publish(message, pipe, cancel).await
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
