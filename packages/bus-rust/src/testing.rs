//! Shared fixtures for unit tests.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use conduit_core::{to_token, Address, Envelope, Message, MessageUrn, MsgPackSerializer};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::context::{ConsumeContext, OutgoingMessage, ReceiveContext, SendContext};
use crate::error::BusError;
use crate::pipeline::Pipe;
use crate::routing::{PublishEndpoint, RoutingResolver, SendEndpoint, SendEndpointProvider};

pub(crate) const INPUT: &str = "loopback://localhost/input";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Ping {
    pub seq: u32,
}

impl Message for Ping {
    fn message_urn() -> MessageUrn {
        MessageUrn::new("Tests", "Ping")
    }
}

pub(crate) fn ping_envelope(seq: u32) -> Envelope {
    Envelope::new(
        vec![Ping::message_urn().into()],
        to_token(&Ping { seq }).unwrap_or(rmpv::Value::Nil),
    )
}

/// One captured delivery; `destination` is `None` for publishes.
#[derive(Debug, Clone)]
pub(crate) struct Delivery {
    pub destination: Option<Address>,
    pub envelope: Envelope,
}

/// Endpoint provider and publisher that run the pipe and record the result.
#[derive(Clone, Default)]
pub(crate) struct RecordingBus {
    deliveries: Arc<Mutex<Vec<Delivery>>>,
}

impl RecordingBus {
    pub fn resolver(&self) -> RoutingResolver {
        RoutingResolver::new(Arc::new(self.clone()), Arc::new(self.clone()))
    }

    pub fn sent(&self) -> Vec<Delivery> {
        self.deliveries.lock().clone()
    }

    pub fn published_count(&self) -> usize {
        self.deliveries
            .lock()
            .iter()
            .filter(|d| d.destination.is_none())
            .count()
    }

    async fn record(
        &self,
        destination: Option<Address>,
        message: OutgoingMessage,
        pipe: &Pipe<SendContext>,
        cancel: CancellationToken,
    ) -> Result<(), BusError> {
        let mut ctx = SendContext::new(message, Arc::new(MsgPackSerializer), cancel);
        ctx.destination_address.clone_from(&destination);
        pipe.send(&mut ctx).await?;
        self.deliveries.lock().push(Delivery {
            destination,
            envelope: ctx.to_envelope(),
        });
        Ok(())
    }
}

struct RecordingEndpoint {
    address: Address,
    bus: RecordingBus,
}

#[async_trait]
impl SendEndpoint for RecordingEndpoint {
    fn address(&self) -> &Address {
        &self.address
    }

    async fn send(
        &self,
        message: OutgoingMessage,
        pipe: &Pipe<SendContext>,
        cancel: CancellationToken,
    ) -> Result<(), BusError> {
        self.bus
            .record(Some(self.address.clone()), message, pipe, cancel)
            .await
    }
}

#[async_trait]
impl SendEndpointProvider for RecordingBus {
    async fn send_endpoint(&self, address: &Address) -> Result<Arc<dyn SendEndpoint>, BusError> {
        Ok(Arc::new(RecordingEndpoint {
            address: address.clone(),
            bus: self.clone(),
        }))
    }
}

#[async_trait]
impl PublishEndpoint for RecordingBus {
    async fn publish(
        &self,
        message: OutgoingMessage,
        pipe: &Pipe<SendContext>,
        cancel: CancellationToken,
    ) -> Result<(), BusError> {
        self.record(None, message, pipe, cancel).await
    }
}

/// A consume context over `envelope` whose replies land in the returned bus.
pub(crate) fn consume_context(envelope: Envelope) -> (ConsumeContext, RecordingBus) {
    let bus = RecordingBus::default();
    let receive = ReceiveContext::new(
        Address::from_static(INPUT),
        Bytes::new(),
        None,
        CancellationToken::new(),
    );
    let ctx = ConsumeContext::new(Arc::new(receive), envelope, bus.resolver());
    (ctx, bus)
}
