use std::sync::Arc;

use async_trait::async_trait;
use conduit_core::Address;
use tokio_util::sync::CancellationToken;

use super::SendTransport;
use crate::context::{OutgoingMessage, SendContext};
use crate::error::BusError;
use crate::pipeline::Pipe;
use crate::routing::SendEndpoint;

/// A send transport bound to one destination address.
///
/// Stamps the destination, and a default source when one is configured,
/// before the caller's pipe runs, so the caller can still override either.
pub struct TransportSendEndpoint {
    address: Address,
    source_address: Option<Address>,
    transport: Arc<dyn SendTransport>,
}

impl TransportSendEndpoint {
    /// An endpoint sending to `address` through `transport`.
    #[must_use]
    pub fn new(address: Address, transport: Arc<dyn SendTransport>) -> Self {
        Self {
            address,
            source_address: None,
            transport,
        }
    }

    /// Stamps `source_address` on sends that do not set one.
    #[must_use]
    pub fn with_source(mut self, source_address: Address) -> Self {
        self.source_address = Some(source_address);
        self
    }

    #[must_use]
    pub fn transport(&self) -> &Arc<dyn SendTransport> {
        &self.transport
    }
}

#[async_trait]
impl SendEndpoint for TransportSendEndpoint {
    fn address(&self) -> &Address {
        &self.address
    }

    async fn send(
        &self,
        message: OutgoingMessage,
        pipe: &Pipe<SendContext>,
        cancel: CancellationToken,
    ) -> Result<(), BusError> {
        let destination = self.address.clone();
        let source = self.source_address.clone();
        let pipe = Pipe::builder()
            .execute(move |ctx: &mut SendContext| {
                ctx.destination_address = Some(destination.clone());
                if ctx.source_address.is_none() {
                    ctx.source_address.clone_from(&source);
                }
            })
            .shared_filter(Arc::new(pipe.clone()))
            .build();
        self.transport.send(message, &pipe, cancel).await
    }
}
