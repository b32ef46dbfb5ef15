//! Bus facade over the loopback transport.
//!
//! Wires the inbound pipe, connector cache, routing resolver and receive
//! middleware together for one input address.

use std::sync::Arc;

use conduit_core::{Address, JsonSerializer, Message, MessageSerializer, MsgPackSerializer};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::connector::{ConnectorCache, Consumer};
use crate::context::{ConsumeContext, OutgoingMessage, SendContext};
use crate::error::BusError;
use crate::observer::ConnectHandle;
use crate::pipeline::Pipe;
use crate::retry::{NoRetry, RetryPolicy};
use crate::routing::{PublishEndpoint, RoutingResolver, SendEndpoint, SendEndpointProvider};
use crate::service::{
    build_receive_pipeline, BusConfig, ConsumeDispatcher, InboundPipe, ReceivePipeline,
};
use crate::transport::{LoopbackHub, SendObserver};

pub struct Bus {
    config: BusConfig,
    serializer: Arc<dyn MessageSerializer>,
    hub: LoopbackHub,
    inbound: InboundPipe,
    connectors: &'static ConnectorCache,
}

impl Bus {
    /// A bus that writes `MessagePack` bodies.
    #[must_use]
    pub fn new(config: BusConfig) -> Self {
        Self::with_serializer(config, Arc::new(MsgPackSerializer))
    }

    /// A bus on a fresh hub. Both built-in serializers decode inbound bodies;
    /// `serializer` encodes outbound ones.
    #[must_use]
    pub fn with_serializer(config: BusConfig, serializer: Arc<dyn MessageSerializer>) -> Self {
        let hub = LoopbackHub::with_defaults(Arc::clone(&serializer), config.send_defaults());
        Self::with_hub(config, serializer, hub)
    }

    /// A bus receiving from `config.input_address` on a shared hub.
    #[must_use]
    pub fn with_hub(
        config: BusConfig,
        serializer: Arc<dyn MessageSerializer>,
        hub: LoopbackHub,
    ) -> Self {
        Self {
            config,
            serializer,
            hub,
            inbound: InboundPipe::new(),
            connectors: ConnectorCache::global(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    #[must_use]
    pub fn input_address(&self) -> &Address {
        &self.config.input_address
    }

    #[must_use]
    pub fn hub(&self) -> &LoopbackHub {
        &self.hub
    }

    #[must_use]
    pub fn inbound_pipe(&self) -> &InboundPipe {
        &self.inbound
    }

    #[must_use]
    pub fn resolver(&self) -> RoutingResolver {
        RoutingResolver::new(Arc::new(self.hub.clone()), Arc::new(self.hub.clone()))
    }

    // -- subscriptions --------------------------------------------------------

    /// Connects `instance` without retries.
    pub fn subscribe_instance<C: Consumer>(&self, instance: Arc<C>) -> ConnectHandle {
        self.subscribe_instance_with_retry(instance, Arc::new(NoRetry))
    }

    /// Connects `instance` to the inbound pipe and binds every message type
    /// it handles to this bus's input address.
    ///
    /// The returned handle removes both the handlers and the bindings.
    pub fn subscribe_instance_with_retry<C: Consumer>(
        &self,
        instance: Arc<C>,
        retry: Arc<dyn RetryPolicy>,
    ) -> ConnectHandle {
        let connector = self.connectors.connector::<C>();
        let mut handles = vec![connector.connect(&self.inbound, instance, retry)];
        for urn in connector.message_types() {
            handles.push(self.hub.bind(urn, self.config.input_address.clone()));
        }
        ConnectHandle::combine(handles)
    }

    // -- receive side ---------------------------------------------------------

    /// The consume pipe: every connected consumer, offered in turn.
    #[must_use]
    pub fn consume_pipe(&self) -> Pipe<ConsumeContext> {
        Pipe::builder().filter(self.inbound.clone()).build()
    }

    /// The full receive stack for this bus.
    #[must_use]
    pub fn receive_service(&self) -> ReceivePipeline {
        let mut serializers = vec![Arc::clone(&self.serializer)];
        let builtins: [Arc<dyn MessageSerializer>; 2] =
            [Arc::new(MsgPackSerializer), Arc::new(JsonSerializer)];
        for builtin in builtins {
            if !serializers
                .iter()
                .any(|s| s.content_type().eq_ignore_ascii_case(builtin.content_type()))
            {
                serializers.push(builtin);
            }
        }

        let dispatcher = ConsumeDispatcher::new(self.consume_pipe(), serializers, self.resolver());
        build_receive_pipeline(dispatcher, &self.config)
    }

    /// Receives on the input address until `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns an error if another loop already receives on the input address.
    pub async fn run(&self, cancel: CancellationToken) -> Result<usize, BusError> {
        info!(
            input_address = %self.config.input_address,
            consumers = self.inbound.handler_count(),
            "bus started"
        );
        self.hub
            .receive_loop(&self.config.input_address, self.receive_service(), cancel)
            .await
    }

    // -- send side ------------------------------------------------------------

    /// Publishes `message` to every address bound to one of its types.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be serialized or a send fails.
    pub async fn publish<T: Message>(&self, message: &T) -> Result<(), BusError> {
        let source = self.config.input_address.clone();
        let pipe = Pipe::execute(move |ctx: &mut SendContext| {
            if ctx.source_address.is_none() {
                ctx.source_address = Some(source.clone());
            }
        });
        self.hub
            .publish(OutgoingMessage::new(message)?, &pipe, CancellationToken::new())
            .await
    }

    /// # Errors
    ///
    /// Returns [`BusError::EndpointNotFound`] for addresses the hub cannot reach.
    pub async fn send_endpoint(&self, address: &Address) -> Result<Arc<dyn SendEndpoint>, BusError> {
        self.hub.send_endpoint(address).await
    }

    pub fn connect_send_observer(&self, observer: Arc<dyn SendObserver>) -> ConnectHandle {
        self.hub.connect_send_observer(observer)
    }
}
