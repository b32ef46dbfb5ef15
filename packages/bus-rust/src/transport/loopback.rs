//! In-memory transport.
//!
//! A [`LoopbackHub`] owns one unbounded queue per `loopback://` address.
//! Sends go through the regular [`PipelineSendTransport`], so pipes,
//! serialization and observers behave exactly as with a broker. Publishing
//! fans out to every address bound to one of the message's type URNs.

use std::sync::Arc;

use async_trait::async_trait;
use conduit_core::{Address, MessageSerializer};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tower::{Service, ServiceExt};
use tracing::{debug, info, warn};

use super::send::SendDefaults;
use super::{
    NativeMessage, PipelineSendTransport, SendObserver, SendTransport, TransportClient,
    TransportSendEndpoint,
};
use crate::context::{OutgoingMessage, ReceiveContext, SendContext};
use crate::error::BusError;
use crate::observer::{ConnectHandle, Connectable};
use crate::pipeline::Pipe;
use crate::routing::{PublishEndpoint, SendEndpoint, SendEndpointProvider};
use crate::service::ReceiveOutcome;

pub const LOOPBACK_SCHEME: &str = "loopback";

// ---------------------------------------------------------------------------
// LoopbackClient
// ---------------------------------------------------------------------------

/// [`TransportClient`] that enqueues onto a loopback queue.
pub struct LoopbackClient {
    address: Address,
    sender: mpsc::UnboundedSender<NativeMessage>,
}

#[async_trait]
impl TransportClient for LoopbackClient {
    async fn send_raw(&self, message: NativeMessage) -> anyhow::Result<()> {
        self.sender
            .send(message)
            .map_err(|_| anyhow::anyhow!("loopback queue {} is closed", self.address))
    }
}

// ---------------------------------------------------------------------------
// LoopbackHub
// ---------------------------------------------------------------------------

struct Queue {
    sender: mpsc::UnboundedSender<NativeMessage>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<NativeMessage>>>,
}

struct Binding {
    urn: String,
    address: Address,
}

struct HubInner {
    serializer: Arc<dyn MessageSerializer>,
    defaults: SendDefaults,
    observers: Connectable<dyn SendObserver>,
    queues: DashMap<String, Arc<Queue>>,
    transports: DashMap<String, Arc<dyn SendTransport>>,
    bindings: Connectable<Binding>,
}

/// In-memory queues keyed by address. Cloning shares the hub.
#[derive(Clone)]
pub struct LoopbackHub {
    inner: Arc<HubInner>,
}

impl LoopbackHub {
    /// A hub whose transports encode with `serializer` and default send settings.
    #[must_use]
    pub fn new(serializer: Arc<dyn MessageSerializer>) -> Self {
        Self::with_defaults(serializer, SendDefaults::default())
    }

    /// A hub whose transports stamp `defaults` on every outbound message.
    #[must_use]
    pub fn with_defaults(serializer: Arc<dyn MessageSerializer>, defaults: SendDefaults) -> Self {
        Self {
            inner: Arc::new(HubInner {
                serializer,
                defaults,
                observers: Connectable::new(),
                queues: DashMap::new(),
                transports: DashMap::new(),
                bindings: Connectable::new(),
            }),
        }
    }

    fn queue(&self, address: &Address) -> Arc<Queue> {
        let entry = self
            .inner
            .queues
            .entry(address.to_string())
            .or_insert_with(|| {
                let (sender, receiver) = mpsc::unbounded_channel();
                Arc::new(Queue {
                    sender,
                    receiver: Mutex::new(Some(receiver)),
                })
            });
        Arc::clone(entry.value())
    }

    /// The send transport for `address`, created on first use.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::EndpointNotFound`] for non-loopback addresses.
    pub fn transport(&self, address: &Address) -> Result<Arc<dyn SendTransport>, BusError> {
        if address.scheme_str() != Some(LOOPBACK_SCHEME) {
            return Err(BusError::EndpointNotFound {
                address: address.to_string(),
            });
        }
        let key = address.to_string();
        if let Some(transport) = self.inner.transports.get(&key) {
            return Ok(Arc::clone(transport.value()));
        }

        let client = LoopbackClient {
            address: address.clone(),
            sender: self.queue(address).sender.clone(),
        };
        let transport: Arc<dyn SendTransport> = Arc::new(
            PipelineSendTransport::new(client, Arc::clone(&self.inner.serializer))
                .with_observers(self.inner.observers.clone())
                .with_defaults(self.inner.defaults),
        );
        let entry = self.inner.transports.entry(key).or_insert(transport);
        Ok(Arc::clone(entry.value()))
    }

    /// Routes published messages carrying `urn` to `address`.
    pub fn bind(&self, urn: impl Into<String>, address: Address) -> ConnectHandle {
        let urn = urn.into();
        debug!(%urn, %address, "bound loopback subscriber");
        self.inner.bindings.connect(Arc::new(Binding { urn, address }))
    }

    /// Distinct addresses bound to any of `message_types`, in binding order.
    #[must_use]
    pub fn subscribers(&self, message_types: &[String]) -> Vec<Address> {
        let mut addresses: Vec<Address> = Vec::new();
        for binding in self.inner.bindings.snapshot() {
            let matched = message_types
                .iter()
                .any(|t| t.eq_ignore_ascii_case(&binding.urn));
            if matched && !addresses.contains(&binding.address) {
                addresses.push(binding.address.clone());
            }
        }
        addresses
    }

    /// Observes every send made through this hub.
    pub fn connect_send_observer(&self, observer: Arc<dyn SendObserver>) -> ConnectHandle {
        self.inner.observers.connect(observer)
    }

    /// Takes the receiving half of the queue for `address`, if still available.
    #[must_use]
    pub fn take_receiver(&self, address: &Address) -> Option<mpsc::UnboundedReceiver<NativeMessage>> {
        self.queue(address).receiver.lock().take()
    }

    /// Feeds messages arriving at `address` into `service` until `cancel`
    /// fires or every sender is gone. Returns the number of messages handled.
    ///
    /// Each receive runs as its own task once `service` is ready, so the
    /// service's readiness bounds how many are in flight. Messages stay
    /// queued while it is not ready. On exit the loop waits for every
    /// in-flight receive. Failures of individual receives are logged, not
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::EndpointNotFound`] if another loop already owns
    /// the queue, or the service's readiness error.
    pub async fn receive_loop<S>(
        &self,
        address: &Address,
        mut service: S,
        cancel: CancellationToken,
    ) -> Result<usize, BusError>
    where
        S: Service<ReceiveContext, Response = ReceiveOutcome, Error = BusError> + Send,
        S::Future: Send + 'static,
    {
        let mut receiver = self
            .take_receiver(address)
            .ok_or_else(|| BusError::EndpointNotFound {
                address: address.to_string(),
            })?;
        info!(%address, "receive loop started");

        let mut in_flight = JoinSet::new();
        let mut received = 0_usize;
        let result = loop {
            // Readiness first, so a message is only dequeued once it can run.
            tokio::select! {
                biased;
                () = cancel.cancelled() => break Ok(received),
                ready = service.ready() => {
                    if let Err(error) = ready {
                        break Err(error);
                    }
                }
            }

            let native = tokio::select! {
                biased;
                () = cancel.cancelled() => break Ok(received),
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    log_receive(address, joined);
                    continue;
                }
                next = receiver.recv() => match next {
                    Some(native) => native,
                    None => break Ok(received),
                },
            };
            received += 1;

            let ctx = ReceiveContext::new(
                address.clone(),
                native.body,
                Some(native.content_type),
                cancel.child_token(),
            );
            in_flight.spawn(service.call(ctx));
        };

        while let Some(joined) = in_flight.join_next().await {
            log_receive(address, joined);
        }

        // Hand the queue back so a later loop can resume it.
        *self.queue(address).receiver.lock() = Some(receiver);
        info!(%address, received, "receive loop stopped");
        result
    }
}

fn log_receive(address: &Address, joined: Result<Result<ReceiveOutcome, BusError>, JoinError>) {
    match joined {
        Ok(Ok(outcome)) if outcome.consumed == 0 => {
            debug!(message_id = ?outcome.message_id, "no consumer resolved message");
        }
        Ok(Ok(outcome)) => {
            debug!(message_id = ?outcome.message_id, consumed = outcome.consumed, "message received");
        }
        Ok(Err(error)) => warn!(%address, %error, "receive failed"),
        Err(error) => warn!(%address, %error, "receive task aborted"),
    }
}

#[async_trait]
impl SendEndpointProvider for LoopbackHub {
    async fn send_endpoint(&self, address: &Address) -> Result<Arc<dyn SendEndpoint>, BusError> {
        let transport = self.transport(address)?;
        Ok(Arc::new(TransportSendEndpoint::new(address.clone(), transport)))
    }
}

#[async_trait]
impl PublishEndpoint for LoopbackHub {
    async fn publish(
        &self,
        message: OutgoingMessage,
        pipe: &Pipe<SendContext>,
        cancel: CancellationToken,
    ) -> Result<(), BusError> {
        let subscribers = self.subscribers(message.message_types());
        if subscribers.is_empty() {
            debug!(message_type = ?message.message_types().first(), "no subscribers for published message");
            return Ok(());
        }
        for address in subscribers {
            let endpoint = self.send_endpoint(&address).await?;
            endpoint.send(message.clone(), pipe, cancel.clone()).await?;
        }
        Ok(())
    }
}
