//! Consumer connectors.
//!
//! A consumer declares the message types it handles once, through
//! [`Consumer::register`]. The resulting [`InstanceConnector`] is the dispatch
//! plan for that consumer type: it binds any number of instances into an
//! [`InboundPipe`], one [`ConsumeHandler`] per declared message type.
//! [`ConnectorCache`] builds each plan at most once per type.

use std::any::{type_name, Any, TypeId};
use std::error::Error as StdError;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use async_trait::async_trait;
use conduit_core::{Message, MessageUrn};
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::context::{ConsumeContext, MessageConsumeContext};
use crate::error::BusError;
use crate::observer::ConnectHandle;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::service::inbound::{ConsumeHandler, InboundPipe};

// ---------------------------------------------------------------------------
// Consumer contracts
// ---------------------------------------------------------------------------

/// Handles messages of type `T`.
#[async_trait]
pub trait Consumes<T: Message>: Send + Sync {
    /// # Errors
    ///
    /// A returned error is offered to the retry policy; once it gives up, a
    /// fault is routed for the message.
    async fn consume(&self, ctx: &MessageConsumeContext<T>) -> anyhow::Result<()>;
}

/// A consumer type and the message types it handles.
///
/// ```ignore
/// impl Consumer for OrderConsumer {
///     fn register(registry: &mut HandlerRegistry<Self>) {
///         registry.handle::<OrderPlaced>().handle::<OrderCancelled>();
///     }
/// }
/// ```
pub trait Consumer: Send + Sync + Sized + 'static {
    fn register(registry: &mut HandlerRegistry<Self>);
}

/// Collects the handlers a [`Consumer`] declares.
pub struct HandlerRegistry<C> {
    handlers: Vec<Arc<dyn MessageHandler<C>>>,
}

impl<C: Consumer> HandlerRegistry<C> {
    fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Declares that `C` handles `T`. Declaring the same type twice is a no-op.
    pub fn handle<T: Message>(&mut self) -> &mut Self
    where
        C: Consumes<T>,
    {
        let urn = T::message_urn();
        if !self.handlers.iter().any(|h| h.message_type() == urn) {
            self.handlers.push(Arc::new(TypedHandler::<T>(PhantomData)));
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[async_trait]
trait MessageHandler<C>: Send + Sync {
    fn message_type(&self) -> MessageUrn;

    async fn invoke(
        &self,
        consumer: &C,
        ctx: &ConsumeContext,
        retry: &dyn RetryPolicy,
    ) -> Result<bool, BusError>;
}

struct TypedHandler<T>(PhantomData<fn() -> T>);

#[async_trait]
impl<C, T> MessageHandler<C> for TypedHandler<T>
where
    C: Consumer + Consumes<T>,
    T: Message,
{
    fn message_type(&self) -> MessageUrn {
        T::message_urn()
    }

    async fn invoke(
        &self,
        consumer: &C,
        ctx: &ConsumeContext,
        retry: &dyn RetryPolicy,
    ) -> Result<bool, BusError> {
        let Some(message) = ctx.try_get_message::<T>() else {
            return Ok(false);
        };
        let consumer_name = type_name::<C>();
        let urn = T::message_urn();
        let start = Instant::now();

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let error = match Consumes::<T>::consume(consumer, &message).await {
                Ok(()) => {
                    ctx.notify_consumed(start.elapsed(), &urn, consumer_name);
                    return Ok(true);
                }
                Err(error) => error,
            };

            match retry.should_retry(attempt, &error) {
                RetryDecision::Retry { delay } => {
                    warn!(
                        consumer = consumer_name,
                        message_type = %urn,
                        attempt,
                        error = %error,
                        "consume attempt failed, retrying"
                    );
                    if !delay.is_zero() {
                        tokio::select! {
                            () = tokio::time::sleep(delay) => {}
                            () = ctx.cancellation().cancelled() => return Err(BusError::Cancelled),
                        }
                    }
                }
                RetryDecision::Stop => {
                    let source: &(dyn StdError + 'static) = error.as_ref();
                    ctx.notify_faulted(message.message(), consumer_name, source)?;
                    return Err(BusError::Consumer {
                        consumer: consumer_name,
                        source: error,
                    });
                }
            }
        }
    }
}

/// One handler of one consumer instance, connected to an inbound pipe.
struct HandlerBinding<C> {
    handler: Arc<dyn MessageHandler<C>>,
    instance: Arc<C>,
    retry: Arc<dyn RetryPolicy>,
}

#[async_trait]
impl<C: Consumer> ConsumeHandler for HandlerBinding<C> {
    fn message_type(&self) -> MessageUrn {
        self.handler.message_type()
    }

    async fn handle(&self, ctx: &ConsumeContext) -> Result<bool, BusError> {
        self.handler
            .invoke(&self.instance, ctx, self.retry.as_ref())
            .await
    }
}

// ---------------------------------------------------------------------------
// InstanceConnector
// ---------------------------------------------------------------------------

/// Dispatch plan for consumer type `C`.
pub struct InstanceConnector<C> {
    handlers: Vec<Arc<dyn MessageHandler<C>>>,
}

impl<C: Consumer> InstanceConnector<C> {
    /// Runs `C::register` and captures the declared handlers.
    #[must_use]
    pub fn build() -> Self {
        let mut registry = HandlerRegistry::new();
        C::register(&mut registry);
        Self {
            handlers: registry.handlers,
        }
    }

    /// Message types `C` declared, in declaration order.
    #[must_use]
    pub fn message_types(&self) -> Vec<MessageUrn> {
        self.handlers.iter().map(|h| h.message_type()).collect()
    }

    /// Connects `instance` to `pipe`, one binding per declared message type.
    ///
    /// Dropping or disconnecting the returned handle removes every binding.
    pub fn connect(
        &self,
        pipe: &InboundPipe,
        instance: Arc<C>,
        retry: Arc<dyn RetryPolicy>,
    ) -> ConnectHandle {
        let handles = self
            .handlers
            .iter()
            .map(|handler| {
                pipe.connect(Arc::new(HandlerBinding {
                    handler: Arc::clone(handler),
                    instance: Arc::clone(&instance),
                    retry: Arc::clone(&retry),
                }))
            })
            .collect();
        ConnectHandle::combine(handles)
    }
}

impl<C> fmt::Debug for InstanceConnector<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceConnector")
            .field("consumer", &type_name::<C>())
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ConnectorCache
// ---------------------------------------------------------------------------

/// Append-only map from consumer type to its [`InstanceConnector`].
#[derive(Default)]
pub struct ConnectorCache {
    connectors: DashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    built: AtomicUsize,
}

impl ConnectorCache {
    /// An empty cache. Most callers share [`ConnectorCache::global`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide cache.
    pub fn global() -> &'static ConnectorCache {
        static CACHE: OnceLock<ConnectorCache> = OnceLock::new();
        CACHE.get_or_init(ConnectorCache::new)
    }

    /// Returns the connector for `C`, building it on first use.
    pub fn connector<C: Consumer>(&self) -> Arc<InstanceConnector<C>> {
        let entry = self
            .connectors
            .entry(TypeId::of::<C>())
            .or_insert_with(|| {
                self.built.fetch_add(1, Ordering::Relaxed);
                let connector = InstanceConnector::<C>::build();
                debug!(
                    consumer = type_name::<C>(),
                    handlers = connector.handlers.len(),
                    "consumer connector built"
                );
                Arc::new(connector) as Arc<dyn Any + Send + Sync>
            })
            .value()
            .clone();

        entry
            .downcast::<InstanceConnector<C>>()
            .unwrap_or_else(|_| Arc::new(InstanceConnector::build()))
    }

    /// Number of connectors built so far.
    #[must_use]
    pub fn built_count(&self) -> usize {
        self.built.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.connectors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }
}

impl fmt::Debug for ConnectorCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorCache")
            .field("connectors", &self.connectors.len())
            .field("built", &self.built_count())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
