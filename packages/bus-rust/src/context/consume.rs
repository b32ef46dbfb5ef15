use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::ops::Deref;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use conduit_core::{
    from_token, parse_address, parse_id, to_token, Address, Envelope, Fault, FormatError, Headers,
    Message, MessageUrn, PayloadKind,
};
use parking_lot::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::receive::ReceiveContext;
use super::send::{OutgoingMessage, SendContext};
use crate::error::BusError;
use crate::pipeline::Pipe;
use crate::routing::{RoutingResolver, SendEndpoint};

type Resolved = Option<Arc<dyn Any + Send + Sync>>;
type Cached<T> = OnceLock<Result<Option<T>, FormatError>>;

// ---------------------------------------------------------------------------
// ConsumeContext
// ---------------------------------------------------------------------------

/// Consume-side view of one received envelope.
///
/// Typed messages are resolved lazily and memoized per type; identity and
/// address accessors parse once and cache the outcome, failures included.
/// Replies and faults spawned from this context are tracked until
/// [`ConsumeContext::complete`] drains them.
///
/// Cloning is cheap and shares all state.
#[derive(Clone)]
pub struct ConsumeContext {
    inner: Arc<ConsumeInner>,
}

struct ConsumeInner {
    receive: Arc<ReceiveContext>,
    envelope: Envelope,
    token: rmpv::Value,
    resolved: Mutex<HashMap<TypeId, Resolved>>,
    message_id: Cached<Uuid>,
    correlation_id: Cached<Uuid>,
    request_id: Cached<Uuid>,
    source_address: Cached<Address>,
    destination_address: Cached<Address>,
    response_address: Cached<Address>,
    fault_address: Cached<Address>,
    pending: Mutex<JoinSet<Result<(), BusError>>>,
    resolver: RoutingResolver,
}

impl ConsumeContext {
    #[must_use]
    pub fn new(receive: Arc<ReceiveContext>, envelope: Envelope, resolver: RoutingResolver) -> Self {
        let token = envelope.message_token();
        Self {
            inner: Arc::new(ConsumeInner {
                receive,
                envelope,
                token,
                resolved: Mutex::new(HashMap::new()),
                message_id: OnceLock::new(),
                correlation_id: OnceLock::new(),
                request_id: OnceLock::new(),
                source_address: OnceLock::new(),
                destination_address: OnceLock::new(),
                response_address: OnceLock::new(),
                fault_address: OnceLock::new(),
                pending: Mutex::new(JoinSet::new()),
                resolver,
            }),
        }
    }

    // -- message resolution -------------------------------------------------

    /// Whether `T` is available. The raw token is always available. A cached
    /// resolution wins; otherwise the declared type list is consulted,
    /// ignoring ASCII case.
    #[must_use]
    pub fn has_message_type<T: Message>(&self) -> bool {
        if T::KIND == PayloadKind::RawToken {
            return true;
        }
        if let Some(resolved) = self.inner.resolved.lock().get(&TypeId::of::<T>()) {
            return resolved.is_some();
        }
        T::message_urn().is_declared_in(&self.inner.envelope.message_type)
    }

    /// Resolves the payload as `T`.
    ///
    /// The first call decides the outcome for the lifetime of the context;
    /// concurrent callers for the same `T` observe a single deserialization.
    /// A declared type that fails to deserialize is cached as absent.
    #[must_use]
    pub fn try_get_message<T: Message>(&self) -> Option<MessageConsumeContext<T>> {
        let key = TypeId::of::<T>();
        let mut resolved = self.inner.resolved.lock();
        let entry = match resolved.get(&key) {
            Some(entry) => entry.clone(),
            None => {
                let entry = self.resolve::<T>();
                resolved.insert(key, entry.clone());
                entry
            }
        };
        drop(resolved);

        let message = entry?.downcast::<T>().ok()?;
        Some(MessageConsumeContext {
            context: self.clone(),
            message,
        })
    }

    fn resolve<T: Message>(&self) -> Resolved {
        if T::KIND == PayloadKind::RawToken {
            let raw: Arc<dyn Any + Send + Sync> = Arc::new(self.inner.token.clone());
            return raw.downcast::<T>().ok().map(|m| m as Arc<dyn Any + Send + Sync>);
        }

        let urn = T::message_urn();
        if !urn.is_declared_in(&self.inner.envelope.message_type) {
            return None;
        }
        match from_token::<T>(&self.inner.token) {
            Ok(message) => {
                debug!(message_type = %urn, "resolved message");
                Some(Arc::new(message))
            }
            Err(error) => {
                warn!(message_type = %urn, %error, "declared message type failed to deserialize");
                None
            }
        }
    }

    /// Declared type URNs, most derived first.
    #[must_use]
    pub fn supported_message_types(&self) -> &[String] {
        &self.inner.envelope.message_type
    }

    // -- identity and addressing ----------------------------------------------

    /// # Errors
    ///
    /// Returns [`FormatError`] if the id is present but malformed.
    pub fn message_id(&self) -> Result<Option<Uuid>, FormatError> {
        self.inner
            .message_id
            .get_or_init(|| parse_id("messageId", self.inner.envelope.message_id.as_deref()))
            .clone()
    }

    /// # Errors
    ///
    /// Returns [`FormatError`] if the id is present but malformed.
    pub fn correlation_id(&self) -> Result<Option<Uuid>, FormatError> {
        self.inner
            .correlation_id
            .get_or_init(|| {
                parse_id("correlationId", self.inner.envelope.correlation_id.as_deref())
            })
            .clone()
    }

    /// # Errors
    ///
    /// Returns [`FormatError`] if the id is present but malformed.
    pub fn request_id(&self) -> Result<Option<Uuid>, FormatError> {
        self.inner
            .request_id
            .get_or_init(|| parse_id("requestId", self.inner.envelope.request_id.as_deref()))
            .clone()
    }

    /// # Errors
    ///
    /// Returns [`FormatError`] if the address is present but not an absolute URI.
    pub fn source_address(&self) -> Result<Option<Address>, FormatError> {
        self.inner
            .source_address
            .get_or_init(|| {
                parse_address("sourceAddress", self.inner.envelope.source_address.as_deref())
            })
            .clone()
    }

    /// # Errors
    ///
    /// Returns [`FormatError`] if the address is present but not an absolute URI.
    pub fn destination_address(&self) -> Result<Option<Address>, FormatError> {
        self.inner
            .destination_address
            .get_or_init(|| {
                parse_address(
                    "destinationAddress",
                    self.inner.envelope.destination_address.as_deref(),
                )
            })
            .clone()
    }

    /// # Errors
    ///
    /// Returns [`FormatError`] if the address is present but not an absolute URI.
    pub fn response_address(&self) -> Result<Option<Address>, FormatError> {
        self.inner
            .response_address
            .get_or_init(|| {
                parse_address("responseAddress", self.inner.envelope.response_address.as_deref())
            })
            .clone()
    }

    /// # Errors
    ///
    /// Returns [`FormatError`] if the address is present but not an absolute URI.
    pub fn fault_address(&self) -> Result<Option<Address>, FormatError> {
        self.inner
            .fault_address
            .get_or_init(|| {
                parse_address("faultAddress", self.inner.envelope.fault_address.as_deref())
            })
            .clone()
    }

    #[must_use]
    pub fn expiration_time(&self) -> Option<DateTime<Utc>> {
        self.inner.envelope.expiration_time
    }

    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.inner.envelope.headers
    }

    #[must_use]
    pub fn envelope(&self) -> &Envelope {
        &self.inner.envelope
    }

    #[must_use]
    pub fn receive_context(&self) -> &ReceiveContext {
        &self.inner.receive
    }

    #[must_use]
    pub fn input_address(&self) -> &Address {
        self.inner.receive.input_address()
    }

    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        self.inner.receive.cancellation()
    }

    // -- payload side table -------------------------------------------------

    #[must_use]
    pub fn has_payload_type<P: Any + Send + Sync>(&self) -> bool {
        self.inner.receive.payloads().has::<P>()
    }

    #[must_use]
    pub fn try_get_payload<P: Any + Send + Sync>(&self) -> Option<Arc<P>> {
        self.inner.receive.payloads().try_get::<P>()
    }

    pub fn get_or_add_payload<P, F>(&self, factory: F) -> Arc<P>
    where
        P: Any + Send + Sync,
        F: FnOnce() -> P,
    {
        self.inner.receive.payloads().get_or_add(factory)
    }

    // -- outbound -----------------------------------------------------------

    pub(crate) fn resolver(&self) -> &RoutingResolver {
        &self.inner.resolver
    }

    /// Replies with `message`, tracking delivery as pending work.
    ///
    /// # Errors
    ///
    /// Returns an error if `message` cannot be converted to a token. Delivery
    /// failures surface from [`ConsumeContext::complete`].
    pub fn respond<T: Message>(&self, message: &T) -> Result<(), BusError> {
        let outgoing = OutgoingMessage::new(message)?;
        let ctx = self.clone();
        self.track(async move { ctx.resolver().respond(&ctx, outgoing, &Pipe::empty()).await });
        Ok(())
    }

    /// Replies with `message` and waits for delivery.
    ///
    /// # Errors
    ///
    /// Returns the routing or transport error.
    pub async fn respond_async<T: Message>(&self, message: &T) -> Result<(), BusError> {
        self.respond_with(message, &Pipe::empty()).await
    }

    /// Replies with `message`, running `pipe` after the reply addressing is set.
    ///
    /// # Errors
    ///
    /// Returns the routing or transport error.
    pub async fn respond_with<T: Message>(
        &self,
        message: &T,
        pipe: &Pipe<SendContext>,
    ) -> Result<(), BusError> {
        let outgoing = OutgoingMessage::new(message)?;
        self.resolver().respond(self, outgoing, pipe).await
    }

    /// # Errors
    ///
    /// Returns the publish error.
    pub async fn publish<T: Message>(&self, message: &T) -> Result<(), BusError> {
        let outgoing = OutgoingMessage::new(message)?;
        self.resolver()
            .publish(outgoing, &Pipe::empty(), self.cancellation().clone())
            .await
    }

    /// # Errors
    ///
    /// Returns an error if no endpoint can be resolved for `address`.
    pub async fn send_endpoint(&self, address: &Address) -> Result<Arc<dyn SendEndpoint>, BusError> {
        self.resolver().send_endpoint(address).await
    }

    /// Records a successful consumption on the receive context.
    pub fn notify_consumed(&self, elapsed: Duration, message_type: &MessageUrn, consumer: &str) {
        self.inner.receive.notify_consumed(elapsed, message_type, consumer);
    }

    /// Routes a [`Fault`] for `message` and records the failure.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Format`] if the inbound message id is malformed,
    /// or an error if the fault cannot be converted to a token. Delivery
    /// failures surface from [`ConsumeContext::complete`].
    pub fn notify_faulted<T: Message>(
        &self,
        message: &T,
        consumer: &str,
        error: &(dyn StdError + 'static),
    ) -> Result<(), BusError> {
        let fault = Fault::new(message, self.message_id()?, error);
        let outgoing = OutgoingMessage::from_parts(
            to_token(&fault)?,
            Fault::<T>::message_types().into_iter().map(String::from).collect(),
        );
        self.inner
            .receive
            .notify_faulted(&T::message_urn(), consumer, &error.to_string());

        let ctx = self.clone();
        self.track(async move { ctx.resolver().fault(&ctx, outgoing).await });
        Ok(())
    }

    /// Redelivery is not offered by this receive path.
    ///
    /// # Errors
    ///
    /// Always returns [`BusError::UnsupportedOperation`].
    pub fn retry_later(&self) -> Result<(), BusError> {
        Err(BusError::UnsupportedOperation {
            operation: "retry_later",
        })
    }

    // -- pending work ---------------------------------------------------------

    fn track<F>(&self, work: F)
    where
        F: Future<Output = Result<(), BusError>> + Send + 'static,
    {
        self.inner.pending.lock().spawn(work);
    }

    /// Number of tracked operations not yet drained.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Waits for every tracked operation, including ones spawned while
    /// waiting.
    ///
    /// # Errors
    ///
    /// Returns the first failure; later failures are logged.
    pub async fn complete(&self) -> Result<(), BusError> {
        let mut first_error = None;
        loop {
            let mut pending = std::mem::take(&mut *self.inner.pending.lock());
            if pending.is_empty() {
                break;
            }
            while let Some(joined) = pending.join_next().await {
                let outcome = match joined {
                    Ok(outcome) => outcome,
                    Err(error) => Err(BusError::PendingTaskFailed(error.to_string())),
                };
                if let Err(error) = outcome {
                    if first_error.is_none() {
                        first_error = Some(error);
                    } else {
                        warn!(%error, "additional pending task failed");
                    }
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl fmt::Debug for ConsumeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumeContext")
            .field("input_address", self.input_address())
            .field("message_id", &self.inner.envelope.message_id)
            .field("message_type", &self.inner.envelope.message_type)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// MessageConsumeContext
// ---------------------------------------------------------------------------

/// A consume context together with its payload resolved as `T`.
pub struct MessageConsumeContext<T> {
    context: ConsumeContext,
    message: Arc<T>,
}

impl<T> MessageConsumeContext<T> {
    #[must_use]
    pub fn message(&self) -> &T {
        &self.message
    }

    #[must_use]
    pub fn context(&self) -> &ConsumeContext {
        &self.context
    }
}

impl<T> Deref for MessageConsumeContext<T> {
    type Target = ConsumeContext;

    fn deref(&self) -> &ConsumeContext {
        &self.context
    }
}

impl<T> Clone for MessageConsumeContext<T> {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
            message: Arc::clone(&self.message),
        }
    }
}

impl<T> fmt::Debug for MessageConsumeContext<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageConsumeContext")
            .field("message_type", &type_name::<T>())
            .field("context", &self.context)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
