use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use conduit_core::MessageSerializer;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{NativeMessage, SendObserver, SendTransport, TransportClient};
use crate::context::{OutgoingMessage, SendContext};
use crate::error::BusError;
use crate::observer::{ConnectHandle, Connectable};
use crate::pipeline::Pipe;

/// Context defaults applied before the caller's pipe runs.
#[derive(Debug, Clone, Copy)]
pub struct SendDefaults {
    pub durable: bool,
    pub time_to_live: Option<Duration>,
}

impl Default for SendDefaults {
    fn default() -> Self {
        Self {
            durable: true,
            time_to_live: None,
        }
    }
}

/// [`SendTransport`] over any [`TransportClient`].
///
/// Each send builds a [`SendContext`], runs the caller's pipe, serializes
/// once, notifies pre-send observers, checks cancellation, transmits, then
/// notifies post-send observers. Any failure along the way is reported to the
/// send-fault observers and returned unchanged. Nothing is retried here.
pub struct PipelineSendTransport<C> {
    client: C,
    serializer: Arc<dyn MessageSerializer>,
    observers: Connectable<dyn SendObserver>,
    defaults: SendDefaults,
}

impl<C: TransportClient> PipelineSendTransport<C> {
    /// Create a new transport over `client` with its own observer set.
    #[must_use]
    pub fn new(client: C, serializer: Arc<dyn MessageSerializer>) -> Self {
        Self {
            client,
            serializer,
            observers: Connectable::new(),
            defaults: SendDefaults::default(),
        }
    }

    /// Shares an existing observer set instead of owning a fresh one.
    #[must_use]
    pub fn with_observers(mut self, observers: Connectable<dyn SendObserver>) -> Self {
        self.observers = observers;
        self
    }

    /// Replaces the durability and time-to-live defaults.
    #[must_use]
    pub fn with_defaults(mut self, defaults: SendDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    #[must_use]
    pub fn client(&self) -> &C {
        &self.client
    }

    #[must_use]
    pub fn observers(&self) -> &Connectable<dyn SendObserver> {
        &self.observers
    }

    async fn transmit(&self, ctx: &mut SendContext, pipe: &Pipe<SendContext>) -> Result<(), BusError> {
        pipe.send(ctx).await?;
        let native = NativeMessage::from_context(ctx)?;

        let ctx: &SendContext = ctx;
        self.observers
            .for_each(|observer| async move { observer.pre_send(ctx).await })
            .await?;

        // Authoritative check: nothing has left the process yet.
        if ctx.cancellation().is_cancelled() {
            return Err(BusError::Cancelled);
        }
        self.client
            .send_raw(native)
            .await
            .map_err(BusError::Transport)?;

        debug!(
            message_id = ?ctx.message_id,
            destination = ?ctx.destination_address.as_ref().map(ToString::to_string),
            "message sent"
        );

        self.observers
            .for_each(|observer| async move { observer.post_send(ctx).await })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl<C: TransportClient> SendTransport for PipelineSendTransport<C> {
    async fn send(
        &self,
        message: OutgoingMessage,
        pipe: &Pipe<SendContext>,
        cancel: CancellationToken,
    ) -> Result<(), BusError> {
        let mut ctx = SendContext::new(message, Arc::clone(&self.serializer), cancel);
        ctx.durable = self.defaults.durable;
        ctx.time_to_live = self.defaults.time_to_live;

        let Err(error) = self.transmit(&mut ctx, pipe).await else {
            return Ok(());
        };

        let ctx = &ctx;
        let error_ref = &error;
        if let Err(observer_error) = self
            .observers
            .for_each(|observer| async move { observer.send_fault(ctx, error_ref).await })
            .await
        {
            warn!(%observer_error, "send fault observers failed");
        }
        Err(error)
    }

    fn connect_send_observer(&self, observer: Arc<dyn SendObserver>) -> ConnectHandle {
        self.observers.connect(observer)
    }
}

#[cfg(test)]
mod tests {
    use conduit_core::{MsgPackSerializer, MSGPACK_CONTENT_TYPE};
    use parking_lot::Mutex;
    use uuid::Uuid;

    use super::*;
    use crate::testing::Ping;
    use crate::transport::SendTransportExt;

    #[derive(Default)]
    struct Wire {
        sent: Mutex<Vec<NativeMessage>>,
        fail: bool,
        cancel_during_send: Option<CancellationToken>,
    }

    #[async_trait]
    impl TransportClient for Arc<Wire> {
        async fn send_raw(&self, message: NativeMessage) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("broker unreachable");
            }
            self.sent.lock().push(message);
            if let Some(token) = &self.cancel_during_send {
                token.cancel();
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct Events(Mutex<Vec<String>>);

    #[async_trait]
    impl SendObserver for Events {
        async fn pre_send(&self, _ctx: &SendContext) -> anyhow::Result<()> {
            self.0.lock().push("pre".to_string());
            Ok(())
        }

        async fn post_send(&self, _ctx: &SendContext) -> anyhow::Result<()> {
            self.0.lock().push("post".to_string());
            Ok(())
        }

        async fn send_fault(&self, _ctx: &SendContext, error: &BusError) -> anyhow::Result<()> {
            tokio::task::yield_now().await;
            self.0.lock().push(format!("fault: {error}"));
            Ok(())
        }
    }

    fn transport(wire: Wire) -> (PipelineSendTransport<Arc<Wire>>, Arc<Events>, ConnectHandle) {
        let transport = PipelineSendTransport::new(Arc::new(wire), Arc::new(MsgPackSerializer));
        let events = Arc::new(Events::default());
        let handle = transport.connect_send_observer(events.clone());
        (transport, events, handle)
    }

    #[tokio::test]
    async fn successful_send_notifies_around_transmission() {
        let (transport, events, _handle) = transport(Wire::default());
        let correlation = Uuid::new_v4();
        let pipe = Pipe::execute(move |ctx: &mut SendContext| {
            ctx.correlation_id = Some(correlation);
            ctx.time_to_live = Some(Duration::from_secs(30));
        });

        transport
            .send_message(&Ping { seq: 1 }, &pipe, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(*events.0.lock(), vec!["pre", "post"]);
        let sent = transport.client().sent.lock();
        assert_eq!(sent.len(), 1);
        let native = &sent[0];
        assert_eq!(native.content_type, MSGPACK_CONTENT_TYPE);
        assert!(native.durable);
        assert_eq!(native.time_to_live, Some(Duration::from_secs(30)));
        assert_eq!(native.correlation_id, Some(correlation.simple().to_string()));
        assert_eq!(native.message_id.as_ref().map(String::len), Some(32));
    }

    #[tokio::test]
    async fn transport_failure_notifies_fault_once_and_rethrows() {
        let (transport, events, _handle) = transport(Wire {
            fail: true,
            ..Wire::default()
        });

        let err = transport
            .send_message(&Ping { seq: 1 }, &Pipe::empty(), CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(&err, BusError::Transport(e) if e.to_string() == "broker unreachable"));
        let events = events.0.lock();
        assert_eq!(
            *events,
            vec![
                "pre".to_string(),
                "fault: transport failure: broker unreachable".to_string()
            ]
        );
    }

    /// Fails the hook named by `fail_on` and records every hook it sees.
    struct Refusing {
        fail_on: &'static str,
        events: Mutex<Vec<String>>,
    }

    impl Refusing {
        fn new(fail_on: &'static str) -> Arc<Self> {
            Arc::new(Self {
                fail_on,
                events: Mutex::new(Vec::new()),
            })
        }

        fn record(&self, hook: &'static str) -> anyhow::Result<()> {
            self.events.lock().push(hook.to_string());
            if hook == self.fail_on {
                anyhow::bail!("{hook} refused");
            }
            Ok(())
        }
    }

    #[async_trait]
    impl SendObserver for Refusing {
        async fn pre_send(&self, _ctx: &SendContext) -> anyhow::Result<()> {
            self.record("pre")
        }

        async fn post_send(&self, _ctx: &SendContext) -> anyhow::Result<()> {
            self.record("post")
        }

        async fn send_fault(&self, _ctx: &SendContext, _error: &BusError) -> anyhow::Result<()> {
            self.record("fault")
        }
    }

    #[tokio::test]
    async fn failing_pre_send_observer_aborts_transmission() {
        let (transport, events, _handle) = transport(Wire::default());
        let refusing = Refusing::new("pre");
        let _refusing = transport.connect_send_observer(refusing.clone());

        let err = transport
            .send_message(&Ping { seq: 1 }, &Pipe::empty(), CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(&err, BusError::Observer(e) if e.failures().len() == 1));
        assert!(transport.client().sent.lock().is_empty());
        assert_eq!(*refusing.events.lock(), vec!["pre", "fault"]);
        let events = events.0.lock();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], "pre");
        assert!(events[1].starts_with("fault:"));
    }

    #[tokio::test]
    async fn failing_post_send_observer_surfaces_after_delivery() {
        let (transport, events, _handle) = transport(Wire::default());
        let refusing = Refusing::new("post");
        let _refusing = transport.connect_send_observer(refusing.clone());

        let err = transport
            .send_message(&Ping { seq: 1 }, &Pipe::empty(), CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(&err, BusError::Observer(e) if e.failures()[0].to_string() == "post refused"));
        assert_eq!(transport.client().sent.lock().len(), 1);
        assert_eq!(*refusing.events.lock(), vec!["pre", "post", "fault"]);
        assert_eq!(events.0.lock()[..2], ["pre".to_string(), "post".to_string()]);
    }

    #[tokio::test]
    async fn pipe_failure_is_reported_before_serialization() {
        let (transport, events, _handle) = transport(Wire::default());
        let pipe = Pipe::execute(|_: &mut SendContext| panic!("header filter broke"));

        let err = transport
            .send_message(&Ping { seq: 1 }, &pipe, CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, BusError::FilterPanicked { .. }));
        assert!(transport.client().sent.lock().is_empty());
        let events = events.0.lock();
        assert_eq!(events.len(), 1);
        assert!(events[0].starts_with("fault:"));
    }

    #[tokio::test]
    async fn cancellation_before_transmission_prevents_send() {
        let (transport, events, _handle) = transport(Wire::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = transport
            .send_message(&Ping { seq: 1 }, &Pipe::empty(), cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, BusError::Cancelled));
        assert!(transport.client().sent.lock().is_empty());
        assert!(!events.0.lock().iter().any(|e| e == "post"));
    }

    #[tokio::test]
    async fn cancellation_after_transmission_is_ignored() {
        let cancel = CancellationToken::new();
        let (transport, events, _handle) = transport(Wire {
            cancel_during_send: Some(cancel.clone()),
            ..Wire::default()
        });

        transport
            .send_message(&Ping { seq: 1 }, &Pipe::empty(), cancel.clone())
            .await
            .unwrap();

        assert!(cancel.is_cancelled());
        assert_eq!(*events.0.lock(), vec!["pre", "post"]);
    }

    #[tokio::test]
    async fn disconnected_observer_is_not_notified() {
        let (transport, events, handle) = transport(Wire::default());
        handle.disconnect();

        transport
            .send_message(&Ping { seq: 1 }, &Pipe::empty(), CancellationToken::new())
            .await
            .unwrap();
        assert!(events.0.lock().is_empty());
    }

    #[tokio::test]
    async fn move_is_unsupported() {
        let (transport, _events, _handle) = transport(Wire::default());
        let receive = crate::context::ReceiveContext::new(
            conduit_core::Address::from_static(crate::testing::INPUT),
            bytes::Bytes::new(),
            None,
            CancellationToken::new(),
        );
        assert!(matches!(
            transport.move_to(&receive).await,
            Err(BusError::UnsupportedOperation { operation: "move" })
        ));
    }

    #[tokio::test]
    async fn defaults_apply_before_the_pipe() {
        let wire = Wire::default();
        let transport = PipelineSendTransport::new(Arc::new(wire), Arc::new(MsgPackSerializer))
            .with_defaults(SendDefaults {
                durable: false,
                time_to_live: Some(Duration::from_secs(5)),
            });

        transport
            .send_message(&Ping { seq: 1 }, &Pipe::empty(), CancellationToken::new())
            .await
            .unwrap();

        let sent = transport.client().sent.lock();
        assert!(!sent[0].durable);
        assert_eq!(sent[0].time_to_live, Some(Duration::from_secs(5)));
    }
}
