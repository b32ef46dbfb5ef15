use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use conduit_core::MessageSerializer;
use tower::Service;
use tracing::warn;
use uuid::Uuid;

use crate::context::{ConsumeContext, ReceiveContext};
use crate::error::BusError;
use crate::pipeline::Pipe;
use crate::routing::RoutingResolver;

/// Result of one receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveOutcome {
    pub message_id: Option<Uuid>,
    /// Consumers that handled the message successfully.
    pub consumed: usize,
    pub faulted: usize,
}

impl ReceiveOutcome {
    /// Whether at least one consumer resolved the message.
    #[must_use]
    pub fn is_dispatched(&self) -> bool {
        self.consumed + self.faulted > 0
    }
}

/// Innermost receive service: decodes the body, runs the consume pipe, and
/// waits for replies and faults spawned along the way.
#[derive(Clone)]
pub struct ConsumeDispatcher {
    pipe: Pipe<ConsumeContext>,
    serializers: Arc<[Arc<dyn MessageSerializer>]>,
    resolver: RoutingResolver,
}

impl ConsumeDispatcher {
    /// `serializers` are matched against the receive content type; the first
    /// one decodes bodies that carry no content type.
    #[must_use]
    pub fn new(
        pipe: Pipe<ConsumeContext>,
        serializers: Vec<Arc<dyn MessageSerializer>>,
        resolver: RoutingResolver,
    ) -> Self {
        Self {
            pipe,
            serializers: Arc::from(serializers),
            resolver,
        }
    }

    fn serializer_for(&self, content_type: Option<&str>) -> Result<Arc<dyn MessageSerializer>, BusError> {
        let found = match content_type {
            Some(content_type) => self
                .serializers
                .iter()
                .find(|s| s.content_type().eq_ignore_ascii_case(content_type)),
            None => self.serializers.first(),
        };
        found.cloned().ok_or_else(|| BusError::UnsupportedContentType {
            content_type: content_type.map(str::to_string),
        })
    }
}

impl Service<ReceiveContext> for ConsumeDispatcher {
    type Response = ReceiveOutcome;
    type Error = BusError;
    type Future = Pin<Box<dyn Future<Output = Result<ReceiveOutcome, BusError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, receive: ReceiveContext) -> Self::Future {
        let serializer = self.serializer_for(receive.content_type());
        let pipe = self.pipe.clone();
        let resolver = self.resolver.clone();

        Box::pin(async move {
            let envelope = serializer?.deserialize(receive.body())?;
            let receive = Arc::new(receive);
            let mut ctx = ConsumeContext::new(Arc::clone(&receive), envelope, resolver);

            let consumed = pipe.send(&mut ctx).await;
            let completed = ctx.complete().await;
            consumed?;
            completed?;

            let message_id = ctx.message_id().unwrap_or_else(|error| {
                warn!(%error, "received message has a malformed id");
                None
            });
            Ok(ReceiveOutcome {
                message_id,
                consumed: receive.consumed_count(),
                faulted: receive.faulted_count(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use conduit_core::{Address, JsonSerializer, MsgPackSerializer, JSON_CONTENT_TYPE};
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    use super::*;
    use crate::testing::{ping_envelope, RecordingBus, INPUT};

    fn dispatcher(pipe: Pipe<ConsumeContext>) -> ConsumeDispatcher {
        ConsumeDispatcher::new(
            pipe,
            vec![Arc::new(MsgPackSerializer), Arc::new(JsonSerializer)],
            RecordingBus::default().resolver(),
        )
    }

    fn receive(body: Vec<u8>, content_type: Option<&str>) -> ReceiveContext {
        ReceiveContext::new(
            Address::from_static(INPUT),
            Bytes::from(body),
            content_type.map(str::to_string),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn decodes_by_content_type_and_runs_pipe() {
        let pipe = Pipe::execute(|ctx: &mut ConsumeContext| {
            assert!(ctx.has_message_type::<crate::testing::Ping>());
        });
        let body = JsonSerializer.serialize(&ping_envelope(3)).unwrap();

        let outcome = dispatcher(pipe)
            .oneshot(receive(body, Some(JSON_CONTENT_TYPE)))
            .await
            .unwrap();
        assert_eq!(outcome.consumed, 0);
        assert!(!outcome.is_dispatched());
    }

    #[tokio::test]
    async fn missing_content_type_uses_first_serializer() {
        let body = MsgPackSerializer.serialize(&ping_envelope(3)).unwrap();
        let outcome = dispatcher(Pipe::empty())
            .oneshot(receive(body, None))
            .await
            .unwrap();
        assert_eq!(outcome.message_id, None);
    }

    #[tokio::test]
    async fn malformed_message_id_is_not_reported_as_an_id() {
        let mut envelope = ping_envelope(3);
        envelope.message_id = Some("zz".to_string());
        let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let pipe = Pipe::execute({
            let ran = Arc::clone(&ran);
            move |ctx: &mut ConsumeContext| {
                assert!(ctx.message_id().is_err());
                ran.store(true, std::sync::atomic::Ordering::SeqCst);
            }
        });

        let body = MsgPackSerializer.serialize(&envelope).unwrap();
        let outcome = dispatcher(pipe).oneshot(receive(body, None)).await.unwrap();
        assert_eq!(outcome.message_id, None);
        assert!(ran.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn unknown_content_type_is_rejected() {
        let err = dispatcher(Pipe::empty())
            .oneshot(receive(b"<xml/>".to_vec(), Some("application/xml")))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BusError::UnsupportedContentType { content_type: Some(ref c) } if c == "application/xml"
        ));
    }

    #[tokio::test]
    async fn undecodable_body_is_a_serialization_error() {
        let err = dispatcher(Pipe::empty())
            .oneshot(receive(b"{broken".to_vec(), Some(JSON_CONTENT_TYPE)))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Serialization(_)));
    }
}
