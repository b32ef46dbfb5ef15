use std::sync::Arc;

use async_trait::async_trait;
use conduit_core::MessageUrn;
use tracing::debug;

use crate::context::ConsumeContext;
use crate::error::BusError;
use crate::observer::{ConnectHandle, Connectable};
use crate::pipeline::{Filter, Next};

/// One consumer binding on an inbound pipe.
#[async_trait]
pub trait ConsumeHandler: Send + Sync {
    /// The message type this handler resolves.
    fn message_type(&self) -> MessageUrn;

    /// Handles `ctx` if its payload resolves to this handler's type.
    ///
    /// Returns `Ok(false)` when the payload does not resolve.
    async fn handle(&self, ctx: &ConsumeContext) -> Result<bool, BusError>;
}

/// Terminal consume filter that offers each message to every connected handler.
///
/// Handlers run in connection order; one disconnected before its turn is
/// skipped. A failing handler does not stop the
/// rest; the first failure is returned once all have run. A message no
/// handler resolves is not an error: the receive outcome reports zero
/// consumers.
#[derive(Clone, Default)]
pub struct InboundPipe {
    handlers: Connectable<dyn ConsumeHandler>,
}

impl InboundPipe {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self, handler: Arc<dyn ConsumeHandler>) -> ConnectHandle {
        debug!(message_type = %handler.message_type(), "consume handler connected");
        self.handlers.connect(handler)
    }

    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.handlers.count()
    }

    /// Distinct message types with at least one connected handler.
    #[must_use]
    pub fn message_types(&self) -> Vec<MessageUrn> {
        let mut types: Vec<MessageUrn> = Vec::new();
        for handler in self.handlers.snapshot() {
            let urn = handler.message_type();
            if !types.contains(&urn) {
                types.push(urn);
            }
        }
        types
    }

    async fn dispatch(&self, ctx: &ConsumeContext) -> Result<usize, BusError> {
        let mut handled = 0;
        let mut first_error = None;
        for (id, handler) in self.handlers.entries() {
            if !self.handlers.is_connected(id) {
                continue;
            }
            match handler.handle(ctx).await {
                Ok(true) => handled += 1,
                Ok(false) => {}
                Err(error) => {
                    first_error.get_or_insert(error);
                }
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(handled),
        }
    }
}

#[async_trait]
impl Filter<ConsumeContext> for InboundPipe {
    async fn send(&self, ctx: &mut ConsumeContext, next: Next<'_, ConsumeContext>) -> Result<(), BusError> {
        let handled = self.dispatch(ctx).await?;
        if handled == 0 {
            debug!(
                message_types = ?ctx.supported_message_types(),
                "no consumer resolved message"
            );
        }
        next.send(ctx).await
    }
}
