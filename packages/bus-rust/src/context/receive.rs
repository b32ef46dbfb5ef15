use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use bytes::{Buf, Bytes};
use conduit_core::{Address, MessageUrn};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::payload::PayloadCache;

/// Transport-level view of one inbound delivery.
///
/// Built by a transport's receive loop and handed to the receive endpoint.
/// Consume contexts created from it share its payload table and counters.
#[derive(Debug)]
pub struct ReceiveContext {
    input_address: Address,
    body: Bytes,
    content_type: Option<String>,
    cancellation: CancellationToken,
    payloads: PayloadCache,
    received_at: Instant,
    consumed: AtomicUsize,
    faulted: AtomicUsize,
}

impl ReceiveContext {
    #[must_use]
    pub fn new(
        input_address: Address,
        body: Bytes,
        content_type: Option<String>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            input_address,
            body,
            content_type,
            cancellation,
            payloads: PayloadCache::new(),
            received_at: Instant::now(),
            consumed: AtomicUsize::new(0),
            faulted: AtomicUsize::new(0),
        }
    }

    /// Address of the endpoint that received this message.
    #[must_use]
    pub fn input_address(&self) -> &Address {
        &self.input_address
    }

    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Sequential reader over the body; each call starts from the beginning.
    #[must_use]
    pub fn body_reader(&self) -> impl std::io::Read {
        self.body.clone().reader()
    }

    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    #[must_use]
    pub fn payloads(&self) -> &PayloadCache {
        &self.payloads
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.received_at.elapsed()
    }

    /// Number of consumers that completed successfully.
    #[must_use]
    pub fn consumed_count(&self) -> usize {
        self.consumed.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn faulted_count(&self) -> usize {
        self.faulted.load(Ordering::Acquire)
    }

    pub(crate) fn notify_consumed(&self, duration: Duration, message_type: &MessageUrn, consumer: &str) {
        self.consumed.fetch_add(1, Ordering::AcqRel);
        debug!(
            input_address = %self.input_address,
            message_type = %message_type,
            consumer,
            duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            "message consumed"
        );
    }

    pub(crate) fn notify_faulted(&self, message_type: &MessageUrn, consumer: &str, error: &str) {
        self.faulted.fetch_add(1, Ordering::AcqRel);
        warn!(
            input_address = %self.input_address,
            message_type = %message_type,
            consumer,
            error,
            "consumer faulted"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;

    fn receive(body: &'static [u8]) -> ReceiveContext {
        ReceiveContext::new(
            Address::from_static("loopback://localhost/input"),
            Bytes::from_static(body),
            Some("application/json".to_string()),
            CancellationToken::new(),
        )
    }

    #[test]
    fn body_reader_restarts_each_time() {
        let ctx = receive(b"payload");
        for _ in 0..2 {
            let mut out = String::new();
            ctx.body_reader().read_to_string(&mut out).unwrap();
            assert_eq!(out, "payload");
        }
    }

    #[test]
    fn counters_track_notifications() {
        let ctx = receive(b"{}");
        let urn = MessageUrn::new("Tests", "Ping");
        ctx.notify_consumed(Duration::from_millis(3), &urn, "PingConsumer");
        ctx.notify_consumed(Duration::from_millis(1), &urn, "OtherConsumer");
        ctx.notify_faulted(&urn, "BrokenConsumer", "boom");

        assert_eq!(ctx.consumed_count(), 2);
        assert_eq!(ctx.faulted_count(), 1);
        assert_eq!(ctx.content_type(), Some("application/json"));
    }
}
