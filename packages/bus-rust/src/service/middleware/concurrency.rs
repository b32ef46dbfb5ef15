//! Concurrency limit for receives.
//!
//! Caps the number of receives in flight at `max_concurrent_receives`. A
//! saturated endpoint is not ready: the receive loop waits in `poll_ready`
//! and the message stays on its queue until a permit frees up.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::PollSemaphore;
use tower::{Layer, Service};

use crate::context::ReceiveContext;
use crate::error::BusError;
use crate::service::dispatcher::ReceiveOutcome;

// ---------------------------------------------------------------------------
// ConcurrencyLimitLayer
// ---------------------------------------------------------------------------

/// Tower layer that bounds concurrent receives with a shared semaphore.
///
/// Every service produced by one layer draws from the same permits.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimitLayer {
    semaphore: Arc<Semaphore>,
}

impl ConcurrencyLimitLayer {
    /// Create a new `ConcurrencyLimitLayer` allowing `max_concurrent` receives
    /// in flight.
    #[must_use]
    pub fn new(max_concurrent: u32) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent as usize)),
        }
    }
}

impl<S> Layer<S> for ConcurrencyLimitLayer {
    type Service = ConcurrencyLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ConcurrencyLimitService::new(inner, Arc::clone(&self.semaphore))
    }
}

// ---------------------------------------------------------------------------
// ConcurrencyLimitService
// ---------------------------------------------------------------------------

/// Holds back readiness until a receive permit is available.
///
/// The permit acquired in `poll_ready` moves into the future returned by the
/// next `call` and is released when that receive finishes.
#[derive(Debug)]
pub struct ConcurrencyLimitService<S> {
    inner: S,
    semaphore: PollSemaphore,
    permit: Option<OwnedSemaphorePermit>,
}

impl<S> ConcurrencyLimitService<S> {
    fn new(inner: S, semaphore: Arc<Semaphore>) -> Self {
        Self {
            inner,
            semaphore: PollSemaphore::new(semaphore),
            permit: None,
        }
    }

    /// Permits not currently held by a receive or a ready service.
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

impl<S: Clone> Clone for ConcurrencyLimitService<S> {
    fn clone(&self) -> Self {
        // A clone starts unready; the permit stays with the original.
        Self::new(self.inner.clone(), self.semaphore.clone_inner())
    }
}

impl<S> Service<ReceiveContext> for ConcurrencyLimitService<S>
where
    S: Service<ReceiveContext, Response = ReceiveOutcome, Error = BusError> + Send,
    S::Future: Send + 'static,
{
    type Response = ReceiveOutcome;
    type Error = BusError;
    type Future = Pin<Box<dyn Future<Output = Result<ReceiveOutcome, BusError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        if self.permit.is_none() {
            // `None` means the semaphore was closed; this layer never closes it.
            self.permit = ready!(self.semaphore.poll_acquire(cx));
        }
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, receive: ReceiveContext) -> Self::Future {
        let permit = self.permit.take();
        let fut = self.inner.call(receive);
        Box::pin(async move {
            let result = fut.await;
            drop(permit);
            result
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
