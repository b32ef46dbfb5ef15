//! Filter pipelines.
//!
//! A [`Pipe`] is an immutable, ordered chain of [`Filter`]s over a context
//! type. Every send, publish, and consume operation pushes its context
//! through one. Each filter either passes the context on via [`Next::send`],
//! stops the chain by returning without calling it, or fails, in which case
//! the error unwinds to the caller unchanged.
//!
//! A pipe is built once and may run any number of operations concurrently;
//! filters only mutate state through the context they are handed.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;

use crate::error::BusError;

// ---------------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------------

/// One stage of a pipeline.
#[async_trait]
pub trait Filter<C: Send>: Send + Sync {
    /// Processes `ctx`. Call `next.send(ctx)` to continue the chain.
    async fn send(&self, ctx: &mut C, next: Next<'_, C>) -> Result<(), BusError>;
}

/// The remainder of a pipeline after the current filter.
pub struct Next<'a, C: Send> {
    filters: &'a [Arc<dyn Filter<C>>],
}

impl<C: Send> Next<'_, C> {
    /// Runs the remaining filters against `ctx`.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by a downstream filter.
    pub async fn send(self, ctx: &mut C) -> Result<(), BusError> {
        match self.filters.split_first() {
            Some((filter, rest)) => filter.send(ctx, Next { filters: rest }).await,
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// DelegateFilter
// ---------------------------------------------------------------------------

/// Runs a synchronous callback against the context, then continues.
pub struct DelegateFilter<F>(F);

impl<F> DelegateFilter<F> {
    /// Create a new `DelegateFilter` that runs `callback` before continuing.
    pub fn new(callback: F) -> Self {
        Self(callback)
    }
}

#[async_trait]
impl<C, F> Filter<C> for DelegateFilter<F>
where
    C: Send,
    F: Fn(&mut C) + Send + Sync,
{
    async fn send(&self, ctx: &mut C, next: Next<'_, C>) -> Result<(), BusError> {
        (self.0)(ctx);
        next.send(ctx).await
    }
}

// ---------------------------------------------------------------------------
// Pipe
// ---------------------------------------------------------------------------

/// An immutable chain of filters. Cloning is cheap.
pub struct Pipe<C: Send> {
    filters: Arc<[Arc<dyn Filter<C>>]>,
}

impl<C: Send> Pipe<C> {
    /// A pipe with no filters; sending through it is a no-op.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            filters: Arc::from(Vec::new()),
        }
    }

    /// Start an empty [`PipeBuilder`].
    #[must_use]
    pub fn builder() -> PipeBuilder<C> {
        PipeBuilder {
            filters: Vec::new(),
        }
    }

    /// A pipe holding a single callback filter.
    #[must_use]
    pub fn execute<F>(callback: F) -> Self
    where
        C: 'static,
        F: Fn(&mut C) + Send + Sync + 'static,
    {
        Self::builder().execute(callback).build()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Pushes `ctx` through every filter.
    ///
    /// A panicking filter completes the call with [`BusError::FilterPanicked`]
    /// instead of unwinding into the caller.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by a filter, unmodified.
    pub async fn send(&self, ctx: &mut C) -> Result<(), BusError> {
        let next = Next {
            filters: &self.filters,
        };
        match AssertUnwindSafe(next.send(ctx)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(BusError::FilterPanicked {
                message: panic_message(panic.as_ref()),
            }),
        }
    }
}

impl<C: Send> Clone for Pipe<C> {
    fn clone(&self) -> Self {
        Self {
            filters: Arc::clone(&self.filters),
        }
    }
}

impl<C: Send> Default for Pipe<C> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<C: Send> fmt::Debug for Pipe<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipe").field("filters", &self.filters.len()).finish()
    }
}

/// Filter a pipe into another pipe's chain.
#[async_trait]
impl<C: Send> Filter<C> for Pipe<C> {
    async fn send(&self, ctx: &mut C, next: Next<'_, C>) -> Result<(), BusError> {
        Pipe::send(self, ctx).await?;
        next.send(ctx).await
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ---------------------------------------------------------------------------
// PipeBuilder
// ---------------------------------------------------------------------------

/// Collects filters in execution order.
pub struct PipeBuilder<C: Send> {
    filters: Vec<Arc<dyn Filter<C>>>,
}

impl<C: Send> PipeBuilder<C> {
    /// Appends `filter`; filters run in the order they are added.
    #[must_use]
    pub fn filter(mut self, filter: impl Filter<C> + 'static) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    /// Appends a filter that is also held elsewhere, such as another pipe.
    #[must_use]
    pub fn shared_filter(mut self, filter: Arc<dyn Filter<C>>) -> Self {
        self.filters.push(filter);
        self
    }

    /// Appends a [`DelegateFilter`] running `callback`.
    #[must_use]
    pub fn execute<F>(self, callback: F) -> Self
    where
        C: 'static,
        F: Fn(&mut C) + Send + Sync + 'static,
    {
        self.filter(DelegateFilter::new(callback))
    }

    /// Freeze the collected filters into a [`Pipe`].
    #[must_use]
    pub fn build(self) -> Pipe<C> {
        Pipe {
            filters: Arc::from(self.filters),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[derive(Debug, Default)]
    struct Trace {
        steps: Vec<&'static str>,
    }

    struct Step(&'static str);

    #[async_trait]
    impl Filter<Trace> for Step {
        async fn send(&self, ctx: &mut Trace, next: Next<'_, Trace>) -> Result<(), BusError> {
            ctx.steps.push(self.0);
            next.send(ctx).await
        }
    }

    struct Suspend;

    #[async_trait]
    impl Filter<Trace> for Suspend {
        async fn send(&self, ctx: &mut Trace, next: Next<'_, Trace>) -> Result<(), BusError> {
            tokio::time::sleep(Duration::from_millis(5)).await;
            ctx.steps.push("resumed");
            next.send(ctx).await
        }
    }

    struct Stop;

    #[async_trait]
    impl Filter<Trace> for Stop {
        async fn send(&self, ctx: &mut Trace, _next: Next<'_, Trace>) -> Result<(), BusError> {
            ctx.steps.push("stop");
            Ok(())
        }
    }

    struct Fail;

    #[async_trait]
    impl Filter<Trace> for Fail {
        async fn send(&self, _ctx: &mut Trace, _next: Next<'_, Trace>) -> Result<(), BusError> {
            Err(BusError::filter(anyhow::anyhow!("rejected by policy")))
        }
    }

    struct Panics;

    #[async_trait]
    impl Filter<Trace> for Panics {
        async fn send(&self, _ctx: &mut Trace, _next: Next<'_, Trace>) -> Result<(), BusError> {
            panic!("filter blew up");
        }
    }

    #[tokio::test]
    async fn empty_pipe_is_pass_through() {
        let pipe = Pipe::<Trace>::empty();
        let mut ctx = Trace::default();
        pipe.send(&mut ctx).await.unwrap();
        assert!(ctx.steps.is_empty());
        assert!(pipe.is_empty());
    }

    #[tokio::test]
    async fn filters_run_in_order_across_suspension() {
        let pipe = Pipe::builder()
            .filter(Step("a"))
            .filter(Suspend)
            .filter(Step("b"))
            .build();
        let mut ctx = Trace::default();
        pipe.send(&mut ctx).await.unwrap();
        assert_eq!(ctx.steps, vec!["a", "resumed", "b"]);
    }

    #[tokio::test]
    async fn short_circuit_skips_remaining_filters() {
        let pipe = Pipe::builder()
            .filter(Step("a"))
            .filter(Stop)
            .filter(Step("never"))
            .build();
        let mut ctx = Trace::default();
        pipe.send(&mut ctx).await.unwrap();
        assert_eq!(ctx.steps, vec!["a", "stop"]);
    }

    #[tokio::test]
    async fn failure_unwinds_with_original_error() {
        let pipe = Pipe::builder()
            .filter(Step("a"))
            .filter(Fail)
            .filter(Step("never"))
            .build();
        let mut ctx = Trace::default();
        let err = pipe.send(&mut ctx).await.unwrap_err();
        assert!(matches!(&err, BusError::Filter(e) if e.to_string() == "rejected by policy"));
        assert_eq!(ctx.steps, vec!["a"]);
    }

    #[tokio::test]
    async fn panic_completes_with_error() {
        let pipe = Pipe::builder().filter(Step("a")).filter(Panics).build();
        let mut ctx = Trace::default();
        let err = pipe.send(&mut ctx).await.unwrap_err();
        assert!(matches!(err, BusError::FilterPanicked { message } if message == "filter blew up"));
    }

    #[tokio::test]
    async fn execute_builds_delegate_filters() {
        let pipe = Pipe::builder()
            .execute(|ctx: &mut Trace| ctx.steps.push("delegate"))
            .filter(Step("after"))
            .build();
        let mut ctx = Trace::default();
        pipe.send(&mut ctx).await.unwrap();
        assert_eq!(ctx.steps, vec!["delegate", "after"]);
    }

    #[tokio::test]
    async fn nested_pipe_runs_inline() {
        let inner = Pipe::builder().filter(Step("inner")).build();
        let outer = Pipe::builder()
            .filter(Step("outer"))
            .filter(inner)
            .filter(Step("tail"))
            .build();
        let mut ctx = Trace::default();
        outer.send(&mut ctx).await.unwrap();
        assert_eq!(ctx.steps, vec!["outer", "inner", "tail"]);
    }

    #[tokio::test]
    async fn shared_pipe_runs_concurrently() {
        let pipe = Pipe::builder().filter(Suspend).filter(Step("done")).build();
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let pipe = pipe.clone();
                tokio::spawn(async move {
                    let mut ctx = Trace::default();
                    pipe.send(&mut ctx).await.map(|()| ctx.steps)
                })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), vec!["resumed", "done"]);
        }
    }
}
