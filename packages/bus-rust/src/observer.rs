//! Connectable observer sets with fan-out notification.
//!
//! [`Connectable`] holds the observers currently connected to a transport,
//! an inbound pipe, or any other notification source. [`Connectable::for_each`]
//! fans a notification out to every observer connected at dispatch time and
//! aggregates failures so one broken observer never hides delivery to the rest.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures_util::future::join_all;
use parking_lot::RwLock;
use tracing::warn;

// ---------------------------------------------------------------------------
// ObserverError
// ---------------------------------------------------------------------------

/// Aggregated failures from a single fan-out notification.
#[derive(Debug)]
pub struct ObserverError {
    failures: Vec<anyhow::Error>,
}

impl ObserverError {
    /// Individual observer failures, in connection order.
    #[must_use]
    pub fn failures(&self) -> &[anyhow::Error] {
        &self.failures
    }

    #[must_use]
    pub fn into_failures(self) -> Vec<anyhow::Error> {
        self.failures
    }
}

impl fmt::Display for ObserverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} observer(s) failed", self.failures.len())?;
        if let Some(first) = self.failures.first() {
            write!(f, ": {first}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ObserverError {}

// ---------------------------------------------------------------------------
// ConnectHandle
// ---------------------------------------------------------------------------

/// Live connection of an observer or consumer binding.
///
/// Dropping the handle disconnects. Call [`ConnectHandle::detach`] to keep the
/// connection for the lifetime of its source instead.
#[must_use = "dropping a ConnectHandle disconnects immediately"]
pub struct ConnectHandle {
    disconnect: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl ConnectHandle {
    pub(crate) fn new(disconnect: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            disconnect: Some(Box::new(disconnect)),
        }
    }

    /// Combines several handles into one that disconnects all of them.
    pub fn combine(handles: Vec<ConnectHandle>) -> Self {
        Self::new(move || drop(handles))
    }

    /// Removes the connection. A notification already in flight skips the
    /// observer unless it has already been invoked.
    pub fn disconnect(mut self) {
        if let Some(disconnect) = self.disconnect.take() {
            disconnect();
        }
    }

    /// Keeps the connection alive without holding the handle.
    pub fn detach(mut self) {
        self.disconnect = None;
    }
}

impl Drop for ConnectHandle {
    fn drop(&mut self) {
        if let Some(disconnect) = self.disconnect.take() {
            disconnect();
        }
    }
}

impl fmt::Debug for ConnectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectHandle")
            .field("connected", &self.disconnect.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Connectable
// ---------------------------------------------------------------------------

struct Connections<T: ?Sized> {
    next_id: AtomicU64,
    /// Keyed by a monotonically increasing id so iteration follows connection order.
    observers: RwLock<BTreeMap<u64, Arc<T>>>,
}

/// Concurrent set of connected observers.
///
/// Cloning shares the same underlying set.
pub struct Connectable<T: ?Sized> {
    inner: Arc<Connections<T>>,
}

impl<T: ?Sized + Send + Sync + 'static> Connectable<T> {
    /// An empty set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Connections {
                next_id: AtomicU64::new(0),
                observers: RwLock::new(BTreeMap::new()),
            }),
        }
    }

    /// Connects `observer`. The returned handle removes it again.
    pub fn connect(&self, observer: Arc<T>) -> ConnectHandle {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.observers.write().insert(id, observer);

        let weak: Weak<Connections<T>> = Arc::downgrade(&self.inner);
        ConnectHandle::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.observers.write().remove(&id);
            }
        })
    }

    /// Number of currently connected observers.
    #[must_use]
    pub fn count(&self) -> usize {
        self.inner.observers.read().len()
    }

    /// Observers connected right now, in connection order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<T>> {
        self.inner.observers.read().values().cloned().collect()
    }

    /// Invokes `action` on every observer connected at dispatch time.
    ///
    /// An observer disconnected while the notification is in flight is
    /// skipped if its turn has not come yet. All invocations run to
    /// completion even when some fail; the failures are returned together.
    ///
    /// # Errors
    ///
    /// Returns [`ObserverError`] if any invocation failed.
    pub async fn for_each<F, Fut>(&self, action: F) -> Result<(), ObserverError>
    where
        F: Fn(Arc<T>) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        let observers = self.entries();
        if observers.is_empty() {
            return Ok(());
        }

        let action = &action;
        let results = join_all(observers.into_iter().map(|(id, observer)| async move {
            if !self.is_connected(id) {
                return Ok(());
            }
            action(observer).await
        }))
        .await;
        let failures: Vec<anyhow::Error> = results.into_iter().filter_map(Result::err).collect();

        if failures.is_empty() {
            Ok(())
        } else {
            warn!(failed = failures.len(), "observer notification failed");
            Err(ObserverError { failures })
        }
    }

    /// Observers connected right now with their connection ids.
    pub(crate) fn entries(&self) -> Vec<(u64, Arc<T>)> {
        self.inner
            .observers
            .read()
            .iter()
            .map(|(id, observer)| (*id, Arc::clone(observer)))
            .collect()
    }

    pub(crate) fn is_connected(&self, id: u64) -> bool {
        self.inner.observers.read().contains_key(&id)
    }
}

impl<T: ?Sized + Send + Sync + 'static> Default for Connectable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> Clone for Connectable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;

    trait Listener: Send + Sync {
        fn name(&self) -> &'static str;
    }

    struct Named(&'static str);

    impl Listener for Named {
        fn name(&self) -> &'static str {
            self.0
        }
    }

    fn listener(name: &'static str) -> Arc<dyn Listener> {
        Arc::new(Named(name))
    }

    async fn record(set: &Connectable<dyn Listener>) -> Vec<&'static str> {
        let log = Arc::new(Mutex::new(Vec::new()));
        set.for_each(|l| {
            let log = Arc::clone(&log);
            async move {
                log.lock().push(l.name());
                Ok(())
            }
        })
        .await
        .unwrap();
        let entries = log.lock().clone();
        entries
    }

    #[tokio::test]
    async fn empty_set_is_a_no_op() {
        let set: Connectable<dyn Listener> = Connectable::new();
        assert!(record(&set).await.is_empty());
    }

    #[tokio::test]
    async fn invokes_each_observer_once_in_connection_order() {
        let set: Connectable<dyn Listener> = Connectable::new();
        let _a = set.connect(listener("a"));
        let _b = set.connect(listener("b"));
        let _c = set.connect(listener("c"));

        assert_eq!(record(&set).await, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn disconnected_observer_receives_nothing() {
        let set: Connectable<dyn Listener> = Connectable::new();
        let _a = set.connect(listener("a"));
        let b = set.connect(listener("b"));
        let _c = set.connect(listener("c"));

        b.disconnect();
        assert_eq!(set.count(), 2);
        assert_eq!(record(&set).await, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn dropping_handle_disconnects_but_detach_keeps() {
        let set: Connectable<dyn Listener> = Connectable::new();
        drop(set.connect(listener("dropped")));
        set.connect(listener("kept")).detach();

        assert_eq!(record(&set).await, vec!["kept"]);
    }

    #[tokio::test]
    async fn failures_are_aggregated_without_skipping_others() {
        let set: Connectable<dyn Listener> = Connectable::new();
        let _a = set.connect(listener("a"));
        let _bad1 = set.connect(listener("bad1"));
        let _b = set.connect(listener("b"));
        let _bad2 = set.connect(listener("bad2"));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let err = set
            .for_each(|l| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.lock().push(l.name());
                    if l.name().starts_with("bad") {
                        anyhow::bail!("{} exploded", l.name());
                    }
                    Ok(())
                }
            })
            .await
            .unwrap_err();

        assert_eq!(seen.lock().len(), 4);
        assert_eq!(err.failures().len(), 2);
        assert_eq!(err.failures()[0].to_string(), "bad1 exploded");
        assert!(err.to_string().starts_with("2 observer(s) failed"));
    }

    #[tokio::test]
    async fn connect_during_notification_does_not_corrupt_iteration() {
        let set: Connectable<dyn Listener> = Connectable::new();
        let _a = set.connect(listener("a"));
        let late = Arc::new(Mutex::new(Vec::new()));

        let set2 = set.clone();
        set.for_each(|_| {
            let set2 = set2.clone();
            let late = Arc::clone(&late);
            async move {
                late.lock().push(set2.connect(listener("late")));
                Ok(())
            }
        })
        .await
        .unwrap();

        assert_eq!(set.count(), 2);
        late.lock().clear();
        assert_eq!(set.count(), 1);
    }

    #[tokio::test]
    async fn observer_disconnected_mid_notification_is_skipped() {
        let set: Connectable<dyn Listener> = Connectable::new();
        let _a = set.connect(listener("a"));
        let b = Arc::new(Mutex::new(Some(set.connect(listener("b")))));
        let _c = set.connect(listener("c"));

        let invoked = Arc::new(Mutex::new(Vec::new()));
        set.for_each(|l| {
            let invoked = Arc::clone(&invoked);
            let b = Arc::clone(&b);
            async move {
                invoked.lock().push(l.name());
                if l.name() == "a" {
                    if let Some(handle) = b.lock().take() {
                        handle.disconnect();
                    }
                }
                Ok(())
            }
        })
        .await
        .unwrap();

        assert_eq!(set.count(), 2);
        assert_eq!(*invoked.lock(), vec!["a", "c"]);
    }

    #[test]
    fn handle_outliving_set_is_harmless() {
        let set: Connectable<dyn Listener> = Connectable::new();
        let handle = set.connect(listener("a"));
        drop(set);
        handle.disconnect();
    }
}
