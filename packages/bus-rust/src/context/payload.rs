use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;

/// Type-indexed side table for data shared between filters of one operation.
///
/// Independent of the envelope: nothing stored here is serialized.
#[derive(Default)]
pub struct PayloadCache {
    entries: DashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl PayloadCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn has<T: Any + Send + Sync>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<T>())
    }

    #[must_use]
    pub fn try_get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let entry = self.entries.get(&TypeId::of::<T>())?;
        Arc::clone(entry.value()).downcast::<T>().ok()
    }

    /// Returns the stored `T`, inserting `factory()` first if absent.
    ///
    /// `factory` runs while the entry's shard is locked and must not touch
    /// this cache.
    pub fn get_or_add<T, F>(&self, factory: F) -> Arc<T>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T,
    {
        let entry = Arc::clone(
            self.entries
                .entry(TypeId::of::<T>())
                .or_insert_with(|| Arc::new(factory()) as Arc<dyn Any + Send + Sync>)
                .value(),
        );
        match entry.downcast::<T>() {
            Ok(value) => value,
            Err(_) => unreachable!("payload entries are keyed by their TypeId"),
        }
    }

    /// Stores `value`, replacing any previous `T`.
    pub fn insert<T: Any + Send + Sync>(&self, value: T) {
        self.entries.insert(TypeId::of::<T>(), Arc::new(value));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for PayloadCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadCache")
            .field("entries", &self.entries.len())
            .finish()
    }
}
