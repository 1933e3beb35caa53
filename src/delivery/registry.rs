use std::{fmt, sync::Arc};

use tokio::sync::OnceCell;
use tracing::debug;

use super::error::PlingError;
use crate::options::Options;

/// Builds an entry from its options; invoked at most once per entry.
pub type Factory<T> = Arc<dyn Fn(Options) -> Result<Arc<T>, PlingError> + Send + Sync>;

/// Types that can be registered by type and constructed later.
pub trait FromOptions: Sized {
    fn from_options(options: Options) -> Result<Self, PlingError>;
}

enum Slot<T: ?Sized> {
    Ready(Arc<T>),
    Deferred {
        cell: OnceCell<Arc<T>>,
        factory: Factory<T>,
        options: Options,
    },
}

/// Ordered collection of ready instances and deferred constructors.
///
/// Deferred entries are constructed on the first [`Registry::resolve`] and
/// reused afterwards. Concurrent first resolutions construct every entry
/// exactly once; waiters observe the finished instance.
pub struct Registry<T: ?Sized> {
    slots: Vec<Slot<T>>,
}

impl<T: ?Sized + Send + Sync> Registry<T> {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Appends an already constructed instance.
    pub fn push(&mut self, instance: Arc<T>) {
        self.slots.push(Slot::Ready(instance));
    }

    /// Appends a constructor that runs on first use.
    pub fn defer<F>(&mut self, factory: F, options: Options)
    where
        F: Fn(Options) -> Result<Arc<T>, PlingError> + Send + Sync + 'static,
    {
        self.slots.push(Slot::Deferred {
            cell: OnceCell::new(),
            factory: Arc::new(factory),
            options,
        });
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Materializes every entry in registration order.
    ///
    /// A failing constructor aborts the walk with its error; entries before
    /// it stay materialized and the failed one is attempted again on the
    /// next call.
    pub async fn resolve(&self) -> Result<Vec<Arc<T>>, PlingError> {
        let mut resolved = Vec::with_capacity(self.slots.len());

        for (index, slot) in self.slots.iter().enumerate() {
            let instance = match slot {
                Slot::Ready(instance) => instance.clone(),
                Slot::Deferred {
                    cell,
                    factory,
                    options,
                } => cell
                    .get_or_try_init(|| async {
                        debug!(index, "constructing deferred registry entry");
                        factory(options.clone())
                    })
                    .await?
                    .clone(),
            };
            resolved.push(instance);
        }

        Ok(resolved)
    }

    /// Instances constructed so far, without constructing anything.
    pub fn materialized(&self) -> Vec<Arc<T>> {
        self.slots
            .iter()
            .filter_map(|slot| match slot {
                Slot::Ready(instance) => Some(instance.clone()),
                Slot::Deferred { cell, .. } => cell.get().cloned(),
            })
            .collect()
    }
}

impl<T: ?Sized + Send + Sync> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let deferred = self
            .slots
            .iter()
            .filter(|slot| matches!(slot, Slot::Deferred { cell, .. } if !cell.initialized()))
            .count();
        f.debug_struct("Registry")
            .field("entries", &self.slots.len())
            .field("pending", &deferred)
            .finish()
    }
}
