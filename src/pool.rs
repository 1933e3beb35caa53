use async_trait::async_trait;
use parking_lot::Mutex;
use std::{
    fmt, io,
    ops::{Deref, DerefMut},
    time::Duration,
};
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::debug;

use crate::delivery::error::PlingError;

/// Creates the resources a [`Pool`] hands out.
#[async_trait]
pub trait Manager: Send + Sync {
    type Resource: Send;

    async fn create(&self) -> Result<Self::Resource, PlingError>;

    /// Whether a returned resource may be handed out again.
    fn is_reusable(&self, resource: &Self::Resource) -> bool {
        let _ = resource;
        true
    }
}

/// A bounded set of reusable transport handles.
///
/// At most `size` resources are checked out at once; a checkout waits up to
/// `timeout` for one to come back.
pub struct Pool<M: Manager> {
    manager: M,
    idle: Mutex<Vec<M::Resource>>,
    permits: Semaphore,
    size: usize,
    timeout: Duration,
}

impl<M: Manager> Pool<M> {
    pub fn new(manager: M, size: usize, timeout: Duration) -> Result<Self, PlingError> {
        if size == 0 {
            return Err(PlingError::Argument(
                "Option :pool_size must be at least 1".to_string(),
            ));
        }
        if size > Semaphore::MAX_PERMITS {
            return Err(PlingError::Argument(format!(
                "Option :pool_size must be at most {}",
                Semaphore::MAX_PERMITS
            )));
        }

        Ok(Self {
            manager,
            idle: Mutex::new(Vec::new()),
            permits: Semaphore::new(size),
            size,
            timeout,
        })
    }

    pub fn manager(&self) -> &M {
        &self.manager
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    pub async fn checkout(&self) -> Result<Pooled<'_, M>, PlingError> {
        let permit = tokio::time::timeout(self.timeout, self.permits.acquire())
            .await
            .map_err(|_| {
                PlingError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!(
                        "Timed out after {:?} waiting for a pooled connection",
                        self.timeout
                    ),
                ))
            })?
            .map_err(|_| PlingError::Io(io::Error::other("Connection pool is closed")))?;

        let idle = self.idle.lock().pop();
        let resource = match idle {
            Some(resource) => resource,
            None => {
                debug!(size = self.size, "creating pooled resource");
                self.manager.create().await?
            }
        };

        Ok(Pooled {
            pool: self,
            resource: Some(resource),
            _permit: permit,
        })
    }

    /// Removes and returns every idle resource.
    pub fn drain(&self) -> Vec<M::Resource> {
        std::mem::take(&mut *self.idle.lock())
    }

    /// Rejects further checkouts and returns the idle resources.
    pub fn close(&self) -> Vec<M::Resource> {
        self.permits.close();
        self.drain()
    }
}

impl<M: Manager> fmt::Debug for Pool<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("size", &self.size)
            .field("available", &self.permits.available_permits())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// A checked out resource, returned to its pool on drop.
pub struct Pooled<'a, M: Manager> {
    pool: &'a Pool<M>,
    // Some until `discard` or `drop`, both of which consume the guard.
    resource: Option<M::Resource>,
    _permit: SemaphorePermit<'a>,
}

impl<M: Manager> Pooled<'_, M> {
    /// Drops the resource instead of returning it to the pool.
    pub fn discard(mut self) {
        self.resource = None;
    }
}

impl<M: Manager> Deref for Pooled<'_, M> {
    type Target = M::Resource;

    fn deref(&self) -> &Self::Target {
        self.resource
            .as_ref()
            .expect("pooled resource is present until dropped")
    }
}

impl<M: Manager> DerefMut for Pooled<'_, M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.resource
            .as_mut()
            .expect("pooled resource is present until dropped")
    }
}

impl<M: Manager> Drop for Pooled<'_, M> {
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take() {
            if self.pool.manager.is_reusable(&resource) {
                self.pool.idle.lock().push(resource);
            }
        }
    }
}
