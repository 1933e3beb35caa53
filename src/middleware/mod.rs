pub mod time_filter;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::{
    delivery::{
        entities::{Device, Message},
        error::PlingError,
        registry::{FromOptions, Registry},
    },
    gateway::Gateway,
    options::Options,
};

/// A processing stage between dispatch and a gateway's native send.
///
/// Continue delivery by calling `next.run(message, device)`, possibly with
/// altered values. Returning without calling it silently drops the delivery;
/// returning an error aborts it.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn process(
        &self,
        message: Message,
        device: Device,
        next: Next<'_>,
    ) -> Result<(), PlingError>;
}

/// The rest of one delivery's chain.
///
/// Each delivery owns the slice it walks, so concurrent deliveries through
/// the same gateway never share a cursor.
pub struct Next<'a> {
    gateway: &'a dyn Gateway,
    remaining: &'a [Arc<dyn Middleware>],
}

impl<'a> Next<'a> {
    pub(crate) fn new(gateway: &'a dyn Gateway, stack: &'a [Arc<dyn Middleware>]) -> Self {
        Self {
            gateway,
            remaining: stack,
        }
    }

    /// Number of stages left before the gateway's native send.
    pub fn remaining(&self) -> usize {
        self.remaining.len()
    }

    pub async fn run(self, message: Message, device: Device) -> Result<(), PlingError> {
        match self.remaining.split_first() {
            Some((head, rest)) => {
                let next = Next {
                    gateway: self.gateway,
                    remaining: rest,
                };
                head.process(message, device, next).await
            }
            None => {
                debug!(device_type = %device.device_type, "middleware chain exhausted, sending");
                self.gateway.deliver_raw(&message, &device).await
            }
        }
    }
}

impl Registry<dyn Middleware> {
    /// Registers a middleware type to be constructed on first delivery.
    pub fn use_middleware<M>(&mut self, options: Options)
    where
        M: Middleware + FromOptions + 'static,
    {
        self.defer(
            |options| Ok(Arc::new(M::from_options(options)?) as Arc<dyn Middleware>),
            options,
        );
    }
}
