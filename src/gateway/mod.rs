pub mod apns;
pub mod dummy;
pub mod gcm;

use async_trait::async_trait;
use std::{fmt, sync::Arc};
use tracing::warn;

use crate::{
    delivery::{
        entities::{Device, Message, ToDevice, ToMessage},
        error::PlingError,
        registry::{FromOptions, Registry},
    },
    middleware::{Middleware, Next},
    options::Options,
};

pub type ExceptionHandler = Arc<dyn Fn(PlingError) + Send + Sync>;

/// State every gateway carries: its middleware stack and error handler.
#[derive(Default)]
pub struct GatewayCore {
    middlewares: Registry<dyn Middleware>,
    on_exception: Option<ExceptionHandler>,
}

impl GatewayCore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn middlewares(&self) -> &Registry<dyn Middleware> {
        &self.middlewares
    }

    pub fn middlewares_mut(&mut self) -> &mut Registry<dyn Middleware> {
        &mut self.middlewares
    }

    pub fn on_exception(&self) -> Option<&ExceptionHandler> {
        self.on_exception.as_ref()
    }

    pub fn set_on_exception(&mut self, handler: ExceptionHandler) {
        self.on_exception = Some(handler);
    }
}

impl fmt::Debug for GatewayCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayCore")
            .field("middlewares", &self.middlewares)
            .field("on_exception", &self.on_exception.is_some())
            .finish()
    }
}

/// A delivery channel to one push provider.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Device types this gateway delivers to.
    fn handled_types(&self) -> &'static [&'static str];

    fn core(&self) -> &GatewayCore;

    fn core_mut(&mut self) -> &mut GatewayCore;

    fn handles(&self, device: &Device) -> bool {
        self.handled_types().contains(&device.device_type.as_str())
    }

    /// Sends without running any middleware.
    async fn deliver_raw(&self, message: &Message, device: &Device) -> Result<(), PlingError> {
        let _ = (message, device);
        Err(PlingError::NotImplemented(format!(
            "Please implement deliver_raw for {}",
            std::any::type_name::<Self>()
        )))
    }

    /// Releases provider connections. Called once by the owner on shutdown.
    async fn shutdown(&self) {}

    fn with_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self
    where
        Self: Sized,
    {
        self.core_mut().middlewares_mut().push(middleware);
        self
    }

    fn with_deferred_middleware<M>(mut self, options: Options) -> Self
    where
        Self: Sized,
        M: Middleware + FromOptions + 'static,
    {
        self.core_mut().middlewares_mut().use_middleware::<M>(options);
        self
    }

    /// Routes delivery errors to `handler` instead of returning them.
    fn on_exception<F>(mut self, handler: F) -> Self
    where
        Self: Sized,
        F: Fn(PlingError) + Send + Sync + 'static,
    {
        self.core_mut().set_on_exception(Arc::new(handler));
        self
    }
}

/// Runs a message through a gateway's middleware chain and native send.
#[async_trait]
pub trait Deliver {
    async fn deliver(
        &self,
        message: &dyn ToMessage,
        device: &dyn ToDevice,
    ) -> Result<(), PlingError> {
        self.deliver_with(message, device, &[]).await
    }

    /// Like [`Deliver::deliver`], appending `extra` to the configured stack
    /// for this call only.
    async fn deliver_with(
        &self,
        message: &dyn ToMessage,
        device: &dyn ToDevice,
        extra: &[Arc<dyn Middleware>],
    ) -> Result<(), PlingError>;
}

#[async_trait]
impl<G: Gateway> Deliver for G {
    async fn deliver_with(
        &self,
        message: &dyn ToMessage,
        device: &dyn ToDevice,
        extra: &[Arc<dyn Middleware>],
    ) -> Result<(), PlingError> {
        deliver_through(self, message, device, extra).await
    }
}

#[async_trait]
impl Deliver for dyn Gateway {
    async fn deliver_with(
        &self,
        message: &dyn ToMessage,
        device: &dyn ToDevice,
        extra: &[Arc<dyn Middleware>],
    ) -> Result<(), PlingError> {
        deliver_through(self, message, device, extra).await
    }
}

async fn deliver_through(
    gateway: &dyn Gateway,
    message: &dyn ToMessage,
    device: &dyn ToDevice,
    extra: &[Arc<dyn Middleware>],
) -> Result<(), PlingError> {
    let message = message.to_message()?;
    let device = device.to_device()?;

    let result = async {
        let mut stack = gateway.core().middlewares().resolve().await?;
        stack.extend(extra.iter().cloned());
        Next::new(gateway, &stack).run(message, device).await
    }
    .await;

    match result {
        Err(error) if error.is_delivery_error() => match gateway.core().on_exception() {
            Some(handler) => {
                warn!(%error, "delivery failed, handing error to on_exception");
                handler(error);
                Ok(())
            }
            None => Err(error),
        },
        other => other,
    }
}

impl Registry<dyn Gateway> {
    /// Registers a gateway type to be constructed on first dispatch.
    pub fn use_gateway<G>(&mut self, options: Options)
    where
        G: Gateway + FromOptions + 'static,
    {
        self.defer(
            |options| Ok(Arc::new(G::from_options(options)?) as Arc<dyn Gateway>),
            options,
        );
    }
}
