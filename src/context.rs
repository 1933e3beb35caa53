use std::sync::Arc;
use tracing::{info, instrument};

use crate::{
    delivery::{
        dispatcher::Dispatcher,
        entities::{ToDevice, ToMessage},
        error::PlingError,
        registry::Registry,
    },
    gateway::{Deliver, Gateway, apns::ApnsGateway, dummy::DummyGateway, gcm::GcmGateway},
    middleware::{Middleware, time_filter::TimeFilter},
    settings::{GatewayKind, MiddlewareKind, Settings},
};

/// Everything needed to route and send notifications.
#[derive(Debug, Default)]
pub struct DeliveryContext {
    dispatcher: Dispatcher,
    middlewares: Registry<dyn Middleware>,
}

impl DeliveryContext {
    pub fn new(gateways: Registry<dyn Gateway>, middlewares: Registry<dyn Middleware>) -> Self {
        Self {
            dispatcher: Dispatcher::new(gateways),
            middlewares,
        }
    }

    /// Registers the configured gateways and middlewares. Nothing is
    /// constructed until the first delivery needs it.
    pub fn from_settings(settings: &Settings) -> Self {
        let mut gateways: Registry<dyn Gateway> = Registry::new();
        for gateway in &settings.gateways {
            let options = gateway.options.clone();
            match gateway.kind {
                GatewayKind::Apns => gateways.use_gateway::<ApnsGateway>(options),
                GatewayKind::Gcm => gateways.use_gateway::<GcmGateway>(options),
                GatewayKind::Dummy => gateways.use_gateway::<DummyGateway>(options),
            }
        }

        let mut middlewares: Registry<dyn Middleware> = Registry::new();
        for middleware in &settings.middlewares {
            let options = middleware.options.clone();
            match middleware.kind {
                MiddlewareKind::TimeFilter => middlewares.use_middleware::<TimeFilter>(options),
            }
        }

        Self::new(gateways, middlewares)
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub async fn discover(&self, device: &dyn ToDevice) -> Result<Arc<dyn Gateway>, PlingError> {
        self.dispatcher.discover(device).await
    }

    /// Routes the notification to the first gateway handling the device and
    /// runs it through the gateway's middlewares, then the global ones.
    #[instrument(skip_all)]
    pub async fn deliver(
        &self,
        message: &dyn ToMessage,
        device: &dyn ToDevice,
    ) -> Result<(), PlingError> {
        let message = message.to_message()?;
        let device = device.to_device()?;
        info!(device_type = %device.device_type, "delivering notification");

        let gateway = self.dispatcher.discover(&device).await?;
        let global = self.middlewares.resolve().await?;

        gateway.deliver_with(&message, &device, &global).await
    }

    /// Shuts down the gateways that have been constructed so far.
    pub async fn shutdown(&self) {
        for gateway in self.dispatcher.gateways().materialized() {
            gateway.shutdown().await;
        }
    }
}
