use async_trait::async_trait;
use tracing::info;

use super::{Gateway, GatewayCore};
use crate::{
    delivery::{
        entities::{Device, Message},
        error::PlingError,
        registry::FromOptions,
    },
    options::Options,
};

/// Logs notifications instead of sending them.
#[derive(Debug, Default)]
pub struct DummyGateway {
    core: GatewayCore,
}

impl DummyGateway {
    pub const HANDLED_TYPES: &'static [&'static str] = &["dummy", "test"];

    pub fn new() -> Self {
        Self::default()
    }
}

impl FromOptions for DummyGateway {
    fn from_options(_options: Options) -> Result<Self, PlingError> {
        Ok(Self::new())
    }
}

#[async_trait]
impl Gateway for DummyGateway {
    fn handled_types(&self) -> &'static [&'static str] {
        Self::HANDLED_TYPES
    }

    fn core(&self) -> &GatewayCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut GatewayCore {
        &mut self.core
    }

    async fn deliver_raw(&self, message: &Message, device: &Device) -> Result<(), PlingError> {
        info!(
            "Notification to {} ({}): {}",
            device.identifier, device.device_type, message.body
        );
        Ok(())
    }
}
