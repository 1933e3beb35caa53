use std::sync::Arc;
use tracing::{debug, instrument};

use super::{entities::ToDevice, error::PlingError, registry::Registry};
use crate::gateway::Gateway;

/// Finds the gateway responsible for a device.
#[derive(Debug, Default)]
pub struct Dispatcher {
    gateways: Registry<dyn Gateway>,
}

impl Dispatcher {
    pub fn new(gateways: Registry<dyn Gateway>) -> Self {
        Self { gateways }
    }

    pub fn gateways(&self) -> &Registry<dyn Gateway> {
        &self.gateways
    }

    /// Returns the first registered gateway that handles the device's type.
    #[instrument(skip_all)]
    pub async fn discover(&self, device: &dyn ToDevice) -> Result<Arc<dyn Gateway>, PlingError> {
        let device = device.to_device()?;
        let gateways = self.gateways.resolve().await?;

        let gateway = gateways
            .into_iter()
            .find(|gateway| gateway.handles(&device))
            .ok_or_else(|| {
                PlingError::NoRouteFound(format!(
                    "Could not find a gateway for Device with type :{}",
                    device.device_type
                ))
            })?;

        debug!(device_type = %device.device_type, "gateway discovered");
        Ok(gateway)
    }
}
