pub mod connection;
pub mod feedback;
pub mod frame;

use async_trait::async_trait;
use std::{sync::Arc, time::Duration};
use tracing::{debug, instrument};

use self::{
    connection::{Connector, FramingConnection, TlsConnector},
    frame::DEFAULT_MAX_PAYLOAD_SIZE,
};
use super::{Gateway, GatewayCore};
use crate::{
    delivery::{
        entities::{Device, Message},
        error::PlingError,
        registry::FromOptions,
    },
    options::Options,
    pool::{Manager, Pool},
};

pub const DEFAULT_HOST: &str = "gateway.push.apple.com";
pub const DEFAULT_PORT: u16 = 2195;

/// Opens framing connections for the gateway's pool.
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    max_attempts: usize,
}

#[async_trait]
impl Manager for ConnectionManager {
    type Resource = FramingConnection;

    async fn create(&self) -> Result<FramingConnection, PlingError> {
        let connection = FramingConnection::new(self.connector.clone(), self.max_attempts);
        connection.open().await?;
        Ok(connection)
    }
}

/// APNs (Apple Push Notification Service) gateway speaking the binary
/// socket interface.
///
/// Options: `certificate` (required, PEM with certificate and key), `host`,
/// `port`, `payload`, `max_payload_size`, `pool_size`, `timeout` and
/// `max_attempts`.
pub struct ApnsGateway {
    core: GatewayCore,
    pool: Pool<ConnectionManager>,
    include_payload: bool,
    max_payload_size: usize,
}

impl ApnsGateway {
    pub const HANDLED_TYPES: &'static [&'static str] =
        &["apple", "apn", "ios", "ipad", "iphone", "ipod"];

    /// Loads the client certificate right away; connections are opened on
    /// the first delivery.
    pub fn new(options: Options) -> Result<Self, PlingError> {
        options.require(&["certificate"])?;

        let certificate = options.str_or("certificate", "")?;
        let host = options.str_or("host", DEFAULT_HOST)?;
        let port = port_option(&options, DEFAULT_PORT)?;
        let connector = TlsConnector::from_pem_file(&certificate, &host, port)?;

        Self::with_connector(Arc::new(connector), &options)
    }

    pub fn with_connector(
        connector: Arc<dyn Connector>,
        options: &Options,
    ) -> Result<Self, PlingError> {
        let include_payload = options.bool_or("payload", false)?;
        let max_payload_size =
            options.u64_or("max_payload_size", DEFAULT_MAX_PAYLOAD_SIZE as u64)?;
        if max_payload_size == 0 || max_payload_size > u64::from(u16::MAX) {
            return Err(PlingError::Argument(format!(
                "Option :max_payload_size must be between 1 and {}",
                u16::MAX
            )));
        }

        let pool_size = usize::try_from(options.u64_or("pool_size", 1)?).unwrap_or(usize::MAX);
        let timeout = options.secs_or("timeout", Duration::from_secs(5))?;
        let max_attempts = options.u64_or(
            "max_attempts",
            FramingConnection::DEFAULT_MAX_ATTEMPTS as u64,
        )? as usize;

        let manager = ConnectionManager {
            connector,
            max_attempts,
        };

        Ok(Self {
            core: GatewayCore::new(),
            pool: Pool::new(manager, pool_size, timeout)?,
            include_payload,
            max_payload_size: max_payload_size as usize,
        })
    }

    pub fn pool(&self) -> &Pool<ConnectionManager> {
        &self.pool
    }
}

impl FromOptions for ApnsGateway {
    fn from_options(options: Options) -> Result<Self, PlingError> {
        Self::new(options)
    }
}

#[async_trait]
impl Gateway for ApnsGateway {
    fn handled_types(&self) -> &'static [&'static str] {
        Self::HANDLED_TYPES
    }

    fn core(&self) -> &GatewayCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut GatewayCore {
        &mut self.core
    }

    #[instrument(skip_all)]
    async fn deliver_raw(&self, message: &Message, device: &Device) -> Result<(), PlingError> {
        let frame = frame::encode(
            message,
            device,
            self.include_payload,
            self.max_payload_size,
        )?;

        let connection = self.pool.checkout().await?;
        connection.write(&frame).await?;

        debug!(bytes = frame.len(), "APNs frame written");
        Ok(())
    }

    async fn shutdown(&self) {
        for connection in self.pool.close() {
            connection.close().await;
        }
    }
}

pub(crate) fn port_option(options: &Options, default: u16) -> Result<u16, PlingError> {
    let port = options.u64_or("port", u64::from(default))?;
    u16::try_from(port)
        .map_err(|_| PlingError::Argument(format!("Option :port {} is out of range", port)))
}
