//! APNs feedback service: the tokens of devices that uninstalled the app.
//!
//! The service streams fixed-layout records and closes the connection:
//!
//! ```text
//! time (4, BE) | token length (2, BE) | token
//! ```

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::{
    connection::{Connector, FramingConnection, TlsConnector},
    frame::decode_token,
    port_option,
};
use crate::{delivery::error::PlingError, options::Options};

pub const DEFAULT_FEEDBACK_HOST: &str = "feedback.push.apple.com";
pub const DEFAULT_FEEDBACK_PORT: u16 = 2196;

const HEADER_LEN: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackRecord {
    /// When APNs determined the app was no longer installed.
    pub timestamp: DateTime<Utc>,
    /// Hex device token.
    pub token: String,
}

pub struct FeedbackClient {
    connector: Arc<dyn Connector>,
    max_attempts: usize,
}

impl FeedbackClient {
    /// Same options as the APNs gateway; only `certificate`, `host`, `port`
    /// and `max_attempts` are used.
    pub fn new(options: Options) -> Result<Self, PlingError> {
        options.require(&["certificate"])?;

        let certificate = options.str_or("certificate", "")?;
        let host = options.str_or("host", DEFAULT_FEEDBACK_HOST)?;
        let port = port_option(&options, DEFAULT_FEEDBACK_PORT)?;
        let connector = TlsConnector::from_pem_file(&certificate, &host, port)?;

        Self::with_connector(Arc::new(connector), &options)
    }

    pub fn with_connector(
        connector: Arc<dyn Connector>,
        options: &Options,
    ) -> Result<Self, PlingError> {
        let max_attempts = options.u64_or(
            "max_attempts",
            FramingConnection::DEFAULT_MAX_ATTEMPTS as u64,
        )? as usize;

        Ok(Self {
            connector,
            max_attempts,
        })
    }

    /// Reads every pending record until the service closes the stream.
    /// Only the connect is retried; the stream itself is read once.
    #[instrument(skip_all)]
    pub async fn fetch(&self) -> Result<Vec<FeedbackRecord>, PlingError> {
        let connection = FramingConnection::new(self.connector.clone(), self.max_attempts);
        connection.open().await?;

        let data = connection.read_to_end().await;
        connection.close().await;

        let records = parse(&data?);
        info!(count = records.len(), "APNs feedback received");
        Ok(records)
    }
}

/// Splits raw feedback data into records. A truncated trailing record is
/// dropped.
pub fn parse(mut data: &[u8]) -> Vec<FeedbackRecord> {
    let mut records = Vec::new();

    while data.len() >= HEADER_LEN {
        let time = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        let token_len = u16::from_be_bytes([data[4], data[5]]) as usize;
        let Some(token) = data.get(HEADER_LEN..HEADER_LEN + token_len) else {
            break;
        };

        records.push(FeedbackRecord {
            timestamp: DateTime::from_timestamp(i64::from(time), 0).unwrap_or_default(),
            token: decode_token(token),
        });
        data = &data[HEADER_LEN + token_len..];
    }

    if !data.is_empty() {
        warn!(bytes = data.len(), "ignoring truncated feedback record");
    }

    records
}
