use async_trait::async_trait;
use reqwest::{Client, StatusCode, header::AUTHORIZATION};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use sha3::{Digest, Sha3_256};
use std::time::Duration;
use tracing::{debug, instrument};

use super::{Gateway, GatewayCore};
use crate::{
    delivery::{
        entities::{Device, Message},
        error::{FailureReason, PlingError},
        registry::FromOptions,
    },
    options::Options,
    pool::{Manager, Pool},
};

pub const DEFAULT_PUSH_URL: &str = "https://android.googleapis.com/gcm/send";

/// Builds HTTP clients for the gateway's pool.
pub struct HttpClientManager {
    timeout: Duration,
}

#[async_trait]
impl Manager for HttpClientManager {
    type Resource = Client;

    async fn create(&self) -> Result<Client, PlingError> {
        Ok(Client::builder().timeout(self.timeout).build()?)
    }
}

#[derive(Debug, Default, Deserialize)]
struct GcmResponse {
    #[serde(default)]
    failure: u64,
    #[serde(default)]
    results: Vec<GcmResult>,
}

#[derive(Debug, Default, Deserialize)]
struct GcmResult {
    error: Option<String>,
}

/// Google Cloud Messaging gateway.
///
/// Options: `key` (required API key), `push_url`, `payload`, `pool_size`
/// and `timeout`.
pub struct GcmGateway {
    core: GatewayCore,
    pool: Pool<HttpClientManager>,
    key: String,
    push_url: String,
    include_payload: bool,
}

impl GcmGateway {
    pub const HANDLED_TYPES: &'static [&'static str] = &["android", "gcm"];

    pub fn new(options: Options) -> Result<Self, PlingError> {
        options.require(&["key"])?;

        let key = options.str_or("key", "")?;
        let push_url = options.str_or("push_url", DEFAULT_PUSH_URL)?;
        let include_payload = options.bool_or("payload", false)?;
        let pool_size = usize::try_from(options.u64_or("pool_size", 1)?).unwrap_or(usize::MAX);
        let timeout = options.secs_or("timeout", Duration::from_secs(5))?;

        Ok(Self {
            core: GatewayCore::new(),
            pool: Pool::new(HttpClientManager { timeout }, pool_size, timeout)?,
            key,
            push_url,
            include_payload,
        })
    }

    fn request_body(&self, message: &Message, device: &Device) -> Value {
        let mut data = Map::new();
        data.insert("body".to_string(), json!(message.body));
        if let Some(badge) = message.badge {
            data.insert("badge".to_string(), json!(badge.to_string()));
        }
        if let Some(sound) = &message.sound {
            data.insert("sound".to_string(), json!(sound));
        }
        if let Some(subject) = &message.subject {
            data.insert("subject".to_string(), json!(subject));
        }
        if self.include_payload {
            if let Some(payload) = &message.payload {
                for (key, value) in payload {
                    data.insert(key.clone(), value.clone());
                }
            }
        }

        json!({
            "registration_ids": [device.identifier],
            "data": data,
            "collapse_key": collapse_key(&message.body),
        })
    }
}

impl FromOptions for GcmGateway {
    fn from_options(options: Options) -> Result<Self, PlingError> {
        Self::new(options)
    }
}

#[async_trait]
impl Gateway for GcmGateway {
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
        let body = self.request_body(message, device);

        let client = self.pool.checkout().await?;
        let response = client
            .post(&self.push_url)
            .header(AUTHORIZATION, format!("key={}", self.key))
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;
        debug!(status = status.as_u16(), "GCM response: {}", text);

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(PlingError::AuthenticationFailed(format!(
                "GCM rejected the API key: [{}] {}",
                status.as_u16(),
                text
            )));
        }

        if !status.is_success() {
            return Err(PlingError::delivery_failed(
                FailureReason::Generic,
                format!("GCM Delivery failed: [{}] {}", status.as_u16(), text),
                message,
                device,
            ));
        }

        // a success status without a JSON body counts as delivered
        let parsed: GcmResponse = serde_json::from_str(&text).unwrap_or_default();
        if parsed.failure > 0 {
            let reason = parsed
                .results
                .first()
                .and_then(|result| result.error.as_deref())
                .map(FailureReason::from_code)
                .unwrap_or(FailureReason::Generic);

            return Err(PlingError::delivery_failed(
                reason,
                format!("GCM Delivery failed: [{}] {}", status.as_u16(), text),
                message,
                device,
            ));
        }

        Ok(())
    }

    async fn shutdown(&self) {
        self.pool.close();
    }
}

/// Groups identical bodies so GCM only shows the latest one.
fn collapse_key(body: &str) -> String {
    let digest = Sha3_256::digest(body.as_bytes());
    format!("collapse-{}", hex::encode(&digest[..8]))
}
