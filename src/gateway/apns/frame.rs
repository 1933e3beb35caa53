//! Binary notification frames for the APNs socket interface.
//!
//! One frame is
//!
//! ```text
//! command (1) | token length (2, BE) | token | payload length (2, BE) | payload
//! ```
//!
//! with command `0`, the device token decoded from hex and the payload a
//! compact JSON document.

use serde_json::{Map, Value, json};

use crate::delivery::{
    entities::{Device, Message},
    error::{FailureReason, PlingError},
};

pub const COMMAND: u8 = 0;
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 2048;

/// Encodes the `aps` dictionary, merging the message's extra payload at the
/// top level when `include_payload` is set.
pub fn encode_payload(message: &Message, include_payload: bool) -> Result<Vec<u8>, PlingError> {
    let mut aps = Map::new();
    aps.insert("alert".to_string(), json!(message.body));
    if let Some(badge) = message.badge {
        aps.insert("badge".to_string(), json!(badge));
    }
    if let Some(sound) = &message.sound {
        aps.insert("sound".to_string(), json!(sound));
    }
    if message.content_available {
        aps.insert("content-available".to_string(), json!(1));
    }
    if let Some(category) = &message.category {
        aps.insert("category".to_string(), json!(category));
    }

    let mut document = Map::new();
    document.insert("aps".to_string(), Value::Object(aps));

    if include_payload {
        if let Some(payload) = &message.payload {
            for (key, value) in payload {
                document.insert(key.clone(), value.clone());
            }
        }
    }

    Ok(serde_json::to_vec(&Value::Object(document))?)
}

/// Decodes a hex device identifier into token bytes.
pub fn encode_token(identifier: &str) -> Result<Vec<u8>, PlingError> {
    let token = hex::decode(identifier).map_err(|err| {
        PlingError::Argument(format!(
            "Device identifier {:?} is not a hex token: {}",
            identifier, err
        ))
    })?;

    if token.len() > usize::from(u16::MAX) {
        return Err(PlingError::Argument(format!(
            "Device token of {} bytes does not fit into a frame",
            token.len()
        )));
    }

    Ok(token)
}

/// Lowercase hex form of token bytes.
pub fn decode_token(token: &[u8]) -> String {
    hex::encode(token)
}

/// Builds the frame for one notification.
///
/// Fails before anything is written when the payload exceeds
/// `max_payload_size`.
pub fn encode(
    message: &Message,
    device: &Device,
    include_payload: bool,
    max_payload_size: usize,
) -> Result<Vec<u8>, PlingError> {
    let token = encode_token(&device.identifier)?;
    let payload = encode_payload(message, include_payload)?;

    if payload.len() > max_payload_size {
        return Err(PlingError::delivery_failed(
            FailureReason::PayloadTooLarge,
            format!(
                "Payload size of {} exceeds allowed size of {} bytes.",
                payload.len(),
                max_payload_size
            ),
            message,
            device,
        ));
    }

    // both lengths are bounded by u16::MAX: the token above, the payload by
    // the validated max_payload_size
    let token_len = u16::try_from(token.len())
        .map_err(|_| PlingError::Argument("Device token too long".to_string()))?;
    let payload_len = u16::try_from(payload.len()).map_err(|_| {
        PlingError::Argument(format!("Payload of {} bytes is too long", payload.len()))
    })?;

    let mut frame = Vec::with_capacity(5 + token.len() + payload.len());
    frame.push(COMMAND);
    frame.extend_from_slice(&token_len.to_be_bytes());
    frame.extend_from_slice(&token);
    frame.extend_from_slice(&payload_len.to_be_bytes());
    frame.extend_from_slice(&payload);

    Ok(frame)
}
