use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::PlingError;

/// Content of a single push notification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub badge: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sound: Option<String>,
    #[serde(default)]
    pub content_available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Extra provider fields, only forwarded when a gateway enables `payload`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Map<String, Value>>,
}

impl Message {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_badge(mut self, badge: u32) -> Self {
        self.badge = Some(badge);
        self
    }

    pub fn with_sound(mut self, sound: impl Into<String>) -> Self {
        self.sound = Some(sound.into());
        self
    }

    pub fn with_content_available(mut self, content_available: bool) -> Self {
        self.content_available = content_available;
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_payload(mut self, payload: Map<String, Value>) -> Self {
        self.payload = Some(payload);
        self
    }

    /// A message is valid if it has a body.
    pub fn is_valid(&self) -> bool {
        !self.body.is_empty()
    }
}

/// Destination of a push notification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Device {
    /// Provider specific token or address
    pub identifier: String,
    #[serde(rename = "type")]
    pub device_type: String,
}

impl Device {
    pub fn new(identifier: impl Into<String>, device_type: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            device_type: device_type.into(),
        }
    }

    /// A device is valid if it has a type and an identifier.
    pub fn is_valid(&self) -> bool {
        !self.identifier.is_empty() && !self.device_type.is_empty()
    }
}

/// Anything that can be turned into a deliverable [`Message`].
pub trait ToMessage: Send + Sync {
    fn to_message(&self) -> Result<Message, PlingError>;
}

/// Anything that can be turned into a routable [`Device`].
pub trait ToDevice: Send + Sync {
    fn to_device(&self) -> Result<Device, PlingError>;
}

impl ToMessage for Message {
    fn to_message(&self) -> Result<Message, PlingError> {
        if !self.is_valid() {
            return Err(PlingError::Argument("Message has no body".to_string()));
        }
        Ok(self.clone())
    }
}

impl ToDevice for Device {
    fn to_device(&self) -> Result<Device, PlingError> {
        if !self.is_valid() {
            return Err(PlingError::Argument(
                "Device needs both an identifier and a type".to_string(),
            ));
        }
        Ok(self.clone())
    }
}

impl<T: ToMessage> ToMessage for Option<T> {
    fn to_message(&self) -> Result<Message, PlingError> {
        self.as_ref()
            .ok_or_else(|| PlingError::Argument("No message given".to_string()))?
            .to_message()
    }
}

impl<T: ToDevice> ToDevice for Option<T> {
    fn to_device(&self) -> Result<Device, PlingError> {
        self.as_ref()
            .ok_or_else(|| PlingError::Argument("No device given".to_string()))?
            .to_device()
    }
}

impl<T: ToMessage + ?Sized> ToMessage for &T {
    fn to_message(&self) -> Result<Message, PlingError> {
        (**self).to_message()
    }
}

impl<T: ToDevice + ?Sized> ToDevice for &T {
    fn to_device(&self) -> Result<Device, PlingError> {
        (**self).to_device()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_validity() {
        assert!(Message::new("Hello from Pling").is_valid());
        assert!(!Message::new("").is_valid());
        assert!(matches!(
            Message::new("").to_message(),
            Err(PlingError::Argument(_))
        ));
    }

    #[test]
    fn test_device_validity() {
        assert!(Device::new("DEVICEIDENTIFIER", "android").is_valid());
        assert!(!Device::new("", "android").is_valid());
        assert!(!Device::new("DEVICEIDENTIFIER", "").is_valid());
    }

    #[test]
    fn test_missing_inputs_are_argument_errors() {
        let message: Option<Message> = None;
        let device: Option<Device> = None;

        assert!(matches!(message.to_message(), Err(PlingError::Argument(_))));
        assert!(matches!(device.to_device(), Err(PlingError::Argument(_))));
        assert_eq!(
            Some(Device::new("a", "ios")).to_device().unwrap(),
            Device::new("a", "ios")
        );
    }

    #[test]
    fn test_deserialize_device_and_message() {
        let device: Device =
            serde_json::from_value(json!({ "identifier": "abc", "type": "iphone" })).unwrap();
        assert_eq!(device.device_type, "iphone");

        let message: Message =
            serde_json::from_value(json!({ "body": "Hi", "badge": 3, "content_available": true }))
                .unwrap();
        assert_eq!(message.badge, Some(3));
        assert!(message.content_available);
        assert_eq!(message.payload, None);
    }
}
