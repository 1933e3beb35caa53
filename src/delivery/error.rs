use std::io;

use thiserror::Error;

use super::entities::{Device, Message};

/// Provider-specific refinement of a failed delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureReason {
    Generic,
    PayloadTooLarge,
    QuotaExceeded,
    DeviceQuotaExceeded,
    MissingRegistration,
    InvalidRegistration,
    MismatchSenderId,
    NotRegistered,
    MessageTooBig,
    MissingCollapseKey,
    InvalidTtl,
    Unavailable,
    InternalServerError,
}

impl FailureReason {
    /// Maps the error indicator of a provider response onto a reason.
    /// Unknown codes fall back to [`FailureReason::Generic`].
    pub fn from_code(code: &str) -> Self {
        match code {
            "QuotaExceeded" => Self::QuotaExceeded,
            "DeviceQuotaExceeded" => Self::DeviceQuotaExceeded,
            "MissingRegistration" => Self::MissingRegistration,
            "InvalidRegistration" => Self::InvalidRegistration,
            "MismatchSenderId" => Self::MismatchSenderId,
            "NotRegistered" => Self::NotRegistered,
            "MessageTooBig" => Self::MessageTooBig,
            "MissingCollapseKey" => Self::MissingCollapseKey,
            "InvalidTtl" => Self::InvalidTtl,
            "Unavailable" => Self::Unavailable,
            "InternalServerError" => Self::InternalServerError,
            _ => Self::Generic,
        }
    }
}

#[derive(Debug, Error)]
#[error("{text}")]
pub struct DeliveryFailure {
    pub reason: FailureReason,
    pub text: String,
    pub message: Message,
    pub device: Device,
}

#[derive(Debug, Error)]
pub enum PlingError {
    #[error("Invalid argument: {0}")]
    Argument(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Delivery failed: {0}")]
    DeliveryFailed(Box<DeliveryFailure>),

    #[error("No route found: {0}")]
    NoRouteFound(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Not implemented: {0}")]
    NotImplemented(String),
}

impl PlingError {
    pub fn delivery_failed(
        reason: FailureReason,
        text: impl Into<String>,
        message: &Message,
        device: &Device,
    ) -> Self {
        PlingError::DeliveryFailed(Box::new(DeliveryFailure {
            reason,
            text: text.into(),
            message: message.clone(),
            device: device.clone(),
        }))
    }

    /// Errors an `on_exception` handler is allowed to intercept.
    pub fn is_delivery_error(&self) -> bool {
        matches!(
            self,
            PlingError::AuthenticationFailed(_)
                | PlingError::DeliveryFailed(_)
                | PlingError::NoRouteFound(_)
        )
    }

    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            PlingError::DeliveryFailed(failure) => Some(failure.reason),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for PlingError {
    fn from(err: reqwest::Error) -> Self {
        PlingError::Io(io::Error::other(err))
    }
}

impl From<serde_json::Error> for PlingError {
    fn from(err: serde_json::Error) -> Self {
        PlingError::Argument(format!("Could not encode payload: {}", err))
    }
}
