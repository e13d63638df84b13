use bytes::Bytes;
use serde_json::Value;

use super::codec::{EncodingError, encode_frame};
use crate::common::device_token::DeviceToken;

/// A single push addressed to one device.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub device_token: DeviceToken,
    /// JSON payload, conventionally `{"aps": {"alert": .., "badge": .., "sound": ..}}`.
    pub message: Value,
}

impl Notification {
    pub fn new(device_token: DeviceToken, message: Value) -> Self {
        Self {
            device_token,
            message,
        }
    }

    /// Builds a notification from a hex device token.
    pub fn from_hex(device_token: &str, message: Value) -> Result<Self, EncodingError> {
        Ok(Self::new(device_token.parse()?, message))
    }

    /// The binary frame written to the gateway for this notification.
    pub fn packaged_notification(&self) -> Result<Bytes, EncodingError> {
        encode_frame(&self.device_token, &self.message)
    }
}
