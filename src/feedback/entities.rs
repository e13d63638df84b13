use chrono::{DateTime, Utc};

use crate::common::device_token::DeviceToken;

/// A device the feedback service reported as no longer accepting pushes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackEntry {
    /// When the service determined the app was no longer on the device.
    pub timestamp: DateTime<Utc>,
    pub token: DeviceToken,
}
