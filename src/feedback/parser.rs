//! Fixed-width feedback records:
//!
//! ```text
//! [timestamp:4 BE][token_len:2 BE][token:32]
//! ```

use chrono::DateTime;
use tracing::trace;

use super::entities::FeedbackEntry;
use crate::{
    common::device_token::{DEVICE_TOKEN_LEN, DeviceToken},
    error::GatewayError,
};

pub const FEEDBACK_RECORD_LEN: usize = 4 + 2 + DEVICE_TOKEN_LEN;

/// Decodes one record. The token length field is read but the token is
/// always the trailing 32 bytes.
pub fn parse_record(record: &[u8; FEEDBACK_RECORD_LEN]) -> Result<FeedbackEntry, GatewayError> {
    let seconds = u32::from_be_bytes([record[0], record[1], record[2], record[3]]);
    let token_len = u16::from_be_bytes([record[4], record[5]]);
    if token_len as usize != DEVICE_TOKEN_LEN {
        trace!(token_len, "feedback record declares unexpected token length");
    }

    let timestamp = DateTime::from_timestamp(i64::from(seconds), 0)
        .ok_or_else(|| GatewayError::Decoding(format!("timestamp {seconds} out of range")))?;
    let token = DeviceToken::try_from(&record[6..])
        .map_err(|err| GatewayError::Decoding(err.to_string()))?;

    Ok(FeedbackEntry { timestamp, token })
}
