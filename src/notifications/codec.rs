//! Binary frame format of the legacy ("simple notification") gateway protocol.
//!
//! ```text
//! [command:1][token_len:2 BE][token:32][payload_len:2 BE][payload:N]
//! ```
//!
//! The gateway never acknowledges individual frames, so nothing here reads
//! from the socket.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::Serialize;
use thiserror::Error;

use crate::common::device_token::{DEVICE_TOKEN_LEN, DeviceToken};

pub const SIMPLE_NOTIFICATION_COMMAND: u8 = 0;

/// Largest payload the 16-bit length prefix can describe.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

const FRAME_HEADER_LEN: usize = 1 + 2 + DEVICE_TOKEN_LEN + 2;

#[derive(Debug, Error)]
pub enum EncodingError {
    #[error("Invalid device token: {0}")]
    InvalidToken(String),

    #[error("Payload of {0} bytes does not fit a 16-bit length field")]
    PayloadTooLarge(usize),

    #[error("Payload serialization failed: {0}")]
    Serialization(String),

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),
}

/// Encodes one notification frame.
pub fn encode_frame<T>(device_token: &DeviceToken, message: &T) -> Result<Bytes, EncodingError>
where
    T: Serialize + ?Sized,
{
    let payload = serde_json::to_vec(message)
        .map_err(|err| EncodingError::Serialization(err.to_string()))?;
    let payload_len =
        u16::try_from(payload.len()).map_err(|_| EncodingError::PayloadTooLarge(payload.len()))?;

    let mut frame = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.put_u8(SIMPLE_NOTIFICATION_COMMAND);
    frame.put_u16(DEVICE_TOKEN_LEN as u16);
    frame.put_slice(device_token.as_bytes());
    frame.put_u16(payload_len);
    frame.put_slice(&payload);

    Ok(frame.freeze())
}

/// A frame read back from a byte stream.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    pub device_token: DeviceToken,
    pub payload: Bytes,
}

/// Splits the next complete frame off the front of `buf`.
///
/// Returns `Ok(None)` and leaves `buf` untouched when it does not yet hold a
/// whole frame.
pub fn decode_frame(buf: &mut Bytes) -> Result<Option<DecodedFrame>, EncodingError> {
    if buf.len() < FRAME_HEADER_LEN {
        return Ok(None);
    }

    let command = buf[0];
    if command != SIMPLE_NOTIFICATION_COMMAND {
        return Err(EncodingError::MalformedFrame(format!(
            "unknown command {command}"
        )));
    }

    let token_len = u16::from_be_bytes([buf[1], buf[2]]) as usize;
    if token_len != DEVICE_TOKEN_LEN {
        return Err(EncodingError::MalformedFrame(format!(
            "token length {token_len}"
        )));
    }

    let payload_len_at = 3 + DEVICE_TOKEN_LEN;
    let payload_len = u16::from_be_bytes([buf[payload_len_at], buf[payload_len_at + 1]]) as usize;
    if buf.len() < FRAME_HEADER_LEN + payload_len {
        return Ok(None);
    }

    buf.advance(3);
    let device_token = DeviceToken::try_from(&buf.split_to(DEVICE_TOKEN_LEN)[..])?;
    buf.advance(2);
    let payload = buf.split_to(payload_len);

    Ok(Some(DecodedFrame {
        device_token,
        payload,
    }))
}
