use std::{fmt, str::FromStr};

use crate::notifications::codec::EncodingError;

/// Raw length of an APNs device token.
pub const DEVICE_TOKEN_LEN: usize = 32;

/// A 32-byte device token, usually handed around as 64 hex characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceToken([u8; DEVICE_TOKEN_LEN]);

impl DeviceToken {
    pub fn from_bytes(bytes: [u8; DEVICE_TOKEN_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; DEVICE_TOKEN_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl TryFrom<&[u8]> for DeviceToken {
    type Error = EncodingError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let raw: [u8; DEVICE_TOKEN_LEN] = bytes.try_into().map_err(|_| {
            EncodingError::InvalidToken(format!(
                "expected {} bytes, got {}",
                DEVICE_TOKEN_LEN,
                bytes.len()
            ))
        })?;
        Ok(Self(raw))
    }
}

impl FromStr for DeviceToken {
    type Err = EncodingError;

    /// Accepts plain hex as well as the `<abcd ef01 ...>` form devices print.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cleaned: String = s
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '<' && *c != '>')
            .collect();

        let bytes =
            hex::decode(&cleaned).map_err(|err| EncodingError::InvalidToken(err.to_string()))?;
        Self::try_from(bytes.as_slice())
    }
}

impl fmt::Display for DeviceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for DeviceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceToken({})", self.to_hex())
    }
}
