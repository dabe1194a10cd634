//! VAPID application server key (RFC 8292).
//!
//! The public half of the server's VAPID keypair, handed to the platform
//! when a new push subscription is requested so the push service only
//! accepts messages signed by that server. The reconciler treats it as
//! opaque; it is validated once at configuration time.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64URL, Engine};
use serde::{Deserialize, Serialize};

/// Length of an uncompressed SEC1 P-256 point (0x04 || x || y).
const UNCOMPRESSED_POINT_LEN: usize = 65;

/// Errors from parsing an application server key.
#[derive(Debug, thiserror::Error)]
pub enum InvalidKey {
    /// Not unpadded base64url.
    #[error("application server key is not base64url: {0}")]
    Encoding(#[from] base64::DecodeError),
    /// Wrong length or not an uncompressed point.
    #[error("application server key must be a 65-byte uncompressed P-256 point, got {0} bytes")]
    Length(usize),
    /// Bytes do not describe a point on the curve.
    #[error("application server key is not a valid P-256 point")]
    NotOnCurve,
}

/// Base64url-encoded uncompressed P-256 public key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ApplicationServerKey(String);

impl ApplicationServerKey {
    /// Parse and validate a base64url-encoded key.
    pub fn from_base64url(key_b64: &str) -> Result<Self, InvalidKey> {
        let bytes = BASE64URL.decode(key_b64.trim())?;
        if bytes.len() != UNCOMPRESSED_POINT_LEN || bytes[0] != 0x04 {
            return Err(InvalidKey::Length(bytes.len()));
        }
        if p256::PublicKey::from_sec1_bytes(&bytes).is_err() {
            return Err(InvalidKey::NotOnCurve);
        }

        Ok(Self(key_b64.trim().to_string()))
    }

    /// The key as sent to the platform.
    pub fn as_base64url(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ApplicationServerKey {
    type Error = InvalidKey;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_base64url(&value)
    }
}

impl From<ApplicationServerKey> for String {
    fn from(key: ApplicationServerKey) -> Self {
        key.0
    }
}

impl std::fmt::Display for ApplicationServerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
