//! Browser push subscription model.
//!
//! Mirrors the platform's `PushSubscriptionJSON`: the endpoint the push
//! service delivers to, an optional expiration, and the key material the
//! server needs to encrypt payloads (RFC 8291). This is also the JSON body
//! sent to the registry when a record is created.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64URL, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::identifier::SubscriptionId;

/// Length in bytes of the decoded `auth` secret.
const AUTH_SECRET_LEN: usize = 16;

/// A push subscription issued by the platform.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushSubscription {
    /// Push service endpoint URL.
    pub endpoint: String,
    /// When the push service will expire the subscription, if it said.
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub expiration_time: Option<DateTime<Utc>>,
    /// Key material for payload encryption.
    pub keys: SubscriptionKeys,
}

/// Key material attached to a push subscription.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionKeys {
    /// Browser's P-256 ECDH public key (base64url).
    pub p256dh: String,
    /// Shared auth secret (base64url).
    pub auth: String,
}

/// Reasons a push subscription cannot be used for delivery.
#[derive(Debug, thiserror::Error)]
pub enum InvalidSubscription {
    /// Endpoint is not an absolute http(s) URL.
    #[error("invalid push endpoint: {0}")]
    Endpoint(String),
    /// `p256dh` is not a base64url P-256 public key.
    #[error("invalid p256dh key: {0}")]
    PublicKey(String),
    /// `auth` is not a base64url 16-byte secret.
    #[error("invalid auth secret: {0}")]
    AuthSecret(String),
}

impl PushSubscription {
    /// Build a subscription without an expiration time.
    pub fn new(
        endpoint: impl Into<String>,
        p256dh: impl Into<String>,
        auth: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            expiration_time: None,
            keys: SubscriptionKeys {
                p256dh: p256dh.into(),
                auth: auth.into(),
            },
        }
    }

    /// Identifier this subscription is registered under.
    pub fn id(&self) -> SubscriptionId {
        SubscriptionId::derive(&self.endpoint)
    }

    /// Check that the endpoint and keys are usable for delivery.
    ///
    /// The server decodes the same fields before it can push, so a
    /// subscription failing here would be registered but never delivered to.
    pub fn validate(&self) -> Result<(), InvalidSubscription> {
        let url = reqwest::Url::parse(&self.endpoint)
            .map_err(|e| InvalidSubscription::Endpoint(e.to_string()))?;
        if !matches!(url.scheme(), "https" | "http") {
            return Err(InvalidSubscription::Endpoint(format!(
                "unsupported scheme '{}'",
                url.scheme()
            )));
        }

        let public_key = BASE64URL
            .decode(&self.keys.p256dh)
            .map_err(|e| InvalidSubscription::PublicKey(e.to_string()))?;
        p256::PublicKey::from_sec1_bytes(&public_key)
            .map_err(|e| InvalidSubscription::PublicKey(e.to_string()))?;

        let auth = BASE64URL
            .decode(&self.keys.auth)
            .map_err(|e| InvalidSubscription::AuthSecret(e.to_string()))?;
        if auth.len() != AUTH_SECRET_LEN {
            return Err(InvalidSubscription::AuthSecret(format!(
                "expected {AUTH_SECRET_LEN} bytes, got {}",
                auth.len()
            )));
        }

        Ok(())
    }
}
