//! Subscription identifier derivation.
//!
//! A subscription is registered on the server under an identifier derived
//! from its push endpoint: SHA-256 of the endpoint's UTF-8 bytes, encoded
//! as base64url without padding. The identifier is recomputed on demand
//! and never stored apart from the subscription it came from.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64URL, Engine};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Stable, URL-safe identifier for a push subscription.
///
/// Identical endpoints always yield identical identifiers. The digest is
/// one-way, so the identifier alone does not reveal the endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    /// Derive the identifier for a push endpoint.
    ///
    /// The endpoint is not validated; any string hashes.
    pub fn derive(endpoint: &str) -> Self {
        let digest = Sha256::digest(endpoint.as_bytes());
        Self(BASE64URL.encode(digest))
    }

    /// Whether this identifier was derived from `endpoint`.
    ///
    /// The server performs the same check before accepting a record, so a
    /// create with a mismatched path identifier is rejected there.
    pub fn matches(&self, endpoint: &str) -> bool {
        *self == Self::derive(endpoint)
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SubscriptionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
