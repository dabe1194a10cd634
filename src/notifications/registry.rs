//! Server-side subscription registry client.
//!
//! Each operation is one HTTP round trip against
//! `{api_endpoint}/subscriptions/{topic}/{identifier}`:
//!
//! | Operation | Method | Success                 |
//! |-----------|--------|-------------------------|
//! | create    | POST   | 201                     |
//! | delete    | DELETE | 204 (404 → `NotFound`)  |
//! | exists    | HEAD   | 200/204 → true, 404 → false |
//!
//! `exists` also accepts 204 as "found": the reference server answers a
//! found record with 204 rather than 200.
//!
//! Any other status is surfaced as [`RegistryError::UnexpectedStatus`]
//! carrying the observed code. Nothing is retried here.

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};

use super::identifier::SubscriptionId;
use super::push::PushSubscription;
use crate::constants;

/// Registry operation, for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Register a subscription under a topic.
    Create,
    /// Remove a registration.
    Delete,
    /// Probe for a registration.
    Exists,
}

impl Operation {
    /// Returns the string representation used in logs and errors.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Delete => "delete",
            Operation::Exists => "exists",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors returned by a [`SubscriptionRegistry`].
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The record does not exist (404 on delete).
    ///
    /// Distinct from other failures: a caller removing a record reaches
    /// the state it wanted.
    #[error("subscription record not found")]
    NotFound,
    /// The server answered outside the operation's expected status set.
    #[error("registry {operation} failed with HTTP {status}")]
    UnexpectedStatus {
        /// Operation that failed.
        operation: Operation,
        /// Observed status code.
        status: u16,
    },
    /// The request did not complete.
    #[error("registry request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// The configured API endpoint cannot hold path segments.
    #[error("invalid registry endpoint: {0}")]
    InvalidEndpoint(String),
    /// The topic cannot be sent as a single path segment.
    #[error("invalid topic: {0:?}")]
    InvalidTopic(String),
}

impl RegistryError {
    /// Whether this is the "record not found" outcome.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    /// HTTP status the server answered with, if it answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::NotFound => Some(StatusCode::NOT_FOUND.as_u16()),
            Self::UnexpectedStatus { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            Self::InvalidEndpoint(_) | Self::InvalidTopic(_) => None,
        }
    }
}

/// Create, delete and probe subscription records keyed by `(topic, identifier)`.
#[async_trait]
pub trait SubscriptionRegistry: Send + Sync {
    /// Register `subscription` under `(topic, id)`.
    ///
    /// On success the server routes notifications for the topic to the
    /// subscription's endpoint.
    async fn create(
        &self,
        topic: &str,
        id: &SubscriptionId,
        subscription: &PushSubscription,
    ) -> Result<(), RegistryError>;

    /// Remove the record for `(topic, id)`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if there was no record.
    async fn delete(&self, topic: &str, id: &SubscriptionId) -> Result<(), RegistryError>;

    /// Whether a record exists for `(topic, id)`.
    ///
    /// Both answers are successful outcomes.
    async fn exists(&self, topic: &str, id: &SubscriptionId) -> Result<bool, RegistryError>;
}

/// HTTP implementation of [`SubscriptionRegistry`].
#[derive(Debug, Clone)]
pub struct HttpRegistry {
    client: Client,
    api_endpoint: Url,
}

impl HttpRegistry {
    /// Creates a registry client for the given API endpoint.
    ///
    /// # Arguments
    ///
    /// * `api_endpoint` - Base URL, e.g. `https://example.com/api/v1`
    /// * `timeout` - Per-request timeout applied by the HTTP client
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is not an absolute URL or the HTTP
    /// client cannot be created.
    pub fn new(api_endpoint: &str, timeout: std::time::Duration) -> Result<Self, RegistryError> {
        let client = Client::builder().timeout(timeout).build()?;
        Self::with_client(client, api_endpoint)
    }

    /// Creates a registry client with a pre-configured HTTP client.
    ///
    /// Useful for testing or when custom client configuration is needed.
    pub fn with_client(client: Client, api_endpoint: &str) -> Result<Self, RegistryError> {
        let api_endpoint = Url::parse(api_endpoint)
            .map_err(|e| RegistryError::InvalidEndpoint(format!("{api_endpoint}: {e}")))?;
        if api_endpoint.cannot_be_a_base() {
            return Err(RegistryError::InvalidEndpoint(api_endpoint.to_string()));
        }

        Ok(Self {
            client,
            api_endpoint,
        })
    }

    /// Returns the API endpoint.
    pub fn api_endpoint(&self) -> &Url {
        &self.api_endpoint
    }

    /// URL of the record for `(topic, id)`, with both segments percent-encoded.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidTopic`] for an empty, `.` or `..`
    /// topic. URL normalization would drop or collapse those segments and
    /// address a different resource.
    pub fn record_url(&self, topic: &str, id: &SubscriptionId) -> Result<Url, RegistryError> {
        if matches!(topic, "" | "." | "..") {
            return Err(RegistryError::InvalidTopic(topic.to_string()));
        }

        let mut url = self.api_endpoint.clone();
        url.path_segments_mut()
            .map_err(|()| RegistryError::InvalidEndpoint(self.api_endpoint.to_string()))?
            .pop_if_empty()
            .push(constants::SUBSCRIPTIONS_SEGMENT)
            .push(topic)
            .push(id.as_str());
        Ok(url)
    }
}

#[async_trait]
impl SubscriptionRegistry for HttpRegistry {
    async fn create(
        &self,
        topic: &str,
        id: &SubscriptionId,
        subscription: &PushSubscription,
    ) -> Result<(), RegistryError> {
        let url = self.record_url(topic, id)?;
        log::debug!("[Registry] POST {url}");

        let response = self.client.post(url).json(subscription).send().await?;

        match response.status() {
            StatusCode::CREATED => {
                log::info!("[Registry] Registered {} under topic '{}'", id, topic);
                Ok(())
            }
            status => Err(unexpected(Operation::Create, status)),
        }
    }

    async fn delete(&self, topic: &str, id: &SubscriptionId) -> Result<(), RegistryError> {
        let url = self.record_url(topic, id)?;
        log::debug!("[Registry] DELETE {url}");

        let response = self.client.delete(url).send().await?;

        match response.status() {
            StatusCode::NO_CONTENT => {
                log::info!("[Registry] Removed {} from topic '{}'", id, topic);
                Ok(())
            }
            StatusCode::NOT_FOUND => Err(RegistryError::NotFound),
            status => Err(unexpected(Operation::Delete, status)),
        }
    }

    async fn exists(&self, topic: &str, id: &SubscriptionId) -> Result<bool, RegistryError> {
        let url = self.record_url(topic, id)?;
        log::debug!("[Registry] HEAD {url}");

        let response = self.client.head(url).send().await?;

        match response.status() {
            StatusCode::OK | StatusCode::NO_CONTENT => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(unexpected(Operation::Exists, status)),
        }
    }
}

fn unexpected(operation: Operation, status: StatusCode) -> RegistryError {
    log::warn!("[Registry] {} returned unexpected HTTP {}", operation, status);
    RegistryError::UnexpectedStatus {
        operation,
        status: status.as_u16(),
    }
}
