//! Local push subscription source.
//!
//! Adapter over the platform capability that owns push subscriptions:
//! look up the current one, request a new one for an application server
//! key, destroy one. The reconciler decides *when* to create or destroy;
//! the source only carries it out.
//!
//! Two implementations ship with the crate:
//!
//! - [`MemorySubscriptionSource`] - in-process, scriptable; used by tests
//!   and hosts that hand subscriptions over directly
//! - [`FileSubscriptionSource`] - persists the issued subscription as JSON;
//!   used by the command-line front-end

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::io::AsyncWriteExt;

use super::push::{InvalidSubscription, PushSubscription};
use super::vapid::ApplicationServerKey;

/// Errors from the platform push capability.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The user refused notification permission.
    #[error("notification permission denied")]
    PermissionDenied,
    /// The push service could not issue a subscription.
    #[error("push service unavailable: {0}")]
    Unavailable(String),
    /// A subscription already exists under a different application server key.
    #[error("a subscription already exists for a different application server key")]
    KeyMismatch,
    /// The issued subscription cannot be used for delivery.
    #[error(transparent)]
    Invalid(#[from] InvalidSubscription),
    /// Reading or writing persisted state failed.
    #[error("subscription storage error: {0}")]
    Io(#[from] std::io::Error),
    /// Persisted state could not be parsed.
    #[error("subscription storage is corrupted: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Platform push subscription capability.
#[async_trait]
pub trait SubscriptionSource: Send + Sync {
    /// The subscription the platform currently holds, if any.
    async fn current(&self) -> Result<Option<PushSubscription>, SourceError>;

    /// Request a subscription for `key`.
    ///
    /// The platform may hand back the subscription it already holds when
    /// that one was issued for the same key.
    async fn create(&self, key: &ApplicationServerKey) -> Result<PushSubscription, SourceError>;

    /// Destroy `subscription`. Returns whether the platform reports success.
    async fn destroy(&self, subscription: &PushSubscription) -> Result<bool, SourceError>;
}

/// A subscription together with the key it was issued for.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct Issued {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    application_server_key: Option<ApplicationServerKey>,
    subscription: PushSubscription,
}

impl Issued {
    /// Platform rule: reuse for the same key, refuse for a different one.
    fn reuse_for(&mut self, key: &ApplicationServerKey) -> Result<PushSubscription, SourceError> {
        match &self.application_server_key {
            Some(existing) if existing != key => Err(SourceError::KeyMismatch),
            _ => {
                self.application_server_key = Some(key.clone());
                Ok(self.subscription.clone())
            }
        }
    }
}

#[derive(Debug)]
struct MemoryState {
    current: Option<Issued>,
    offers: VecDeque<PushSubscription>,
    deny_permission: bool,
    destroy_outcome: bool,
    create_calls: usize,
    destroy_calls: usize,
}

/// In-process subscription source.
///
/// Subscriptions handed out by [`create`](SubscriptionSource::create) come
/// from a queue of offers. Permission denial and the platform's destroy
/// outcome can be scripted.
#[derive(Debug)]
pub struct MemorySubscriptionSource {
    state: Mutex<MemoryState>,
}

impl Default for MemorySubscriptionSource {
    fn default() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                current: None,
                offers: VecDeque::new(),
                deny_permission: false,
                destroy_outcome: true,
                create_calls: 0,
                destroy_calls: 0,
            }),
        }
    }
}

impl MemorySubscriptionSource {
    /// Empty source with no current subscription and no offers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Source that already holds `subscription` (key unknown).
    pub fn with_current(subscription: PushSubscription) -> Self {
        let source = Self::default();
        source.lock().current = Some(Issued {
            application_server_key: None,
            subscription,
        });
        source
    }

    /// Queue a subscription to be issued by the next `create`.
    pub fn offer(&self, subscription: PushSubscription) {
        self.lock().offers.push_back(subscription);
    }

    /// Make subsequent `create` calls fail with permission denied.
    pub fn deny_permission(&self, deny: bool) {
        self.lock().deny_permission = deny;
    }

    /// Set what the platform reports from `destroy`.
    pub fn set_destroy_outcome(&self, outcome: bool) {
        self.lock().destroy_outcome = outcome;
    }

    /// Drop the current subscription without going through `destroy`,
    /// as when the push service revokes it.
    pub fn revoke(&self) {
        self.lock().current = None;
    }

    /// Number of `create` calls so far.
    pub fn create_calls(&self) -> usize {
        self.lock().create_calls
    }

    /// Number of `destroy` calls so far.
    pub fn destroy_calls(&self) -> usize {
        self.lock().destroy_calls
    }

    /// Endpoint of the current subscription, if any.
    pub fn current_endpoint(&self) -> Option<String> {
        self.lock()
            .current
            .as_ref()
            .map(|issued| issued.subscription.endpoint.clone())
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl SubscriptionSource for MemorySubscriptionSource {
    async fn current(&self) -> Result<Option<PushSubscription>, SourceError> {
        Ok(self
            .lock()
            .current
            .as_ref()
            .map(|issued| issued.subscription.clone()))
    }

    async fn create(&self, key: &ApplicationServerKey) -> Result<PushSubscription, SourceError> {
        let mut state = self.lock();
        state.create_calls += 1;

        if state.deny_permission {
            return Err(SourceError::PermissionDenied);
        }
        if let Some(issued) = state.current.as_mut() {
            return issued.reuse_for(key);
        }

        let subscription = state
            .offers
            .pop_front()
            .ok_or_else(|| SourceError::Unavailable("no subscription offered".to_string()))?;
        state.current = Some(Issued {
            application_server_key: Some(key.clone()),
            subscription: subscription.clone(),
        });
        Ok(subscription)
    }

    async fn destroy(&self, subscription: &PushSubscription) -> Result<bool, SourceError> {
        let mut state = self.lock();
        state.destroy_calls += 1;

        let held = state
            .current
            .as_ref()
            .is_some_and(|issued| issued.subscription.endpoint == subscription.endpoint);
        if !held || !state.destroy_outcome {
            return Ok(false);
        }
        state.current = None;
        Ok(true)
    }
}

/// Subscription source persisted to a JSON file.
///
/// The file holds the issued subscription and the application server key
/// it was issued for. New subscriptions are not minted here: the host
/// offers one (for instance exported from a browser) and `create` adopts it.
#[derive(Debug)]
pub struct FileSubscriptionSource {
    path: PathBuf,
    offer: Mutex<Option<PushSubscription>>,
}

impl FileSubscriptionSource {
    /// Source backed by the file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offer: Mutex::new(None),
        }
    }

    /// Offer a subscription for the next `create`.
    pub fn with_offer(self, subscription: PushSubscription) -> Self {
        *self.offer.lock().unwrap_or_else(PoisonError::into_inner) = Some(subscription);
        self
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Option<Issued>, SourceError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn store(&self, issued: &Issued) -> Result<(), SourceError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(issued)?;

        // Key material: owner read/write only, from the moment the file exists
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);
        let mut file = options.open(&self.path).await?;

        // `mode` only applies when the file is created
        #[cfg(unix)]
        file.set_permissions(std::fs::Permissions::from_mode(0o600)).await?;

        file.write_all(content.as_bytes()).await?;
        file.flush().await?;

        Ok(())
    }
}

#[async_trait]
impl SubscriptionSource for FileSubscriptionSource {
    async fn current(&self) -> Result<Option<PushSubscription>, SourceError> {
        Ok(self.load().await?.map(|issued| issued.subscription))
    }

    async fn create(&self, key: &ApplicationServerKey) -> Result<PushSubscription, SourceError> {
        if let Some(mut issued) = self.load().await? {
            let subscription = issued.reuse_for(key)?;
            self.store(&issued).await?;
            return Ok(subscription);
        }

        let offered = self
            .offer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| SourceError::Unavailable("no subscription offered".to_string()))?;
        offered.validate()?;

        let issued = Issued {
            application_server_key: Some(key.clone()),
            subscription: offered,
        };
        self.store(&issued).await?;
        log::info!("[Source] Stored subscription at {}", self.path.display());

        Ok(issued.subscription)
    }

    async fn destroy(&self, subscription: &PushSubscription) -> Result<bool, SourceError> {
        let Some(issued) = self.load().await? else {
            return Ok(false);
        };
        if issued.subscription.endpoint != subscription.endpoint {
            log::warn!("[Source] Refusing to destroy a subscription this source does not hold");
            return Ok(false);
        }

        tokio::fs::remove_file(&self.path).await?;
        log::info!("[Source] Removed subscription at {}", self.path.display());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const P256DH: &str =
        "BHQRAlHjvxDl2_-J0ilJpW9APU0E-wRytwXjRepFIru8A6xylKwdFlPOortnEfqTeG8FHqcZ2emJBihH7nnrj3A";
    const AUTH: &str = "AAECAwQFBgcICQoLDA0ODw";
    const KEY: &str =
        "BBR8eMU0Y9hQhAj92n4HSbiNAhY4Vx-j8Ur1rgPTRiBocev3CTzg9tze1PvStZsDcOOg9S0lsHc3Mrrgd18p2ps";
    const OTHER_KEY: &str =
        "BHQRAlHjvxDl2_-J0ilJpW9APU0E-wRytwXjRepFIru8A6xylKwdFlPOortnEfqTeG8FHqcZ2emJBihH7nnrj3A";

    fn key() -> ApplicationServerKey {
        ApplicationServerKey::from_base64url(KEY).expect("key")
    }

    fn other_key() -> ApplicationServerKey {
        ApplicationServerKey::from_base64url(OTHER_KEY).expect("key")
    }

    fn subscription(endpoint: &str) -> PushSubscription {
        PushSubscription::new(endpoint, P256DH, AUTH)
    }

    #[tokio::test]
    async fn test_memory_create_and_destroy() {
        let source = MemorySubscriptionSource::new();
        assert!(source.current().await.expect("current").is_none());

        source.offer(subscription("https://push.example/1"));
        let issued = source.create(&key()).await.expect("create");
        assert_eq!(issued.endpoint, "https://push.example/1");
        assert_eq!(source.current().await.expect("current"), Some(issued.clone()));

        assert!(source.destroy(&issued).await.expect("destroy"));
        assert!(source.current().await.expect("current").is_none());
        assert_eq!(source.create_calls(), 1);
        assert_eq!(source.destroy_calls(), 1);
    }

    #[tokio::test]
    async fn test_memory_create_reuses_existing_for_same_key() {
        let source = MemorySubscriptionSource::new();
        source.offer(subscription("https://push.example/1"));
        source.offer(subscription("https://push.example/2"));

        let first = source.create(&key()).await.expect("create");
        let second = source.create(&key()).await.expect("create again");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_memory_create_rejects_other_key() {
        let source = MemorySubscriptionSource::new();
        source.offer(subscription("https://push.example/1"));
        source.create(&key()).await.expect("create");

        assert!(matches!(
            source.create(&other_key()).await,
            Err(SourceError::KeyMismatch)
        ));
    }

    #[tokio::test]
    async fn test_memory_permission_denied() {
        let source = MemorySubscriptionSource::new();
        source.offer(subscription("https://push.example/1"));
        source.deny_permission(true);

        assert!(matches!(
            source.create(&key()).await,
            Err(SourceError::PermissionDenied)
        ));
        assert!(source.current().await.expect("current").is_none());
    }

    #[tokio::test]
    async fn test_memory_destroy_outcome_false_keeps_subscription() {
        let sub = subscription("https://push.example/1");
        let source = MemorySubscriptionSource::with_current(sub.clone());
        source.set_destroy_outcome(false);

        assert!(!source.destroy(&sub).await.expect("destroy"));
        assert_eq!(source.current_endpoint().as_deref(), Some("https://push.example/1"));
    }

    #[tokio::test]
    async fn test_file_source_adopts_offer_and_persists() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("subscription.json");

        let source = FileSubscriptionSource::new(&path)
            .with_offer(subscription("https://push.example/1"));
        let issued = source.create(&key()).await.expect("create");
        assert!(path.exists());

        // A fresh source over the same file sees the subscription
        let reopened = FileSubscriptionSource::new(&path);
        assert_eq!(reopened.current().await.expect("current"), Some(issued.clone()));

        // And reuses it for the same key without an offer
        assert_eq!(reopened.create(&key()).await.expect("reuse"), issued);
        assert!(matches!(
            reopened.create(&other_key()).await,
            Err(SourceError::KeyMismatch)
        ));

        #[cfg(unix)]
        {
            let mode = std::fs::metadata(&path).expect("metadata").permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        assert!(reopened.destroy(&issued).await.expect("destroy"));
        assert!(!path.exists());
        assert!(reopened.current().await.expect("current").is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_source_tightens_wider_file_on_store() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("subscription.json");

        let source = FileSubscriptionSource::new(&path)
            .with_offer(subscription("https://push.example/1"));
        let issued = source.create(&key()).await.expect("create");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).expect("chmod");

        // Reuse rewrites the file
        let reopened = FileSubscriptionSource::new(&path);
        assert_eq!(reopened.create(&key()).await.expect("reuse"), issued);

        let mode = std::fs::metadata(&path).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(reopened.current().await.expect("current"), Some(issued));
    }

    #[tokio::test]
    async fn test_file_source_without_offer_is_unavailable() {
        let dir = TempDir::new().expect("tempdir");
        let source = FileSubscriptionSource::new(dir.path().join("subscription.json"));

        assert!(matches!(
            source.create(&key()).await,
            Err(SourceError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_file_source_rejects_invalid_offer() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("subscription.json");
        let source = FileSubscriptionSource::new(&path)
            .with_offer(PushSubscription::new("https://push.example/1", "AAAA", AUTH));

        assert!(matches!(
            source.create(&key()).await,
            Err(SourceError::Invalid(_))
        ));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_file_source_destroy_foreign_subscription() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("subscription.json");
        let source = FileSubscriptionSource::new(&path)
            .with_offer(subscription("https://push.example/1"));
        source.create(&key()).await.expect("create");

        let foreign = subscription("https://push.example/2");
        assert!(!source.destroy(&foreign).await.expect("destroy"));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_file_source_corrupt_file() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("subscription.json");
        std::fs::write(&path, "{ not json").expect("write");

        let source = FileSubscriptionSource::new(&path);
        assert!(matches!(source.current().await, Err(SourceError::Corrupt(_))));
    }
}
