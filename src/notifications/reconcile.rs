//! Subscription reconciliation controller.
//!
//! Owns the decision of when a local push subscription is created or
//! destroyed and keeps the server's `(topic, identifier)` record in
//! lock-step with it.
//!
//! # States
//!
//! ```text
//!                 activate
//! Uninitialized ──────────┬──────────────┬──────────────────┐
//!                         ▼              ▼                  ▼
//!                     Inactive    LocalOnly{remote}      Synced
//!                         │              │                  │
//!            subscribe ok │  create fail │ subscribe ok     │ unsubscribe ok
//!                         ▼              ▼                  ▼
//!                      Synced    LocalOnly{Missing}     Inactive
//! ```
//!
//! # Ordering
//!
//! `unsubscribe` deletes the server record before destroying the local
//! subscription. A failed delete (other than "not found") aborts before
//! the local side is touched, so a remote record is never left behind a
//! destroyed subscription by this controller.
//!
//! Steps within one call run strictly in order and each is a precondition
//! for the next. Overlapping calls are rejected with
//! [`ControllerError::Busy`] rather than interleaved.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::watch;

use super::identifier::SubscriptionId;
use super::push::PushSubscription;
use super::registry::{RegistryError, SubscriptionRegistry};
use super::source::{SourceError, SubscriptionSource};
use super::vapid::ApplicationServerKey;

/// Inputs the controller needs besides its collaborators.
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Topic the subscription is registered under.
    pub topic: String,
    /// Key passed to the platform when requesting a new subscription.
    pub application_server_key: ApplicationServerKey,
}

/// What is known about the server record while the local side is ahead.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteRecord {
    /// The server has no record (probe said so, or create failed).
    Missing,
    /// The existence probe failed; the server may or may not have one.
    Unresolved,
}

/// Controller state as seen by callers.
///
/// Raw subscriptions stay inside the controller; callers see only the
/// identifier and whether the server record is confirmed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// `activate` has not completed yet.
    Uninitialized,
    /// No local subscription, no server record expected.
    Inactive,
    /// Local subscription present, server record not confirmed.
    LocalOnly {
        /// Identifier of the local subscription.
        id: SubscriptionId,
        /// What is known about the server side.
        remote: RemoteRecord,
    },
    /// Local subscription present and server record confirmed.
    Active {
        /// Identifier of the local subscription.
        id: SubscriptionId,
    },
}

impl SubscriptionStatus {
    /// Whether notifications for the topic will reach this device.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. })
    }

    /// Identifier of the local subscription, if there is one.
    pub fn identifier(&self) -> Option<&SubscriptionId> {
        match self {
            Self::LocalOnly { id, .. } | Self::Active { id } => Some(id),
            Self::Uninitialized | Self::Inactive => None,
        }
    }
}

/// Errors surfaced by the controller.
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    /// The platform could not look up, create or destroy a subscription.
    #[error("local subscription error: {0}")]
    Source(#[from] SourceError),
    /// The registry call failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// The platform reported that destroying the subscription failed.
    #[error("platform refused to destroy the local subscription")]
    DestroyRejected,
    /// Another activate/subscribe/unsubscribe is still running.
    #[error("another subscription operation is in flight")]
    Busy,
    /// `unsubscribe` was called before `activate`.
    #[error("controller has not been activated")]
    NotActivated,
}

/// Internal state. Identifier and subscription travel together so an
/// identifier without a local subscription cannot be represented.
#[derive(Clone, Debug)]
enum State {
    Uninitialized,
    Inactive,
    LocalOnly {
        subscription: PushSubscription,
        id: SubscriptionId,
        remote: RemoteRecord,
    },
    Synced {
        subscription: PushSubscription,
        id: SubscriptionId,
    },
}

impl State {
    fn status(&self) -> SubscriptionStatus {
        match self {
            State::Uninitialized => SubscriptionStatus::Uninitialized,
            State::Inactive => SubscriptionStatus::Inactive,
            State::LocalOnly { id, remote, .. } => SubscriptionStatus::LocalOnly {
                id: id.clone(),
                remote: *remote,
            },
            State::Synced { id, .. } => SubscriptionStatus::Active { id: id.clone() },
        }
    }
}

/// Keeps a local push subscription and its server record in agreement.
pub struct SubscriptionController {
    config: ControllerConfig,
    source: Arc<dyn SubscriptionSource>,
    registry: Arc<dyn SubscriptionRegistry>,
    state: Mutex<State>,
    in_flight: AtomicBool,
    status_tx: watch::Sender<SubscriptionStatus>,
}

impl std::fmt::Debug for SubscriptionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionController")
            .field("topic", &self.config.topic)
            .field("status", &self.status())
            .field("in_flight", &self.in_flight.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl SubscriptionController {
    /// Creates a controller in the `Uninitialized` state.
    ///
    /// Nothing is queried until [`activate`](Self::activate) runs.
    pub fn new(
        config: ControllerConfig,
        source: Arc<dyn SubscriptionSource>,
        registry: Arc<dyn SubscriptionRegistry>,
    ) -> Self {
        let (status_tx, _) = watch::channel(SubscriptionStatus::Uninitialized);
        Self {
            config,
            source,
            registry,
            state: Mutex::new(State::Uninitialized),
            in_flight: AtomicBool::new(false),
            status_tx,
        }
    }

    /// Topic this controller registers under.
    pub fn topic(&self) -> &str {
        &self.config.topic
    }

    /// Current status.
    pub fn status(&self) -> SubscriptionStatus {
        self.lock_state().status()
    }

    /// Whether the subscription is confirmed on both sides.
    pub fn is_active(&self) -> bool {
        self.status().is_active()
    }

    /// Identifier of the local subscription, if there is one.
    pub fn identifier(&self) -> Option<SubscriptionId> {
        self.status().identifier().cloned()
    }

    /// Receiver that observes every status change.
    pub fn watch(&self) -> watch::Receiver<SubscriptionStatus> {
        self.status_tx.subscribe()
    }

    /// Discover the local subscription and ask the server whether it
    /// knows about it.
    ///
    /// A failed existence probe does not fail activation: it is logged and
    /// the state becomes `LocalOnly { remote: Unresolved }`. A failure to
    /// read the local subscription is returned and leaves the state as it was.
    ///
    /// May be run again at any time to re-derive state from scratch.
    pub async fn activate(&self) -> Result<SubscriptionStatus, ControllerError> {
        let _guard = self.begin()?;

        let Some(subscription) = self.source.current().await? else {
            log::debug!("[Reconcile] No local subscription");
            return Ok(self.set_state(State::Inactive));
        };

        let id = subscription.id();
        let state = match self.registry.exists(&self.config.topic, &id).await {
            Ok(true) => State::Synced { subscription, id },
            Ok(false) => State::LocalOnly {
                subscription,
                id,
                remote: RemoteRecord::Missing,
            },
            Err(e) => {
                log::warn!(
                    "[Reconcile] Could not check server record for {} on '{}': {}",
                    id,
                    self.config.topic,
                    e
                );
                State::LocalOnly {
                    subscription,
                    id,
                    remote: RemoteRecord::Unresolved,
                }
            }
        };

        Ok(self.set_state(state))
    }

    /// Obtain a local subscription and register it with the server.
    ///
    /// Always asks the platform for a subscription; it may return the one it
    /// already holds. If the server registration fails the local
    /// subscription is kept and the state is `LocalOnly { remote: Missing }`.
    pub async fn subscribe(&self) -> Result<SubscriptionStatus, ControllerError> {
        let _guard = self.begin()?;

        let subscription = self
            .source
            .create(&self.config.application_server_key)
            .await?;
        let id = subscription.id();

        if let Err(e) = self
            .registry
            .create(&self.config.topic, &id, &subscription)
            .await
        {
            log::warn!(
                "[Reconcile] Local subscription {} obtained but server registration failed: {}",
                id,
                e
            );
            self.set_state(State::LocalOnly {
                subscription,
                id,
                remote: RemoteRecord::Missing,
            });
            return Err(e.into());
        }

        log::info!("[Reconcile] Subscribed {} to '{}'", id, self.config.topic);
        Ok(self.set_state(State::Synced { subscription, id }))
    }

    /// Remove the server record, then destroy the local subscription.
    ///
    /// A "not found" from the server counts as removed. Any other server
    /// failure aborts with the state unchanged. The local side is cleared
    /// only once the platform reports the subscription destroyed.
    pub async fn unsubscribe(&self) -> Result<SubscriptionStatus, ControllerError> {
        let _guard = self.begin()?;

        let current = self.lock_state().clone();
        let (subscription, id) = match current {
            State::Uninitialized => return Err(ControllerError::NotActivated),
            State::Inactive => return Ok(SubscriptionStatus::Inactive),
            State::Synced { subscription, id } => {
                self.delete_remote(&id).await?;
                (subscription, id)
            }
            State::LocalOnly {
                subscription,
                id,
                remote: RemoteRecord::Unresolved,
            } => {
                self.delete_remote(&id).await?;
                (subscription, id)
            }
            State::LocalOnly {
                subscription,
                id,
                remote: RemoteRecord::Missing,
            } => (subscription, id),
        };

        match self.source.destroy(&subscription).await {
            Ok(true) => {
                log::info!("[Reconcile] Unsubscribed {} from '{}'", id, self.config.topic);
                Ok(self.set_state(State::Inactive))
            }
            outcome => {
                // Server side is gone either way; the subscription is still held.
                self.set_state(State::LocalOnly {
                    subscription,
                    id,
                    remote: RemoteRecord::Missing,
                });
                match outcome {
                    Err(e) => Err(e.into()),
                    Ok(_) => Err(ControllerError::DestroyRejected),
                }
            }
        }
    }

    async fn delete_remote(&self, id: &SubscriptionId) -> Result<(), ControllerError> {
        match self.registry.delete(&self.config.topic, id).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                log::debug!("[Reconcile] Server had no record for {}", id);
                Ok(())
            }
            Err(e) => {
                log::warn!(
                    "[Reconcile] Server delete for {} failed, keeping local subscription: {}",
                    id,
                    e
                );
                Err(e.into())
            }
        }
    }

    /// Claim the in-flight slot, released when the returned guard drops.
    fn begin(&self) -> Result<InFlightGuard<'_>, ControllerError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ControllerError::Busy);
        }
        Ok(scopeguard::guard(&self.in_flight, release as fn(&AtomicBool)))
    }

    fn set_state(&self, state: State) -> SubscriptionStatus {
        let status = state.status();
        *self.lock_state() = state;
        self.status_tx.send_replace(status.clone());
        status
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

type InFlightGuard<'a> = scopeguard::ScopeGuard<&'a AtomicBool, fn(&AtomicBool)>;

fn release(flag: &AtomicBool) {
    flag.store(false, Ordering::Release);
}
