//! Pushsync - web push subscription reconciliation.
//!
//! This crate keeps two independently-owned records in agreement: the
//! platform's push subscription (endpoint + keys) and the server-side
//! record registering that subscription under a topic.
//!
//! # Architecture
//!
//! - **Identifier** - Stable, URL-safe name derived from a subscription endpoint
//! - **Registry** - HTTP adapter for the server's subscription store
//! - **Source** - Adapter over the platform's push subscription capability
//! - **Reconcile** - Controller driving both sides in lock-step
//!
//! # Modules
//!
//! - [`notifications`] - Subscription model, registry, source and controller
//! - [`config`] - Configuration loading/saving

pub mod config;
pub mod constants;
pub mod notifications;

// Re-export commonly used types
pub use config::Config;
pub use notifications::identifier::SubscriptionId;
pub use notifications::push::{PushSubscription, SubscriptionKeys};
pub use notifications::reconcile::{
    ControllerConfig, ControllerError, RemoteRecord, SubscriptionController, SubscriptionStatus,
};
pub use notifications::registry::{HttpRegistry, RegistryError, SubscriptionRegistry};
pub use notifications::source::{
    FileSubscriptionSource, MemorySubscriptionSource, SourceError, SubscriptionSource,
};
pub use notifications::vapid::ApplicationServerKey;
