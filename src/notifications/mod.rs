//! Web push subscription infrastructure.
//!
//! Keeps the platform push subscription and the server's topic
//! registration for it consistent.
//!
//! # Architecture
//!
//! ```text
//! SubscriptionController
//!     │
//!     ├── SubscriptionSource   (platform: current / create / destroy)
//!     │
//!     ├── SubscriptionId       (SHA-256 of endpoint, base64url)
//!     │
//!     └── SubscriptionRegistry (server: POST / DELETE / HEAD)
//! ```
//!
//! # Identifiers
//!
//! The server never learns a subscription by its endpoint in the URL.
//! Records are keyed by `(topic, identifier)` where the identifier is a
//! one-way digest of the endpoint, so it is stable across derivations and
//! safe to place in a path segment.
//!
//! # Failure handling
//!
//! Local and remote halves are updated by separate calls that can fail
//! independently. The controller orders them so that a failed server
//! delete never leaves a dangling remote record behind a destroyed local
//! subscription.

pub mod identifier;
pub mod push;
pub mod reconcile;
pub mod registry;
pub mod source;
pub mod vapid;
