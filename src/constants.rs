//! Application-wide constants for pushsync.
//!
//! Centralizes the wire paths, file names and defaults shared by the
//! registry client, the file-backed source and the configuration layer.

use std::time::Duration;

// ============================================================================
// Registry API
// ============================================================================

/// Path segment under the API endpoint that holds subscription records.
///
/// Records live at `{api_endpoint}/subscriptions/{topic}/{identifier}`.
pub const SUBSCRIPTIONS_SEGMENT: &str = "subscriptions";

/// Default API endpoint for a locally running server.
pub const DEFAULT_API_ENDPOINT: &str = "http://localhost:8080/api/v1";

/// Default topic when none is configured.
pub const DEFAULT_TOPIC: &str = "default";

/// HTTP client request timeout for registry calls.
///
/// Applied to each round trip by the underlying client. The reconciler
/// itself imposes no timeouts.
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Files
// ============================================================================

/// Configuration file name inside the config directory.
pub const CONFIG_FILE: &str = "config.json";

/// File holding the locally issued push subscription.
pub const SUBSCRIPTION_FILE: &str = "subscription.json";

/// Environment variable overriding the config directory.
pub const CONFIG_DIR_ENV: &str = "PUSHSYNC_CONFIG_DIR";
