//! Notifier trait definition and shared event types.

use chrono::{DateTime, Utc};

/// Errors that can occur during notification delivery.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
}

/// Which direction a role membership changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleChangeKind {
    Granted,
    Revoked,
}

/// A successfully applied role change, ready for delivery.
///
/// Emitted once per successful grant/revoke; delivery is
/// fire-and-forget and failures never reach the reconciliation core.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RoleChangeEvent {
    pub tenant_id: String,
    pub member_id: String,
    pub member_name: String,
    pub role_id: String,
    pub rule_id: i64,
    pub target_substring: String,
    pub kind: RoleChangeKind,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

/// Trait for notification channel implementations.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a role-change event through this channel.
    async fn send(&self, event: &RoleChangeEvent) -> Result<(), NotifyError>;

    /// Human-readable name for this channel (e.g., "webhook").
    fn channel_name(&self) -> &str;
}

/// Result of dispatching an event to a single channel.
#[derive(Debug)]
pub struct DispatchResult {
    pub channel: String,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}
