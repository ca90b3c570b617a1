//! Directory trait definition and member snapshot types.

use serde::{Deserialize, Serialize};

/// Errors surfaced by directory backends.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("timeout after {0}ms")]
    Timeout(u64),

    #[error("{0}")]
    Other(String),
}

impl DirectoryError {
    /// Whether the failure is expected to clear on its own (timeout,
    /// rate limit). Transient failures are retried on the next due
    /// scan, never within the same tick.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DirectoryError::RateLimited { .. } | DirectoryError::Timeout(_)
        )
    }
}

/// A member's observed dynamic status attribute.
///
/// Absent is a valid state (member has no custom status set), not an
/// error. The matcher treats it as a non-match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Presence {
    Present { text: String },
    Absent,
}

impl Presence {
    pub fn text(&self) -> Option<&str> {
        match self {
            Presence::Present { text } => Some(text),
            Presence::Absent => None,
        }
    }
}

/// Point-in-time snapshot of a tenant member as seen by the directory.
///
/// Presence and held roles are captured at roster-fetch time; the
/// engine evaluates against this snapshot rather than issuing one
/// directory read per attribute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub id: String,
    pub display_name: String,
    /// Service accounts (bots) are excluded from reconciliation.
    pub is_service: bool,
    pub presence: Presence,
    pub role_ids: Vec<String>,
}

impl Member {
    pub fn has_role(&self, role_id: &str) -> bool {
        self.role_ids.iter().any(|r| r == role_id)
    }

    /// The member's custom status text, if any.
    pub fn custom_status(&self) -> Option<&str> {
        self.presence.text()
    }
}

/// Trait for directory-service backends.
///
/// Implementations wrap a real membership directory (chat platform,
/// identity provider). Reads return member snapshots; mutations apply
/// a single role change and are atomic at the backend boundary.
#[async_trait::async_trait]
pub trait Directory: Send + Sync {
    /// Fetch the full membership roster for a tenant.
    async fn fetch_roster(&self, tenant_id: &str) -> Result<Vec<Member>, DirectoryError>;

    /// Fetch a single member snapshot.
    async fn fetch_member(
        &self,
        tenant_id: &str,
        member_id: &str,
    ) -> Result<Member, DirectoryError>;

    /// Grant a role to a member.
    async fn grant_role(
        &self,
        tenant_id: &str,
        member_id: &str,
        role_id: &str,
    ) -> Result<(), DirectoryError>;

    /// Revoke a role from a member.
    async fn revoke_role(
        &self,
        tenant_id: &str,
        member_id: &str,
        role_id: &str,
    ) -> Result<(), DirectoryError>;
}
