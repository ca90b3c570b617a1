//! Persisted rule and tenant records.
//!
//! Two distinct "check" counters exist on purpose: `scans` counts full
//! rule scans (one per due pickup, regardless of member count) while
//! `member_checks` counts individual member evaluations. They answer
//! different questions and must not be conflated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-rule counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleStats {
    /// Full rule scans completed.
    pub scans: u64,
    /// Individual member evaluations performed.
    pub member_checks: u64,
    /// Successful role grants.
    pub grants: u64,
    /// Successful role revocations.
    pub revocations: u64,
}

/// A declarative membership rule: members whose status contains
/// `target_substring` should hold `role_id`; everyone else should not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    /// Globally unique, immutable, creation-timestamp-derived id.
    pub id: i64,
    pub tenant_id: String,
    pub target_substring: String,
    pub role_id: String,
    pub check_interval_ms: u64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub last_checked_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stats: RuleStats,
}

impl Rule {
    /// Whether the check interval has elapsed since the last scan.
    /// A never-scanned rule is due immediately.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_checked_at {
            None => true,
            Some(last) => {
                now.signed_duration_since(last)
                    >= chrono::Duration::milliseconds(self.check_interval_ms as i64)
            }
        }
    }
}

/// Per-tenant counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantStats {
    pub scans: u64,
    pub member_checks: u64,
    pub role_changes: u64,
    pub setups_completed: u64,
}

/// Tenant-level settings. Created lazily on first rule creation,
/// destroyed (with all the tenant's rules) on tenant reset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantSettings {
    pub tenant_id: String,
    /// Reconciliation only runs for the tenant while this is set.
    pub active: bool,
    /// Webhook URL receiving role-change notifications, if configured.
    pub log_webhook: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub stats: TenantStats,
}

/// Process-wide counters. Monotonic; never decremented outside an
/// explicit reset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalStats {
    pub total_checks: u64,
    pub role_changes: u64,
    pub setups_completed: u64,
}

/// A successfully applied role mutation, for statistics recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleChange {
    Granted,
    Revoked,
}

/// Fields required to create a rule. The id, timestamps, and counters
/// are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewRule {
    pub target_substring: String,
    pub role_id: String,
    pub check_interval_ms: u64,
}

/// Read-only per-tenant snapshot combining counters and rule counts.
#[derive(Debug, Clone, Serialize)]
pub struct TenantOverview {
    pub tenant_id: String,
    pub active: bool,
    pub total_rules: usize,
    pub active_rules: usize,
    pub stats: TenantStats,
}
