//! Per-(member, rule) membership reconciliation.
//!
//! Compares desired role membership (status predicate) against actual
//! membership (the member's snapshot) and applies at most one
//! corrective mutation. The reconciler never fails: mutation errors
//! degrade to a no-op outcome carrying a diagnostic detail.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use rolesync_directory::{Directory, DirectoryError, Member};
use rolesync_store::Rule;

use crate::matcher::matches;
use crate::outcome::{ReconcileAction, ReconcileOutcome};

/// Wrap a directory call with the configured timeout, mapping an
/// elapsed deadline to [`DirectoryError::Timeout`].
pub(crate) async fn with_timeout<T, F>(timeout: Duration, fut: F) -> Result<T, DirectoryError>
where
    F: std::future::Future<Output = Result<T, DirectoryError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(DirectoryError::Timeout(timeout.as_millis() as u64)),
    }
}

/// Decides and applies role corrections for one (member, rule) pair.
pub struct Reconciler {
    directory: Arc<dyn Directory>,
    call_timeout: Duration,
}

impl Reconciler {
    pub fn new(directory: Arc<dyn Directory>, call_timeout: Duration) -> Self {
        Self {
            directory,
            call_timeout,
        }
    }

    /// Evaluate one member against one rule and converge membership.
    ///
    /// Decision table (desired = status predicate, actual = held role):
    /// grant on (true, false), revoke on (false, true), no-op otherwise.
    /// At most one mutation is issued per call; a failed mutation
    /// reports `ReconcileAction::None` with the failure in `detail`.
    pub async fn reconcile(&self, member: &Member, rule: &Rule) -> ReconcileOutcome {
        let desired = matches(member.custom_status(), &rule.target_substring);
        let actual = member.has_role(&rule.role_id);

        let (action, detail) = match (desired, actual) {
            (true, false) => self.apply_grant(member, rule).await,
            (false, true) => self.apply_revoke(member, rule).await,
            (true, true) => (
                ReconcileAction::None,
                format!(
                    "already correct: status matches \"{}\" and role held",
                    rule.target_substring
                ),
            ),
            (false, false) => (
                ReconcileAction::None,
                format!(
                    "already correct: status does not match \"{}\" and role absent",
                    rule.target_substring
                ),
            ),
        };

        ReconcileOutcome {
            member_id: member.id.clone(),
            rule_id: rule.id,
            had_attribute: desired,
            had_role: actual,
            action,
            detail,
        }
    }

    async fn apply_grant(&self, member: &Member, rule: &Rule) -> (ReconcileAction, String) {
        let result = with_timeout(
            self.call_timeout,
            self.directory
                .grant_role(&rule.tenant_id, &member.id, &rule.role_id),
        )
        .await;

        match result {
            Ok(()) => {
                debug!(
                    tenant = %rule.tenant_id,
                    member = %member.id,
                    role = %rule.role_id,
                    "role granted"
                );
                (
                    ReconcileAction::Grant,
                    format!(
                        "role granted: status matches \"{}\"",
                        rule.target_substring
                    ),
                )
            }
            Err(e) => {
                warn!(
                    tenant = %rule.tenant_id,
                    member = %member.id,
                    role = %rule.role_id,
                    error = %e,
                    "grant failed"
                );
                (ReconcileAction::None, format!("grant failed: {e}"))
            }
        }
    }

    async fn apply_revoke(&self, member: &Member, rule: &Rule) -> (ReconcileAction, String) {
        let result = with_timeout(
            self.call_timeout,
            self.directory
                .revoke_role(&rule.tenant_id, &member.id, &rule.role_id),
        )
        .await;

        match result {
            Ok(()) => {
                debug!(
                    tenant = %rule.tenant_id,
                    member = %member.id,
                    role = %rule.role_id,
                    "role revoked"
                );
                (
                    ReconcileAction::Revoke,
                    format!(
                        "role revoked: status no longer matches \"{}\"",
                        rule.target_substring
                    ),
                )
            }
            Err(e) => {
                warn!(
                    tenant = %rule.tenant_id,
                    member = %member.id,
                    role = %rule.role_id,
                    error = %e,
                    "revoke failed"
                );
                (ReconcileAction::None, format!("revoke failed: {e}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rolesync_directory::memory::FailureKind;
    use rolesync_directory::{InMemoryDirectory, Presence};
    use rolesync_store::RuleStats;

    fn rule(target: &str, role_id: &str) -> Rule {
        Rule {
            id: 1,
            tenant_id: "t1".to_string(),
            target_substring: target.to_string(),
            role_id: role_id.to_string(),
            check_interval_ms: 300_000,
            active: true,
            created_at: Utc::now(),
            last_checked_at: None,
            stats: RuleStats::default(),
        }
    }

    fn member(id: &str, status: Option<&str>, roles: &[&str]) -> Member {
        Member {
            id: id.to_string(),
            display_name: format!("Member {id}"),
            is_service: false,
            presence: match status {
                Some(text) => Presence::Present {
                    text: text.to_string(),
                },
                None => Presence::Absent,
            },
            role_ids: roles.iter().map(|r| r.to_string()).collect(),
        }
    }

    fn reconciler(dir: Arc<InMemoryDirectory>) -> Reconciler {
        Reconciler::new(dir, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn grants_when_status_matches_and_role_missing() {
        let dir = Arc::new(InMemoryDirectory::new());
        let m = member("m1", Some("AFK - back soon"), &[]);
        dir.upsert_member("t1", m.clone());

        let outcome = reconciler(dir.clone()).reconcile(&m, &rule("AFK", "r1")).await;

        assert_eq!(outcome.action, ReconcileAction::Grant);
        assert!(outcome.had_attribute);
        assert!(!outcome.had_role);
        assert_eq!(dir.grant_count(), 1);
    }

    #[tokio::test]
    async fn revokes_when_status_gone_and_role_held() {
        let dir = Arc::new(InMemoryDirectory::new());
        let m = member("m1", Some("Working"), &["r1"]);
        dir.upsert_member("t1", m.clone());

        let outcome = reconciler(dir.clone()).reconcile(&m, &rule("AFK", "r1")).await;

        assert_eq!(outcome.action, ReconcileAction::Revoke);
        assert!(!outcome.had_attribute);
        assert!(outcome.had_role);
        assert_eq!(dir.revoke_count(), 1);
    }

    #[tokio::test]
    async fn no_op_when_already_correct() {
        let dir = Arc::new(InMemoryDirectory::new());
        let holding = member("m1", Some("AFK"), &["r1"]);
        let absent = member("m2", None, &[]);
        dir.upsert_member("t1", holding.clone());
        dir.upsert_member("t1", absent.clone());
        let r = rule("AFK", "r1");
        let rec = reconciler(dir.clone());

        let outcome = rec.reconcile(&holding, &r).await;
        assert_eq!(outcome.action, ReconcileAction::None);
        assert!(outcome.had_attribute);
        assert!(outcome.had_role);

        let outcome = rec.reconcile(&absent, &r).await;
        assert_eq!(outcome.action, ReconcileAction::None);
        assert!(!outcome.had_attribute);
        assert!(!outcome.had_role);

        // Neither evaluation touched the directory.
        assert_eq!(dir.grant_count(), 0);
        assert_eq!(dir.revoke_count(), 0);
    }

    #[tokio::test]
    async fn second_call_after_grant_is_idempotent() {
        let dir = Arc::new(InMemoryDirectory::new());
        let m = member("m1", Some("AFK"), &[]);
        dir.upsert_member("t1", m.clone());
        let r = rule("AFK", "r1");
        let rec = reconciler(dir.clone());

        let first = rec.reconcile(&m, &r).await;
        assert_eq!(first.action, ReconcileAction::Grant);

        // Re-fetch the snapshot: the grant is now visible.
        let m = dir.fetch_member("t1", "m1").await.unwrap();
        let second = rec.reconcile(&m, &r).await;
        assert_eq!(second.action, ReconcileAction::None);
        assert!(second.had_attribute);
        assert!(second.had_role);
        assert_eq!(dir.grant_count(), 1);
    }

    #[tokio::test]
    async fn failed_grant_degrades_to_diagnostic_no_op() {
        let dir = Arc::new(InMemoryDirectory::new());
        let m = member("m1", Some("AFK"), &[]);
        dir.upsert_member("t1", m.clone());
        dir.set_mutation_failure(Some(FailureKind::Forbidden));

        let outcome = reconciler(dir.clone()).reconcile(&m, &rule("AFK", "r1")).await;

        assert_eq!(outcome.action, ReconcileAction::None);
        assert!(!outcome.role_changed());
        assert!(outcome.detail.contains("grant failed"));
        assert!(outcome.had_attribute);
    }

    #[tokio::test]
    async fn failed_revoke_degrades_to_diagnostic_no_op() {
        let dir = Arc::new(InMemoryDirectory::new());
        let m = member("m1", None, &["r1"]);
        dir.upsert_member("t1", m.clone());
        dir.set_mutation_failure(Some(FailureKind::RateLimited));

        let outcome = reconciler(dir.clone()).reconcile(&m, &rule("AFK", "r1")).await;

        assert_eq!(outcome.action, ReconcileAction::None);
        assert!(outcome.detail.contains("revoke failed"));
        // The member still holds the role.
        let m = dir.fetch_member("t1", "m1").await.unwrap();
        assert!(m.has_role("r1"));
    }
}
