//! Read-only tenant status reports.
//!
//! Reports are built from a roster snapshot and the pure matcher; they
//! never mutate membership and never touch the counters.

use serde::Serialize;

use rolesync_directory::Member;
use rolesync_store::{Rule, TenantOverview, TenantStats};

use crate::matcher::matches;

/// Per-rule convergence tally.
#[derive(Debug, Clone, Serialize)]
pub struct RuleReport {
    pub rule_id: i64,
    pub target_substring: String,
    pub role_id: String,
    pub members_with_role: usize,
    pub members_with_status: usize,
    /// Members whose role membership already matches their status.
    pub members_correct: usize,
    pub members_need_grant: usize,
    pub members_need_revoke: usize,
}

/// Aggregate snapshot of a tenant's rules and convergence state.
#[derive(Debug, Clone, Serialize)]
pub struct TenantReport {
    pub tenant_id: String,
    pub active: bool,
    pub member_count: usize,
    pub total_rules: usize,
    pub active_rules: usize,
    pub stats: TenantStats,
    pub rules: Vec<RuleReport>,
}

/// Build a tenant report from a roster snapshot.
///
/// Only active rules are tallied; service members are excluded, the
/// same way the scan loop excludes them.
pub fn build(overview: TenantOverview, rules: &[Rule], roster: &[Member]) -> TenantReport {
    let members: Vec<&Member> = roster.iter().filter(|m| !m.is_service).collect();

    let rule_reports: Vec<RuleReport> = rules
        .iter()
        .filter(|rule| rule.active)
        .map(|rule| {
            let mut report = RuleReport {
                rule_id: rule.id,
                target_substring: rule.target_substring.clone(),
                role_id: rule.role_id.clone(),
                members_with_role: 0,
                members_with_status: 0,
                members_correct: 0,
                members_need_grant: 0,
                members_need_revoke: 0,
            };

            for member in &members {
                let has_role = member.has_role(&rule.role_id);
                let has_status = matches(member.custom_status(), &rule.target_substring);

                if has_role {
                    report.members_with_role += 1;
                }
                if has_status {
                    report.members_with_status += 1;
                }
                match (has_status, has_role) {
                    (true, true) | (false, false) => report.members_correct += 1,
                    (true, false) => report.members_need_grant += 1,
                    (false, true) => report.members_need_revoke += 1,
                }
            }

            report
        })
        .collect();

    TenantReport {
        tenant_id: overview.tenant_id,
        active: overview.active,
        member_count: members.len(),
        total_rules: overview.total_rules,
        active_rules: overview.active_rules,
        stats: overview.stats,
        rules: rule_reports,
    }
}
