//! Statistics aggregation over reconciliation outcomes.

use std::sync::Arc;

use rolesync_store::{GlobalStats, JsonStore, RoleChange, StoreError, TenantOverview};

use crate::outcome::{ReconcileAction, ReconcileOutcome};

/// Folds reconciliation outcomes into the persisted counters.
///
/// Every recorded outcome bumps the member-check counters at rule,
/// tenant, and global scope; grant/revoke counters move only when the
/// outcome reports a successfully applied mutation. The store performs
/// each update as one atomic read-modify-write, so concurrent scans of
/// different rules cannot lose increments.
pub struct StatisticsAggregator {
    store: Arc<JsonStore>,
}

impl StatisticsAggregator {
    pub fn new(store: Arc<JsonStore>) -> Self {
        Self { store }
    }

    /// Record one completed member evaluation.
    pub fn record(&self, outcome: &ReconcileOutcome) -> Result<(), StoreError> {
        let change = match outcome.action {
            ReconcileAction::Grant => Some(RoleChange::Granted),
            ReconcileAction::Revoke => Some(RoleChange::Revoked),
            ReconcileAction::None => None,
        };
        self.store.record_evaluation(outcome.rule_id, change)
    }

    /// Process-wide counter snapshot.
    pub fn global(&self) -> GlobalStats {
        self.store.global_stats()
    }

    /// Per-tenant counter snapshot with rule counts.
    pub fn tenant(&self, tenant_id: &str) -> TenantOverview {
        self.store.tenant_overview(tenant_id)
    }
}
