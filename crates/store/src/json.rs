//! JSON-file-backed store.
//!
//! All records live in one small JSON document guarded by a
//! `std::sync::RwLock`. Every mutation is a read-modify-write under the
//! write lock followed by a whole-file replace (temp file + rename), so
//! concurrent scans of different rules cannot lose counter updates and
//! a crash mid-write leaves the previous document intact.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use rolesync_core::IntervalBounds;

use crate::error::StoreError;
use crate::schema::{
    GlobalStats, NewRule, RoleChange, Rule, RuleStats, TenantOverview, TenantSettings, TenantStats,
};

#[derive(Debug, Default, Serialize, Deserialize)]
struct Data {
    #[serde(default)]
    tenants: BTreeMap<String, TenantSettings>,
    #[serde(default)]
    rules: BTreeMap<i64, Rule>,
    #[serde(default)]
    stats: GlobalStats,
}

/// Lock-guarded JSON-file table of rules, tenants, and counters.
pub struct JsonStore {
    path: PathBuf,
    bounds: IntervalBounds,
    inner: RwLock<Data>,
}

impl JsonStore {
    /// Open the store at `path`, creating an empty document (and parent
    /// directories) if none exists. `bounds` is applied to rule check
    /// intervals at creation time.
    pub fn open(path: impl Into<PathBuf>, bounds: IntervalBounds) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let data = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            serde_json::from_str(&raw)?
        } else {
            Data::default()
        };

        info!(
            path = %path.display(),
            rules = data.rules.len(),
            tenants = data.tenants.len(),
            "store opened"
        );

        Ok(Self {
            path,
            bounds,
            inner: RwLock::new(data),
        })
    }

    /// Replace the on-disk document. Writes to a sibling temp file and
    /// renames over the target so readers never observe a torn write.
    fn persist(path: &Path, data: &Data) -> Result<(), StoreError> {
        let tmp = path.with_extension("json.tmp");
        let raw = serde_json::to_vec_pretty(data)?;
        fs::write(&tmp, raw)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    fn ensure_tenant<'a>(data: &'a mut Data, tenant_id: &str) -> &'a mut TenantSettings {
        data.tenants
            .entry(tenant_id.to_string())
            .or_insert_with(|| TenantSettings {
                tenant_id: tenant_id.to_string(),
                active: true,
                log_webhook: None,
                created_at: Utc::now(),
                stats: TenantStats::default(),
            })
    }

    // ── Rules ───────────────────────────────────────────────────────

    /// Create a rule for a tenant. Tenant settings are created lazily
    /// on first rule creation; the `setups_completed` counters bump at
    /// tenant and global scope.
    ///
    /// Rule ids are millisecond creation timestamps, bumped past any
    /// collision under the write lock, so they stay globally unique and
    /// monotonic.
    pub fn create_rule(&self, tenant_id: &str, new: NewRule) -> Result<Rule, StoreError> {
        if new.target_substring.trim().is_empty() {
            return Err(StoreError::InvalidRule("empty target substring".into()));
        }
        if new.role_id.trim().is_empty() {
            return Err(StoreError::InvalidRule("empty role id".into()));
        }

        let mut data = self.inner.write().expect("store lock poisoned");

        let interval = self.bounds.clamp(new.check_interval_ms);
        if interval != new.check_interval_ms {
            warn!(
                tenant = tenant_id,
                requested = new.check_interval_ms,
                clamped = interval,
                "check interval outside configured bounds; clamped"
            );
        }

        let now = Utc::now();
        let mut id = now.timestamp_millis();
        while data.rules.contains_key(&id) {
            id += 1;
        }

        let rule = Rule {
            id,
            tenant_id: tenant_id.to_string(),
            target_substring: new.target_substring,
            role_id: new.role_id,
            check_interval_ms: interval,
            active: true,
            created_at: now,
            last_checked_at: None,
            stats: RuleStats::default(),
        };

        data.rules.insert(id, rule.clone());
        Self::ensure_tenant(&mut data, tenant_id).stats.setups_completed += 1;
        data.stats.setups_completed += 1;

        Self::persist(&self.path, &data)?;
        info!(tenant = tenant_id, rule_id = id, role = %rule.role_id, "rule created");
        Ok(rule)
    }

    pub fn rule(&self, id: i64) -> Result<Rule, StoreError> {
        let data = self.inner.read().expect("store lock poisoned");
        data.rules.get(&id).cloned().ok_or(StoreError::RuleNotFound(id))
    }

    /// All rules owned by a tenant, in id (creation) order.
    pub fn tenant_rules(&self, tenant_id: &str) -> Vec<Rule> {
        let data = self.inner.read().expect("store lock poisoned");
        data.rules
            .values()
            .filter(|r| r.tenant_id == tenant_id)
            .cloned()
            .collect()
    }

    /// Rules due for a scan at `now`: check interval elapsed, rule
    /// active, and owning tenant active.
    pub fn due_rules(&self, now: DateTime<Utc>) -> Vec<Rule> {
        let data = self.inner.read().expect("store lock poisoned");
        data.rules
            .values()
            .filter(|r| r.active)
            .filter(|r| {
                data.tenants
                    .get(&r.tenant_id)
                    .map(|t| t.active)
                    .unwrap_or(false)
            })
            .filter(|r| r.is_due(now))
            .cloned()
            .collect()
    }

    /// Delete a rule. The tenant must own it.
    pub fn delete_rule(&self, tenant_id: &str, rule_id: i64) -> Result<(), StoreError> {
        let mut data = self.inner.write().expect("store lock poisoned");
        let owned = data
            .rules
            .get(&rule_id)
            .map(|r| r.tenant_id == tenant_id)
            .unwrap_or(false);
        if !owned {
            return Err(StoreError::RuleNotFound(rule_id));
        }
        data.rules.remove(&rule_id);
        Self::persist(&self.path, &data)?;
        info!(tenant = tenant_id, rule_id, "rule deleted");
        Ok(())
    }

    pub fn set_rule_active(&self, rule_id: i64, active: bool) -> Result<(), StoreError> {
        let mut data = self.inner.write().expect("store lock poisoned");
        let rule = data
            .rules
            .get_mut(&rule_id)
            .ok_or(StoreError::RuleNotFound(rule_id))?;
        rule.active = active;
        Self::persist(&self.path, &data)?;
        Ok(())
    }

    // ── Tenants ─────────────────────────────────────────────────────

    pub fn tenant_settings(&self, tenant_id: &str) -> Option<TenantSettings> {
        let data = self.inner.read().expect("store lock poisoned");
        data.tenants.get(tenant_id).cloned()
    }

    /// All known tenants.
    pub fn tenants(&self) -> Vec<TenantSettings> {
        let data = self.inner.read().expect("store lock poisoned");
        data.tenants.values().cloned().collect()
    }

    /// Enable or disable reconciliation for a tenant. Settings are
    /// created on first use.
    pub fn set_tenant_active(&self, tenant_id: &str, active: bool) -> Result<(), StoreError> {
        let mut data = self.inner.write().expect("store lock poisoned");
        Self::ensure_tenant(&mut data, tenant_id).active = active;
        Self::persist(&self.path, &data)?;
        Ok(())
    }

    /// Configure (or clear) the tenant's role-change webhook.
    pub fn set_log_webhook(
        &self,
        tenant_id: &str,
        webhook: Option<String>,
    ) -> Result<(), StoreError> {
        let mut data = self.inner.write().expect("store lock poisoned");
        Self::ensure_tenant(&mut data, tenant_id).log_webhook = webhook;
        Self::persist(&self.path, &data)?;
        Ok(())
    }

    /// Remove a tenant's settings and cascade-delete all of its rules.
    pub fn reset_tenant(&self, tenant_id: &str) -> Result<(), StoreError> {
        let mut data = self.inner.write().expect("store lock poisoned");
        let removed_settings = data.tenants.remove(tenant_id).is_some();
        let before = data.rules.len();
        data.rules.retain(|_, r| r.tenant_id != tenant_id);
        let removed_rules = before - data.rules.len();

        Self::persist(&self.path, &data)?;
        info!(tenant = tenant_id, removed_rules, removed_settings, "tenant reset");
        Ok(())
    }

    // ── Statistics ──────────────────────────────────────────────────

    /// Record a completed rule scan: set `last_checked_at` and bump the
    /// per-scan counters at rule and tenant scope. Called once per due
    /// pickup regardless of how many members were evaluated, including
    /// scans that failed partway.
    pub fn record_scan(&self, rule_id: i64, now: DateTime<Utc>) -> Result<(), StoreError> {
        let mut data = self.inner.write().expect("store lock poisoned");
        let rule = data
            .rules
            .get_mut(&rule_id)
            .ok_or(StoreError::RuleNotFound(rule_id))?;
        rule.last_checked_at = Some(now);
        rule.stats.scans += 1;
        let tenant_id = rule.tenant_id.clone();
        Self::ensure_tenant(&mut data, &tenant_id).stats.scans += 1;

        Self::persist(&self.path, &data)?;
        debug!(rule_id, "scan recorded");
        Ok(())
    }

    /// Record one member evaluation: bump the member-check counters at
    /// rule, tenant, and global scope, plus the grant/revoke counters
    /// when a mutation was successfully applied.
    pub fn record_evaluation(
        &self,
        rule_id: i64,
        change: Option<RoleChange>,
    ) -> Result<(), StoreError> {
        let mut data = self.inner.write().expect("store lock poisoned");
        let rule = data
            .rules
            .get_mut(&rule_id)
            .ok_or(StoreError::RuleNotFound(rule_id))?;
        rule.stats.member_checks += 1;
        match change {
            Some(RoleChange::Granted) => rule.stats.grants += 1,
            Some(RoleChange::Revoked) => rule.stats.revocations += 1,
            None => {}
        }
        let tenant_id = rule.tenant_id.clone();

        let tenant = Self::ensure_tenant(&mut data, &tenant_id);
        tenant.stats.member_checks += 1;
        if change.is_some() {
            tenant.stats.role_changes += 1;
        }

        data.stats.total_checks += 1;
        if change.is_some() {
            data.stats.role_changes += 1;
        }

        Self::persist(&self.path, &data)?;
        Ok(())
    }

    pub fn global_stats(&self) -> GlobalStats {
        let data = self.inner.read().expect("store lock poisoned");
        data.stats.clone()
    }

    /// Per-tenant snapshot. Unknown tenants yield an inactive overview
    /// with zeroed counters.
    pub fn tenant_overview(&self, tenant_id: &str) -> TenantOverview {
        let data = self.inner.read().expect("store lock poisoned");
        let settings = data.tenants.get(tenant_id);
        let rules: Vec<&Rule> = data
            .rules
            .values()
            .filter(|r| r.tenant_id == tenant_id)
            .collect();

        TenantOverview {
            tenant_id: tenant_id.to_string(),
            active: settings.map(|t| t.active).unwrap_or(false),
            total_rules: rules.len(),
            active_rules: rules.iter().filter(|r| r.active).count(),
            stats: settings.map(|t| t.stats.clone()).unwrap_or_default(),
        }
    }
}
