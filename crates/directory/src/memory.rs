//! In-memory directory backend.
//!
//! Holds tenant rosters in a `std::sync::RwLock`-guarded map so it can
//! be driven from tests and local runs. Supports injecting failures on
//! reads and mutations to exercise the engine's degradation paths.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use crate::traits::{Directory, DirectoryError, Member, Presence};

/// Failure to inject on the next matching calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    NotFound,
    Forbidden,
    RateLimited,
    Timeout,
}

impl FailureKind {
    fn to_error(self, context: &str) -> DirectoryError {
        match self {
            FailureKind::NotFound => DirectoryError::NotFound(context.to_string()),
            FailureKind::Forbidden => DirectoryError::Forbidden(context.to_string()),
            FailureKind::RateLimited => DirectoryError::RateLimited {
                retry_after_secs: 30,
            },
            FailureKind::Timeout => DirectoryError::Timeout(10_000),
        }
    }
}

/// In-memory [`Directory`] implementation.
///
/// Mutations are applied to the stored members, so a snapshot fetched
/// after a grant reflects the new role set. Call counters allow tests
/// to assert how often the engine reached out.
#[derive(Default)]
pub struct InMemoryDirectory {
    rosters: RwLock<HashMap<String, BTreeMap<String, Member>>>,
    roster_failure: RwLock<Option<FailureKind>>,
    mutation_failure: RwLock<Option<FailureKind>>,
    roster_fetches: AtomicU64,
    member_fetches: AtomicU64,
    grants: AtomicU64,
    revokes: AtomicU64,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a member in a tenant's roster.
    pub fn upsert_member(&self, tenant_id: &str, member: Member) {
        let mut rosters = self.rosters.write().expect("roster lock poisoned");
        rosters
            .entry(tenant_id.to_string())
            .or_default()
            .insert(member.id.clone(), member);
    }

    /// Update a member's presence in place. No-op if the member is unknown.
    pub fn set_presence(&self, tenant_id: &str, member_id: &str, presence: Presence) {
        let mut rosters = self.rosters.write().expect("roster lock poisoned");
        if let Some(member) = rosters
            .get_mut(tenant_id)
            .and_then(|roster| roster.get_mut(member_id))
        {
            member.presence = presence;
        }
    }

    /// Make every subsequent roster/member fetch fail with the given kind.
    pub fn set_roster_failure(&self, kind: Option<FailureKind>) {
        *self.roster_failure.write().expect("failure lock poisoned") = kind;
    }

    /// Make every subsequent grant/revoke fail with the given kind.
    pub fn set_mutation_failure(&self, kind: Option<FailureKind>) {
        *self.mutation_failure.write().expect("failure lock poisoned") = kind;
    }

    pub fn roster_fetch_count(&self) -> u64 {
        self.roster_fetches.load(Ordering::Relaxed)
    }

    pub fn grant_count(&self) -> u64 {
        self.grants.load(Ordering::Relaxed)
    }

    pub fn revoke_count(&self) -> u64 {
        self.revokes.load(Ordering::Relaxed)
    }

    fn check_failure(
        &self,
        slot: &RwLock<Option<FailureKind>>,
        context: &str,
    ) -> Result<(), DirectoryError> {
        if let Some(kind) = *slot.read().expect("failure lock poisoned") {
            return Err(kind.to_error(context));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Directory for InMemoryDirectory {
    async fn fetch_roster(&self, tenant_id: &str) -> Result<Vec<Member>, DirectoryError> {
        self.roster_fetches.fetch_add(1, Ordering::Relaxed);
        self.check_failure(&self.roster_failure, tenant_id)?;

        let rosters = self.rosters.read().expect("roster lock poisoned");
        let roster = rosters
            .get(tenant_id)
            .ok_or_else(|| DirectoryError::NotFound(format!("tenant {tenant_id}")))?;
        Ok(roster.values().cloned().collect())
    }

    async fn fetch_member(
        &self,
        tenant_id: &str,
        member_id: &str,
    ) -> Result<Member, DirectoryError> {
        self.member_fetches.fetch_add(1, Ordering::Relaxed);
        self.check_failure(&self.roster_failure, member_id)?;

        let rosters = self.rosters.read().expect("roster lock poisoned");
        rosters
            .get(tenant_id)
            .and_then(|roster| roster.get(member_id))
            .cloned()
            .ok_or_else(|| DirectoryError::NotFound(format!("member {member_id}")))
    }

    async fn grant_role(
        &self,
        tenant_id: &str,
        member_id: &str,
        role_id: &str,
    ) -> Result<(), DirectoryError> {
        self.check_failure(&self.mutation_failure, role_id)?;

        let mut rosters = self.rosters.write().expect("roster lock poisoned");
        let member = rosters
            .get_mut(tenant_id)
            .and_then(|roster| roster.get_mut(member_id))
            .ok_or_else(|| DirectoryError::NotFound(format!("member {member_id}")))?;
        if !member.has_role(role_id) {
            member.role_ids.push(role_id.to_string());
        }
        self.grants.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(tenant = tenant_id, member = member_id, role = role_id, "role granted");
        Ok(())
    }

    async fn revoke_role(
        &self,
        tenant_id: &str,
        member_id: &str,
        role_id: &str,
    ) -> Result<(), DirectoryError> {
        self.check_failure(&self.mutation_failure, role_id)?;

        let mut rosters = self.rosters.write().expect("roster lock poisoned");
        let member = rosters
            .get_mut(tenant_id)
            .and_then(|roster| roster.get_mut(member_id))
            .ok_or_else(|| DirectoryError::NotFound(format!("member {member_id}")))?;
        member.role_ids.retain(|r| r != role_id);
        self.revokes.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(tenant = tenant_id, member = member_id, role = role_id, "role revoked");
        Ok(())
    }
}
