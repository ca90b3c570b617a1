//! Routes role-change events to configured channels.
//!
//! The dispatcher receives an event and delivers it to all channels
//! configured for the owning tenant. Individual channel failures don't
//! block other channels, and the caller treats the whole dispatch as
//! fire-and-forget.

use std::collections::HashMap;

use crate::traits::{DispatchResult, Notifier, NotifyError, RoleChangeEvent};

/// Dispatches role-change events to multiple channels, organized per-tenant.
pub struct Dispatcher {
    /// Tenant ID → list of notifier channels for that tenant.
    tenant_channels: HashMap<String, Vec<Box<dyn Notifier>>>,
    /// Fallback channels used when no tenant-specific channels exist.
    default_channels: Vec<Box<dyn Notifier>>,
}

impl Dispatcher {
    /// Create a dispatcher with per-tenant channel mapping.
    pub fn new(tenant_channels: HashMap<String, Vec<Box<dyn Notifier>>>) -> Self {
        Self {
            tenant_channels,
            default_channels: Vec::new(),
        }
    }

    /// Create an empty dispatcher.
    pub fn empty() -> Self {
        Self {
            tenant_channels: HashMap::new(),
            default_channels: Vec::new(),
        }
    }

    /// Create a simple dispatcher with channels shared across all tenants.
    pub fn with_defaults(channels: Vec<Box<dyn Notifier>>) -> Self {
        Self {
            tenant_channels: HashMap::new(),
            default_channels: channels,
        }
    }

    /// Replace all channels for a specific tenant.
    pub fn set_tenant_channels(&mut self, tenant_id: String, channels: Vec<Box<dyn Notifier>>) {
        self.tenant_channels.insert(tenant_id, channels);
    }

    /// Remove channels for a tenant (e.g., on tenant reset).
    pub fn remove_tenant(&mut self, tenant_id: &str) {
        self.tenant_channels.remove(tenant_id);
    }

    /// Dispatch an event to all channels of its tenant.
    ///
    /// Returns results for each channel delivery. Individual failures
    /// don't block other channels.
    pub async fn dispatch(&self, event: &RoleChangeEvent) -> Vec<DispatchResult> {
        let channels = self
            .tenant_channels
            .get(&event.tenant_id)
            .unwrap_or(&self.default_channels);

        if channels.is_empty() {
            tracing::debug!(tenant = %event.tenant_id, "no notification channels configured");
            return Vec::new();
        }

        let mut results = Vec::with_capacity(channels.len());

        for channel in channels {
            let start = std::time::Instant::now();
            let result = channel.send(event).await;
            let duration_ms = start.elapsed().as_millis() as u64;

            let (success, error) = match result {
                Ok(()) => {
                    tracing::info!(
                        tenant = %event.tenant_id,
                        channel = channel.channel_name(),
                        rule_id = event.rule_id,
                        duration_ms,
                        "notification delivered"
                    );
                    (true, None)
                }
                Err(e) => {
                    tracing::warn!(
                        tenant = %event.tenant_id,
                        channel = channel.channel_name(),
                        error = %e,
                        duration_ms,
                        "notification delivery failed"
                    );
                    (false, Some(e.to_string()))
                }
            };

            results.push(DispatchResult {
                channel: channel.channel_name().to_string(),
                success,
                error,
                duration_ms,
            });
        }

        results
    }

    /// Send a test event to a tenant's channel by index.
    pub async fn test_notify(
        &self,
        tenant_id: &str,
        channel_index: usize,
    ) -> Result<(), NotifyError> {
        let channels = self
            .tenant_channels
            .get(tenant_id)
            .ok_or_else(|| NotifyError::Config(format!("no channels for tenant '{tenant_id}'")))?;

        let channel = channels.get(channel_index).ok_or_else(|| {
            NotifyError::Config(format!("channel index {channel_index} out of range"))
        })?;

        let event = RoleChangeEvent {
            tenant_id: tenant_id.to_string(),
            member_id: "test-member".to_string(),
            member_name: "Test Member".to_string(),
            role_id: "test-role".to_string(),
            rule_id: 0,
            target_substring: "test".to_string(),
            kind: crate::traits::RoleChangeKind::Granted,
            detail: "test notification".to_string(),
            timestamp: chrono::Utc::now(),
        };
        channel.send(&event).await
    }
}
