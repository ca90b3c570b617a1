//! Notification delivery for role-change events.
//!
//! This crate provides:
//! - `Notifier` trait for pluggable notification channels
//! - Webhook notifier implementation
//! - Dispatcher that routes events to per-tenant channels

pub mod dispatcher;
pub mod traits;
pub mod webhook;

pub use dispatcher::Dispatcher;
pub use traits::{Notifier, NotifyError, RoleChangeEvent, RoleChangeKind};
pub use webhook::WebhookNotifier;
