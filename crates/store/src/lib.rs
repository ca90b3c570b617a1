//! Durable rule, tenant, and statistics store.
//!
//! This crate provides:
//! - Rule and tenant settings schema with per-scope counters
//! - `JsonStore`, a lock-guarded JSON-file table with whole-write atomicity
//! - Due-rule queries driving the scan scheduler

pub mod error;
pub mod json;
pub mod schema;

pub use error::StoreError;
pub use json::JsonStore;
pub use schema::{
    GlobalStats, NewRule, RoleChange, Rule, RuleStats, TenantOverview, TenantSettings, TenantStats,
};
