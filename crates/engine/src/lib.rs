//! Periodic rule-reconciliation engine.
//!
//! This crate provides:
//! - Case-insensitive status matcher (the rule predicate)
//! - Per-(member, rule) membership reconciler with at-most-one mutation
//! - Tick-driven scan scheduler with per-rule mutual exclusion
//! - Statistics aggregation over reconciliation outcomes
//! - Read-only tenant reports and on-demand member diagnostics

pub mod error;
pub mod matcher;
pub mod outcome;
pub mod reconciler;
pub mod report;
pub mod scheduler;
pub mod stats;

pub use error::EngineError;
pub use matcher::matches;
pub use outcome::{ReconcileAction, ReconcileOutcome};
pub use reconciler::Reconciler;
pub use report::{RuleReport, TenantReport};
pub use scheduler::ScanScheduler;
pub use stats::StatisticsAggregator;
