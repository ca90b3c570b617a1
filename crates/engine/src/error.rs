//! Engine error types.

use thiserror::Error;

/// Failures surfaced by the engine's fallible entry points (report
/// generation, single-member diagnostics). The scan loop itself never
/// returns these; per-member and per-rule failures degrade to outcome
/// diagnostics and log lines.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("directory error: {0}")]
    Directory(#[from] rolesync_directory::DirectoryError),

    #[error("store error: {0}")]
    Store(#[from] rolesync_store::StoreError),
}
