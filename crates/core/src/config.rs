use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub engine: EngineConfig,
    pub store: StoreConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    pub fn from_env() -> Self {
        Self {
            engine: EngineConfig::from_env(),
            store: StoreConfig::from_env(),
        }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!(
            "  engine:  tick={}ms, rule interval bounds=[{}ms, {}ms]",
            self.engine.tick_interval_ms,
            self.engine.min_check_interval_ms,
            self.engine.max_check_interval_ms,
        );
        tracing::info!(
            "  engine:  scan_concurrency={}, member_concurrency={}, directory_timeout={}ms",
            self.engine.scan_concurrency,
            self.engine.member_concurrency,
            self.engine.directory_timeout_ms,
        );
        tracing::info!("  store:   data_file={}", self.store.data_file.display());
    }
}

// ── Engine ────────────────────────────────────────────────────

/// Allowed range for a rule's check interval. Intervals outside the
/// range are clamped at rule creation time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IntervalBounds {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl IntervalBounds {
    pub fn clamp(&self, interval_ms: u64) -> u64 {
        interval_ms.clamp(self.min_ms, self.max_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Global scheduler tick period. Must stay at or below the minimum
    /// rule interval; a due rule is picked up at worst one tick late
    /// (bounded staleness, not a bug).
    pub tick_interval_ms: u64,
    /// Smallest accepted per-rule check interval.
    pub min_check_interval_ms: u64,
    /// Largest accepted per-rule check interval.
    pub max_check_interval_ms: u64,
    /// How many due rules may scan concurrently across tenants.
    pub scan_concurrency: usize,
    /// How many member evaluations may run concurrently within one rule
    /// scan. Kept small: each grant/revoke is a rate-limited external call.
    pub member_concurrency: usize,
    /// Timeout applied to every external directory call.
    pub directory_timeout_ms: u64,
}

impl EngineConfig {
    fn from_env() -> Self {
        Self {
            tick_interval_ms: env_u64("TICK_INTERVAL_MS", 10_000),
            min_check_interval_ms: env_u64("MIN_CHECK_INTERVAL_MS", 60_000),
            max_check_interval_ms: env_u64("MAX_CHECK_INTERVAL_MS", 86_400_000),
            scan_concurrency: env_usize("SCAN_CONCURRENCY", 4),
            member_concurrency: env_usize("MEMBER_CONCURRENCY", 2),
            directory_timeout_ms: env_u64("DIRECTORY_TIMEOUT_MS", 10_000),
        }
        .normalized()
    }

    /// Enforce internal consistency: the tick period may not exceed the
    /// minimum rule interval, and concurrency caps must be at least 1.
    pub fn normalized(mut self) -> Self {
        if self.min_check_interval_ms > self.max_check_interval_ms {
            tracing::warn!(
                min = self.min_check_interval_ms,
                max = self.max_check_interval_ms,
                "min rule interval exceeds max; swapping"
            );
            std::mem::swap(
                &mut self.min_check_interval_ms,
                &mut self.max_check_interval_ms,
            );
        }
        if self.tick_interval_ms > self.min_check_interval_ms {
            tracing::warn!(
                tick = self.tick_interval_ms,
                min_interval = self.min_check_interval_ms,
                "tick period exceeds minimum rule interval; clamping tick"
            );
            self.tick_interval_ms = self.min_check_interval_ms;
        }
        self.scan_concurrency = self.scan_concurrency.max(1);
        self.member_concurrency = self.member_concurrency.max(1);
        self
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn directory_timeout(&self) -> Duration {
        Duration::from_millis(self.directory_timeout_ms)
    }

    pub fn interval_bounds(&self) -> IntervalBounds {
        IntervalBounds {
            min_ms: self.min_check_interval_ms,
            max_ms: self.max_check_interval_ms,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 10_000,
            min_check_interval_ms: 60_000,
            max_check_interval_ms: 86_400_000,
            scan_concurrency: 4,
            member_concurrency: 2,
            directory_timeout_ms: 10_000,
        }
    }
}

// ── Store ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub data_file: PathBuf,
}

impl StoreConfig {
    fn from_env() -> Self {
        Self {
            data_file: PathBuf::from(env_or("DATA_FILE", "data/rolesync.json")),
        }
    }
}
