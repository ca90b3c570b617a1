pub mod config;

pub use config::{Config, EngineConfig, IntervalBounds, StoreConfig};
