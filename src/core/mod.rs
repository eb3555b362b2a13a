// Core Module - Foundational types, config, logging, events

pub mod config;
pub mod events;
pub mod logger;
pub mod types;

// Re-export commonly used items for convenience
pub use config::{
    AnalysisConfig, ConfigError, ConfigManager, ConfigSummary, FeedConfig, MemoryConfig,
    MonitoringConfig, get_config,
};
pub use events::{Event, EventBus, EventBusStatsSnapshot, EventPriority, get_event_bus};
pub use logger::setup_logging;
pub use types::*;
