// Configuration Management for TrendLens
// JSON file per section, env overrides for secrets, global singleton

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tracing::{info, warn};

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

// ============================================================================
// Configuration Structures
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Instrument symbol on the primary feed, e.g. "BTCUSDT".
    pub symbol: String,
    /// Instrument id on the secondary feed, e.g. "BTC-USD".
    pub secondary_product_id: String,
    pub primary_ws_url: String,
    pub secondary_ws_url: String,

    /// Candle aggregation interval.
    pub interval_ms: i64,
    /// Maximum retained candles (window bound W).
    pub candle_window: usize,
    /// How long to wait for the primary open handshake before falling over.
    pub fallback_timeout_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            symbol: "BTCUSDT".to_string(),
            secondary_product_id: "BTC-USD".to_string(),
            primary_ws_url: "wss://stream.binance.com:9443/ws".to_string(),
            secondary_ws_url: "wss://ws-feed.exchange.coinbase.com".to_string(),
            interval_ms: 60_000,
            candle_window: 120,
            fallback_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Fixed cadence between scheduled analysis cycles.
    pub interval_secs: u64,
    /// Minimum candle history before the one-shot startup cycle fires.
    pub min_history: usize,
    /// How many recent candles go into the trend digest.
    pub digest_candles: usize,
    /// How many recent lessons go into the prompt context.
    pub memory_context_entries: usize,
    /// Lessons shorter than this are considered degenerate and dropped.
    pub min_lesson_chars: usize,
    /// News items retained for display.
    pub max_news_items: usize,

    // Analyst endpoint (chat-completions shaped)
    pub analyst_endpoint: String,
    pub analyst_model: String,
    pub analyst_api_key: String,
    pub news_endpoint: String,
    pub request_timeout_secs: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            min_history: 10,
            digest_candles: 15,
            memory_context_entries: 3,
            min_lesson_chars: 12,
            max_news_items: 5,
            analyst_endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            analyst_model: "gpt-4o-mini".to_string(),
            analyst_api_key: String::new(),
            news_endpoint: "https://newsdata.example.com/v1/hotspots".to_string(),
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// File holding the durable lesson list (JSON array of strings).
    pub path: String,
    /// Maximum retained lessons (bound M).
    pub capacity: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            path: "data/lessons.json".to_string(),
            capacity: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub log_level: String,
    pub json_logs: bool,
    pub console_output: bool,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: "INFO".to_string(),
            json_logs: false,
            console_output: true,
        }
    }
}

// ============================================================================
// Configuration Summary
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ConfigSummary {
    pub symbol: String,
    pub interval_ms: i64,
    pub candle_window: usize,
    pub analysis_interval_secs: u64,
    pub memory_capacity: usize,
    pub log_level: String,
}

// ============================================================================
// Configuration Manager
// ============================================================================

pub struct ConfigManager {
    feed: Arc<RwLock<FeedConfig>>,
    analysis: Arc<RwLock<AnalysisConfig>>,
    memory: Arc<RwLock<MemoryConfig>>,
    monitoring: Arc<RwLock<MonitoringConfig>>,
}

impl ConfigManager {
    pub fn new(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut manager = Self {
            feed: Arc::new(RwLock::new(FeedConfig::default())),
            analysis: Arc::new(RwLock::new(AnalysisConfig::default())),
            memory: Arc::new(RwLock::new(MemoryConfig::default())),
            monitoring: Arc::new(RwLock::new(MonitoringConfig::default())),
        };

        if let Some(path) = config_path {
            manager.load_from_file(path)?;
        }

        manager.load_from_env();

        info!("Configuration initialized");
        Ok(manager)
    }

    /// Load configuration from a JSON file keyed by section name.
    pub fn load_from_file(&mut self, config_path: &str) -> Result<(), ConfigError> {
        let path = Path::new(config_path);
        if !path.exists() {
            warn!(path = config_path, "Config file not found");
            return Ok(());
        }

        let content = fs::read_to_string(path)?;
        let config_data: HashMap<String, serde_json::Value> = serde_json::from_str(&content)?;

        if let Some(feed_data) = config_data.get("feed") {
            if let Ok(feed) = serde_json::from_value::<FeedConfig>(feed_data.clone()) {
                *self.feed.write() = feed;
            }
        }

        if let Some(analysis_data) = config_data.get("analysis") {
            if let Ok(analysis) = serde_json::from_value::<AnalysisConfig>(analysis_data.clone()) {
                *self.analysis.write() = analysis;
            }
        }

        if let Some(memory_data) = config_data.get("memory") {
            if let Ok(memory) = serde_json::from_value::<MemoryConfig>(memory_data.clone()) {
                *self.memory.write() = memory;
            }
        }

        if let Some(monitoring_data) = config_data.get("monitoring") {
            if let Ok(monitoring) =
                serde_json::from_value::<MonitoringConfig>(monitoring_data.clone())
            {
                *self.monitoring.write() = monitoring;
            }
        }

        info!(path = config_path, "Configuration loaded");
        Ok(())
    }

    /// Load sensitive data from environment variables.
    pub fn load_from_env(&mut self) {
        if let Ok(api_key) = std::env::var("TRENDLENS_ANALYST_API_KEY") {
            self.analysis.write().analyst_api_key = api_key;
        }
        if let Ok(endpoint) = std::env::var("TRENDLENS_ANALYST_ENDPOINT") {
            self.analysis.write().analyst_endpoint = endpoint;
        }
        if let Ok(symbol) = std::env::var("TRENDLENS_SYMBOL") {
            self.feed.write().symbol = symbol;
        }
    }

    /// Save configuration to a JSON file (excludes the API key).
    pub fn save_to_file(&self, config_path: &str) -> Result<(), ConfigError> {
        let feed = self.feed.read();
        let memory = self.memory.read();
        let monitoring = self.monitoring.read();

        let mut analysis = self.analysis.read().clone();
        analysis.analyst_api_key = String::new();

        let mut config_map = HashMap::new();
        config_map.insert("feed", serde_json::to_value(&*feed)?);
        config_map.insert("analysis", serde_json::to_value(&analysis)?);
        config_map.insert("memory", serde_json::to_value(&*memory)?);
        config_map.insert("monitoring", serde_json::to_value(&*monitoring)?);

        if let Some(parent) = Path::new(config_path).parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(&config_map)?;
        fs::write(config_path, json)?;

        info!(path = config_path, "Configuration saved");
        Ok(())
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<bool, ConfigError> {
        let mut errors = Vec::new();
        let feed = self.feed.read();
        let analysis = self.analysis.read();
        let memory = self.memory.read();

        if feed.interval_ms <= 0 {
            errors.push("interval_ms must be positive".to_string());
        }
        if feed.candle_window == 0 {
            errors.push("candle_window must be at least 1".to_string());
        }
        if analysis.min_history > feed.candle_window {
            errors.push("min_history cannot exceed candle_window".to_string());
        }
        if analysis.digest_candles == 0 {
            errors.push("digest_candles must be at least 1".to_string());
        }
        if memory.capacity == 0 {
            errors.push("memory capacity must be at least 1".to_string());
        }
        if analysis.analyst_api_key.is_empty() {
            errors.push("analyst API key is not set".to_string());
        }

        if !errors.is_empty() {
            for error in &errors {
                warn!(error = %error, "Config validation error");
            }
            return Ok(false);
        }

        info!("Configuration validated successfully");
        Ok(true)
    }

    /// Get configuration summary.
    pub fn get_summary(&self) -> ConfigSummary {
        let feed = self.feed.read();
        let analysis = self.analysis.read();
        let memory = self.memory.read();
        let monitoring = self.monitoring.read();

        ConfigSummary {
            symbol: feed.symbol.clone(),
            interval_ms: feed.interval_ms,
            candle_window: feed.candle_window,
            analysis_interval_secs: analysis.interval_secs,
            memory_capacity: memory.capacity,
            log_level: monitoring.log_level.clone(),
        }
    }

    // Getters for each config section

    pub fn feed(&self) -> FeedConfig {
        self.feed.read().clone()
    }

    pub fn analysis(&self) -> AnalysisConfig {
        self.analysis.read().clone()
    }

    pub fn memory(&self) -> MemoryConfig {
        self.memory.read().clone()
    }

    pub fn monitoring(&self) -> MonitoringConfig {
        self.monitoring.read().clone()
    }
}

// Global config instance (thread-safe singleton)
static GLOBAL_CONFIG: OnceLock<Arc<RwLock<ConfigManager>>> = OnceLock::new();

/// Get global configuration instance (singleton).
pub fn get_config() -> Arc<RwLock<ConfigManager>> {
    Arc::clone(GLOBAL_CONFIG.get_or_init(|| {
        Arc::new(RwLock::new(
            ConfigManager::new(None).expect("Failed to create default config"),
        ))
    }))
}
