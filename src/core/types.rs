// Core Type Definitions for TrendLens
// Domain types shared across all layers

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

// ============================================================================
// Enums
// ============================================================================

/// Directional annotation applied to a candle by the analysis cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    Bullish,
    Bearish,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Outcome classification of one analysis run.
/// Decided exactly once, at the collaborator boundary; downstream code
/// matches on the variant and never re-derives it from text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sentiment {
    Bullish,
    Bearish,
    Neutral,
    Degraded,
}

impl Sentiment {
    /// Classify a free-text sentiment field by keyword match.
    /// This is the single translation point from collaborator text to the
    /// tagged variant; ambiguous or unrecognized text maps to Neutral.
    pub fn classify(text: &str) -> Self {
        let lower = text.to_lowercase();
        let bullish = lower.contains("bullish");
        let bearish = lower.contains("bearish");
        match (bullish, bearish) {
            (true, false) => Sentiment::Bullish,
            (false, true) => Sentiment::Bearish,
            _ => Sentiment::Neutral,
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Which upstream feed a connection or event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedSource {
    Primary,
    Secondary,
}

impl fmt::Display for FeedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Connection lifecycle owned by the feed supervisor.
/// Transitions only move toward the secondary; once degraded the system
/// keeps serving the last known window until an external restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    ConnectingPrimary,
    ConnectedPrimary,
    ConnectingSecondary,
    ConnectedSecondary,
    Degraded,
}

impl ConnectionState {
    /// True when events from the given source should be routed downstream.
    /// Events from a source that is no longer active are dropped.
    pub fn accepts(&self, source: FeedSource) -> bool {
        matches!(
            (self, source),
            (
                ConnectionState::ConnectingPrimary | ConnectionState::ConnectedPrimary,
                FeedSource::Primary
            ) | (
                ConnectionState::ConnectingSecondary | ConnectionState::ConnectedSecondary,
                FeedSource::Secondary
            )
        )
    }

    pub fn is_degraded(&self) -> bool {
        *self == ConnectionState::Degraded
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// Market data
// ============================================================================

/// One fixed-interval OHLCV candle with rolling indicators.
/// `open_time` is the unique, strictly increasing window key, aligned to
/// the aggregation interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub ema7: Option<f64>,
    pub ema25: Option<f64>,
    pub ema99: Option<f64>,
    pub signal: Option<Signal>,
}

impl Candle {
    /// A fresh candle opened from a single trade price.
    pub fn from_price(open_time: i64, price: f64, volume: f64) -> Self {
        Self {
            open_time,
            open: price,
            high: price,
            low: price,
            close: price,
            volume,
            ema7: None,
            ema25: None,
            ema99: None,
            signal: None,
        }
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    pub fn range(&self) -> f64 {
        self.high - self.low
    }
}

impl fmt::Display for Candle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Candle(t={}, o={}, h={}, l={}, c={}, v={})",
            self.open_time, self.open, self.high, self.low, self.close, self.volume
        )
    }
}

/// Authoritative state of a forming (or just-closed) candle as sent by the
/// primary feed. Applied verbatim by the candle store.
#[derive(Debug, Clone, PartialEq)]
pub struct CandleUpdate {
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Ephemeral normalized tick from the secondary feed. Consumed once by the
/// aggregation step, never persisted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tick {
    pub price: f64,
    pub event_time_ms: i64,
    pub volume_hint: f64,
}

/// Normalized feed event. The closed set of shapes both upstream protocols
/// converge on; never leaked past the feed supervisor.
#[derive(Debug, Clone, PartialEq)]
pub enum MarketEvent {
    Candle(CandleUpdate),
    Tick(Tick),
}

// ============================================================================
// Analysis
// ============================================================================

/// Structured outcome of one analysis cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub sentiment: Sentiment,
    pub entry: String,
    pub exit: String,
    pub reasoning: String,
    pub lesson_learned: String,
    pub timestamp_ms: i64,
}

impl AnalysisResult {
    /// Stand-in result when the analyst could not be reached.
    pub fn degraded(detail: &str) -> Self {
        Self {
            sentiment: Sentiment::Degraded,
            entry: "-".to_string(),
            exit: "-".to_string(),
            reasoning: format!(
                "Signal interference: connection to the analyst was lost ({}). \
                 Holding the current view until the next scheduled cycle retries.",
                detail
            ),
            lesson_learned: String::new(),
            timestamp_ms: now_ms(),
        }
    }

    /// Stand-in result when the analyst replied but the reply could not be
    /// decoded. Distinct from the connection-broken variant.
    pub fn recalibrating(detail: &str) -> Self {
        Self {
            sentiment: Sentiment::Neutral,
            entry: "-".to_string(),
            exit: "-".to_string(),
            reasoning: format!(
                "Recalibrating: the analyst answered but the response could not \
                 be decoded ({}). Treating this cycle as neutral.",
                detail
            ),
            lesson_learned: String::new(),
            timestamp_ms: now_ms(),
        }
    }
}

impl fmt::Display for AnalysisResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AnalysisResult(sentiment={}, ts={}, lesson_len={})",
            self.sentiment,
            self.timestamp_ms,
            self.lesson_learned.len()
        )
    }
}

/// One news hotspot entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsItem {
    pub title: String,
    pub url: String,
    pub source: String,
}

/// Summary plus headline items from the news collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsDigest {
    pub summary: String,
    #[serde(default)]
    pub items: Vec<NewsItem>,
}

// ============================================================================
// Shared price cursor
// ============================================================================

/// Latest observed trade price, written by the feed supervisor and read as
/// a plain snapshot by the scheduler and any presentation layer.
#[derive(Default)]
pub struct PriceCursor {
    price: RwLock<Option<f64>>,
}

impl PriceCursor {
    pub fn set(&self, price: f64) {
        *self.price.write() = Some(price);
    }

    pub fn get(&self) -> Option<f64> {
        *self.price.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentiment_classify() {
        assert_eq!(Sentiment::classify("strongly BULLISH setup"), Sentiment::Bullish);
        assert_eq!(Sentiment::classify("mildly bearish"), Sentiment::Bearish);
        assert_eq!(Sentiment::classify("sideways chop"), Sentiment::Neutral);
        // Contradictory text resolves to neutral rather than guessing.
        assert_eq!(Sentiment::classify("bullish then bearish"), Sentiment::Neutral);
        assert_eq!(Sentiment::classify(""), Sentiment::Neutral);
    }

    #[test]
    fn test_connection_state_accepts() {
        assert!(ConnectionState::ConnectedPrimary.accepts(FeedSource::Primary));
        assert!(ConnectionState::ConnectingPrimary.accepts(FeedSource::Primary));
        assert!(!ConnectionState::ConnectedPrimary.accepts(FeedSource::Secondary));
        assert!(ConnectionState::ConnectedSecondary.accepts(FeedSource::Secondary));
        assert!(!ConnectionState::ConnectingSecondary.accepts(FeedSource::Primary));
        assert!(!ConnectionState::Degraded.accepts(FeedSource::Primary));
        assert!(!ConnectionState::Degraded.accepts(FeedSource::Secondary));
    }

    #[test]
    fn test_candle_from_price() {
        let c = Candle::from_price(60_000, 101.5, 2.0);
        assert_eq!(c.open, 101.5);
        assert_eq!(c.high, 101.5);
        assert_eq!(c.low, 101.5);
        assert_eq!(c.close, 101.5);
        assert_eq!(c.volume, 2.0);
        assert!(c.ema7.is_none());
        assert!(c.signal.is_none());
    }

    #[test]
    fn test_degraded_and_recalibrating_are_distinct() {
        let broken = AnalysisResult::degraded("connect timeout");
        let garbled = AnalysisResult::recalibrating("invalid JSON");
        assert_eq!(broken.sentiment, Sentiment::Degraded);
        assert_eq!(garbled.sentiment, Sentiment::Neutral);
        assert!(broken.reasoning.contains("Signal interference"));
        assert!(garbled.reasoning.contains("Recalibrating"));
    }

    #[test]
    fn test_price_cursor() {
        let cursor = PriceCursor::default();
        assert!(cursor.get().is_none());
        cursor.set(42.5);
        assert_eq!(cursor.get(), Some(42.5));
    }
}
