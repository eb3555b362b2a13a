// Feed Connection - One upstream websocket source
// Translates source-specific frames into normalized market events

use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, info, warn};

use crate::core::config::FeedConfig;
use crate::core::types::{CandleUpdate, FeedSource, MarketEvent, Tick, now_ms};

/// Seconds covered by the secondary feed's rolling volume field. The
/// per-tick volume hint divides by this fixed constant; if the true
/// inter-message interval differs the reported volume is biased
/// accordingly (accepted, see DESIGN.md).
const ROLLING_VOLUME_WINDOW_SECS: f64 = 86_400.0;

// ============================================================================
// Messages to the supervisor
// ============================================================================

/// Everything a connection reports upward. Transport errors travel on the
/// channel too; they are never raised to callers.
#[derive(Debug, Clone)]
pub enum FeedMessage {
    Connected(FeedSource),
    Event(FeedSource, MarketEvent),
    Disconnected(FeedSource, String),
}

// ============================================================================
// Latency gauge
// ============================================================================

/// Observed ingest latency, `now - source event time`, clamped to >= 0.
/// Frames without a parsable event time simply do not update the gauge.
#[derive(Default)]
pub struct LatencyGauge {
    last_ms: RwLock<Option<i64>>,
    samples: RwLock<u64>,
}

impl LatencyGauge {
    pub fn record(&self, observed_now_ms: i64, source_event_time_ms: i64) {
        let latency = (observed_now_ms - source_event_time_ms).max(0);
        *self.last_ms.write() = Some(latency);
        *self.samples.write() += 1;
    }

    pub fn last_ms(&self) -> Option<i64> {
        *self.last_ms.read()
    }

    pub fn samples(&self) -> u64 {
        *self.samples.read()
    }
}

// ============================================================================
// Wire shapes
// ============================================================================

// Primary: kline stream, decimals encoded as strings.
#[derive(Debug, Deserialize)]
struct KlineEnvelope {
    #[serde(rename = "e")]
    event_type: String,
    #[serde(rename = "E")]
    event_time: Option<i64>,
    #[serde(rename = "k")]
    kline: KlinePayload,
}

#[derive(Debug, Deserialize)]
struct KlinePayload {
    #[serde(rename = "t")]
    open_time: i64,
    #[serde(rename = "o")]
    open: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "v")]
    volume: String,
}

// Secondary: ticker channel, RFC3339 event times, rolling 24h volume.
#[derive(Debug, Deserialize)]
struct TickerFrame {
    #[serde(rename = "type")]
    frame_type: String,
    price: Option<String>,
    volume_24h: Option<String>,
    time: Option<String>,
}

/// A normalized event plus the source event time used for the latency
/// sample, when the frame carried one.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFrame {
    pub event: MarketEvent,
    pub source_time_ms: Option<i64>,
}

/// Parse one primary-feed text frame. Unknown or auxiliary frames yield
/// `None` and are skipped, never errors.
pub fn parse_primary_frame(raw: &str) -> Option<ParsedFrame> {
    let envelope: KlineEnvelope = serde_json::from_str(raw).ok()?;
    if envelope.event_type != "kline" {
        return None;
    }

    let k = &envelope.kline;
    let update = CandleUpdate {
        open_time: k.open_time,
        open: k.open.parse().ok()?,
        high: k.high.parse().ok()?,
        low: k.low.parse().ok()?,
        close: k.close.parse().ok()?,
        volume: k.volume.parse().ok()?,
    };

    Some(ParsedFrame {
        event: MarketEvent::Candle(update),
        source_time_ms: envelope.event_time,
    })
}

/// Parse one secondary-feed text frame into a raw tick. The per-second
/// volume contribution is derived from the rolling 24h volume.
pub fn parse_secondary_frame(raw: &str) -> Option<ParsedFrame> {
    let frame: TickerFrame = serde_json::from_str(raw).ok()?;
    if frame.frame_type != "ticker" {
        return None;
    }

    let price: f64 = frame.price.as_deref()?.parse().ok()?;
    let volume_hint = frame
        .volume_24h
        .as_deref()
        .and_then(|v| v.parse::<f64>().ok())
        .map(|v| v / ROLLING_VOLUME_WINDOW_SECS)
        .unwrap_or(0.0);

    let source_time_ms = frame
        .time
        .as_deref()
        .and_then(|t| chrono::DateTime::parse_from_rfc3339(t).ok())
        .map(|dt| dt.timestamp_millis());

    let tick = Tick {
        price,
        // Bucket by the source's clock when available, otherwise ours.
        event_time_ms: source_time_ms.unwrap_or_else(now_ms),
        volume_hint,
    };

    Some(ParsedFrame {
        event: MarketEvent::Tick(tick),
        source_time_ms,
    })
}

// ============================================================================
// Connection
// ============================================================================

/// One upstream websocket connection. Owns connect (plus the subscribe
/// handshake where the source needs one) and the read loop; everything it
/// learns goes to the supervisor over the channel.
pub struct FeedConnection {
    source: FeedSource,
    url: String,
    subscribe_frame: Option<String>,
    gauge: Arc<LatencyGauge>,
}

impl FeedConnection {
    /// Primary source: subscription is encoded in the stream URL, so the
    /// open handshake alone establishes the feed.
    pub fn primary(config: &FeedConfig, gauge: Arc<LatencyGauge>) -> Self {
        let url = format!(
            "{}/{}@kline_{}",
            config.primary_ws_url.trim_end_matches('/'),
            config.symbol.to_lowercase(),
            interval_label(config.interval_ms),
        );
        Self {
            source: FeedSource::Primary,
            url,
            subscribe_frame: None,
            gauge,
        }
    }

    /// Secondary source: requires an explicit subscribe frame after open.
    pub fn secondary(config: &FeedConfig, gauge: Arc<LatencyGauge>) -> Self {
        let subscribe = serde_json::json!({
            "type": "subscribe",
            "product_ids": [config.secondary_product_id],
            "channels": ["ticker"],
        });
        Self {
            source: FeedSource::Secondary,
            url: config.secondary_ws_url.clone(),
            subscribe_frame: Some(subscribe.to_string()),
            gauge,
        }
    }

    pub fn source(&self) -> FeedSource {
        self.source
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Spawn the connection task. The task lives until the stream ends or
    /// errors, then reports `Disconnected` and exits; recovery is the
    /// supervisor's job.
    pub fn spawn(self, tx: mpsc::UnboundedSender<FeedMessage>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run(tx).await })
    }

    async fn run(self, tx: mpsc::UnboundedSender<FeedMessage>) {
        info!(source = %self.source, url = %self.url, "Connecting to feed");

        let ws_stream = match connect_async(self.url.as_str()).await {
            Ok((stream, _)) => stream,
            Err(e) => {
                let _ = tx.send(FeedMessage::Disconnected(self.source, e.to_string()));
                return;
            }
        };

        let (mut sink, mut stream) = ws_stream.split();

        if let Some(frame) = &self.subscribe_frame {
            if let Err(e) = sink.send(Message::Text(frame.clone())).await {
                let _ = tx.send(FeedMessage::Disconnected(
                    self.source,
                    format!("subscribe failed: {}", e),
                ));
                return;
            }
        }

        if tx.send(FeedMessage::Connected(self.source)).is_err() {
            return;
        }

        let mut frames_received = 0u64;
        let mut frames_skipped = 0u64;

        while let Some(item) = stream.next().await {
            match item {
                Ok(Message::Text(text)) => {
                    frames_received += 1;

                    let parsed = match self.source {
                        FeedSource::Primary => parse_primary_frame(&text),
                        FeedSource::Secondary => parse_secondary_frame(&text),
                    };

                    match parsed {
                        Some(frame) => {
                            if let Some(source_time) = frame.source_time_ms {
                                self.gauge.record(now_ms(), source_time);
                            }
                            if tx.send(FeedMessage::Event(self.source, frame.event)).is_err() {
                                // Supervisor is gone; nothing left to feed.
                                return;
                            }
                        }
                        None => frames_skipped += 1,
                    }
                }
                Ok(Message::Ping(payload)) => {
                    let _ = sink.send(Message::Pong(payload)).await;
                }
                Ok(Message::Close(_)) => {
                    debug!(source = %self.source, "Feed closed by remote");
                    let _ = tx.send(FeedMessage::Disconnected(
                        self.source,
                        "closed by remote".to_string(),
                    ));
                    return;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(source = %self.source, error = %e, "Feed transport error");
                    let _ = tx.send(FeedMessage::Disconnected(self.source, e.to_string()));
                    return;
                }
            }
        }

        debug!(
            source = %self.source,
            frames = frames_received,
            skipped = frames_skipped,
            "Feed stream ended"
        );
        let _ = tx.send(FeedMessage::Disconnected(self.source, "stream ended".to_string()));
    }
}

/// Interval label for URL-based kline subscriptions, e.g. 60000 -> "1m".
fn interval_label(interval_ms: i64) -> String {
    match interval_ms {
        3_600_000 => "1h".to_string(),
        ms if ms >= 60_000 && ms % 60_000 == 0 => format!("{}m", ms / 60_000),
        ms => format!("{}s", (ms / 1000).max(1)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_primary_kline_frame() {
        let raw = r#"{"e":"kline","E":1700000005000,"s":"BTCUSDT","k":{"t":1700000000000,"T":1700000059999,"s":"BTCUSDT","i":"1m","o":"42000.5","h":"42100.0","l":"41950.25","c":"42050.0","v":"12.5","x":false}}"#;
        let frame = parse_primary_frame(raw).expect("kline frame should parse");

        assert_eq!(frame.source_time_ms, Some(1_700_000_005_000));
        match frame.event {
            MarketEvent::Candle(update) => {
                assert_eq!(update.open_time, 1_700_000_000_000);
                assert_eq!(update.open, 42000.5);
                assert_eq!(update.high, 42100.0);
                assert_eq!(update.low, 41950.25);
                assert_eq!(update.close, 42050.0);
                assert_eq!(update.volume, 12.5);
            }
            other => panic!("expected candle event, got {:?}", other),
        }
    }

    #[test]
    fn test_primary_skips_non_kline_frames() {
        assert!(parse_primary_frame(r#"{"e":"aggTrade","E":1,"k":{"t":1,"o":"1","h":"1","l":"1","c":"1","v":"1"}}"#).is_none());
        assert!(parse_primary_frame(r#"{"result":null,"id":1}"#).is_none());
        assert!(parse_primary_frame("not json at all").is_none());
    }

    #[test]
    fn test_parse_secondary_ticker_frame() {
        let raw = r#"{"type":"ticker","product_id":"BTC-USD","price":"42010.55","volume_24h":"8640.0","time":"2023-11-14T22:13:20.000Z"}"#;
        let frame = parse_secondary_frame(raw).expect("ticker frame should parse");

        assert!(frame.source_time_ms.is_some());
        match frame.event {
            MarketEvent::Tick(tick) => {
                assert_eq!(tick.price, 42010.55);
                // 8640 over 86400s -> 0.1 per second
                assert!((tick.volume_hint - 0.1).abs() < 1e-12);
                assert_eq!(tick.event_time_ms, frame.source_time_ms.unwrap());
            }
            other => panic!("expected tick event, got {:?}", other),
        }
    }

    #[test]
    fn test_secondary_without_time_still_ticks() {
        let raw = r#"{"type":"ticker","price":"100.0","volume_24h":"86400.0"}"#;
        let frame = parse_secondary_frame(raw).expect("ticker without time should parse");

        // Latency cannot be computed, but the tick is still usable.
        assert!(frame.source_time_ms.is_none());
        match frame.event {
            MarketEvent::Tick(tick) => {
                assert_eq!(tick.price, 100.0);
                assert!((tick.volume_hint - 1.0).abs() < 1e-12);
                assert!(tick.event_time_ms > 0);
            }
            other => panic!("expected tick event, got {:?}", other),
        }
    }

    #[test]
    fn test_secondary_skips_subscribe_acks() {
        assert!(parse_secondary_frame(r#"{"type":"subscriptions","channels":[]}"#).is_none());
        assert!(parse_secondary_frame(r#"{"type":"heartbeat"}"#).is_none());
    }

    #[test]
    fn test_latency_gauge_clamps_to_zero() {
        let gauge = LatencyGauge::default();
        assert!(gauge.last_ms().is_none());

        gauge.record(1_000, 400);
        assert_eq!(gauge.last_ms(), Some(600));

        // Source clock slightly ahead of ours: clamp rather than go negative.
        gauge.record(1_000, 1_500);
        assert_eq!(gauge.last_ms(), Some(0));
        assert_eq!(gauge.samples(), 2);
    }

    #[test]
    fn test_connection_urls() {
        let config = FeedConfig::default();
        let gauge = Arc::new(LatencyGauge::default());

        let primary = FeedConnection::primary(&config, gauge.clone());
        assert_eq!(primary.source(), FeedSource::Primary);
        assert!(primary.url().ends_with("btcusdt@kline_1m"));

        let secondary = FeedConnection::secondary(&config, gauge);
        assert_eq!(secondary.source(), FeedSource::Secondary);
        assert_eq!(secondary.url(), config.secondary_ws_url);
        assert!(secondary.subscribe_frame.as_deref().unwrap().contains("BTC-USD"));
    }

    #[test]
    fn test_interval_label() {
        assert_eq!(interval_label(60_000), "1m");
        assert_eq!(interval_label(300_000), "5m");
        assert_eq!(interval_label(3_600_000), "1h");
    }
}
