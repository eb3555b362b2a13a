// Analysis Scheduler - Single-flight periodic analysis cycle driver
// Startup trigger + fixed cadence; overlapping triggers are dropped

use parking_lot::RwLock;
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::core::config::AnalysisConfig;
use crate::core::events::{self, EventPriority, publish_event};
use crate::core::types::{
    AnalysisResult, Candle, NewsDigest, PriceCursor, Sentiment, Signal, now_ms,
};
use crate::layer2::candle_store::CandleStore;
use crate::layer3::analyst::{AnalysisRequest, Analyst, AnalystError};
use crate::layer3::memory::MemoryStream;
use crate::layer3::news::NewsScout;

/// Prompt marker used when no lessons have been recorded yet.
pub const NO_HISTORY_MARKER: &str = "(no prior lessons recorded)";

/// What one trigger actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Full cycle ran (possibly producing a degraded result).
    Completed,
    /// Another cycle was already in flight; this trigger was dropped.
    Skipped,
    /// The window was empty; nothing to analyze yet.
    NoData,
}

/// Statistics snapshot from the scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerStats {
    pub cycles_completed: u64,
    pub cycles_skipped: u64,
    pub cycles_no_data: u64,
    pub degraded_results: u64,
    pub lessons_recorded: u64,
    pub has_result: bool,
}

impl fmt::Display for SchedulerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Scheduler(completed={}, skipped={}, no_data={}, degraded={}, lessons={})",
            self.cycles_completed,
            self.cycles_skipped,
            self.cycles_no_data,
            self.degraded_results,
            self.lessons_recorded
        )
    }
}

/// Releases the single-flight guard on every exit path, including panics
/// and early returns inside the cycle body.
struct FlightGuard<'a>(&'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Drives the periodic analysis cycle: assembles the request payload from
/// the candle window, price cursor and memory stream, invokes the external
/// collaborators strictly in sequence, and applies the result back onto
/// the store (signal tag) and the memory stream (lesson).
pub struct AnalysisScheduler {
    config: AnalysisConfig,
    store: Arc<CandleStore>,
    memory: Arc<MemoryStream>,
    cursor: Arc<PriceCursor>,
    analyst: Arc<dyn Analyst>,
    news: Arc<dyn NewsScout>,

    running: AtomicBool,
    latest_result: RwLock<Option<AnalysisResult>>,
    latest_news: RwLock<Option<NewsDigest>>,

    // Statistics
    cycles_completed: RwLock<u64>,
    cycles_skipped: RwLock<u64>,
    cycles_no_data: RwLock<u64>,
    degraded_results: RwLock<u64>,
    lessons_recorded: RwLock<u64>,
}

impl AnalysisScheduler {
    pub fn new(
        config: AnalysisConfig,
        store: Arc<CandleStore>,
        memory: Arc<MemoryStream>,
        cursor: Arc<PriceCursor>,
        analyst: Arc<dyn Analyst>,
        news: Arc<dyn NewsScout>,
    ) -> Self {
        Self {
            config,
            store,
            memory,
            cursor,
            analyst,
            news,
            running: AtomicBool::new(false),
            latest_result: RwLock::new(None),
            latest_news: RwLock::new(None),
            cycles_completed: RwLock::new(0),
            cycles_skipped: RwLock::new(0),
            cycles_no_data: RwLock::new(0),
            degraded_results: RwLock::new(0),
            lessons_recorded: RwLock::new(0),
        }
    }

    /// Run one analysis cycle. A call while a cycle is already in flight
    /// is a silent skip: it returns immediately, queues nothing, and
    /// produces no side effects.
    pub async fn run_cycle(&self) -> CycleOutcome {
        if self.running.swap(true, Ordering::SeqCst) {
            *self.cycles_skipped.write() += 1;
            debug!("Analysis already in flight, dropping trigger");
            return CycleOutcome::Skipped;
        }
        let _guard = FlightGuard(&self.running);

        let window = self.store.recent(self.config.digest_candles);
        let Some(last) = window.last() else {
            *self.cycles_no_data.write() += 1;
            debug!("No market history yet, skipping analysis");
            return CycleOutcome::NoData;
        };

        let price = self.cursor.get().unwrap_or(last.close);
        let trend_digest = build_trend_digest(&window);

        let mut memory_context = self.memory.context_for(self.config.memory_context_entries);
        if memory_context.is_empty() {
            memory_context.push(NO_HISTORY_MARKER.to_string());
        }

        let request = AnalysisRequest { price, trend_digest, memory_context };

        info!(price = price, candles = window.len(), "Analysis cycle started");

        let result = match self.analyst.analyze(&request).await {
            Ok(result) => result,
            Err(AnalystError::Transport(detail)) => {
                warn!(error = %detail, "Analyst unreachable, degrading this cycle");
                *self.degraded_results.write() += 1;
                AnalysisResult::degraded(&detail)
            }
            Err(AnalystError::Malformed(detail)) => {
                warn!(error = %detail, "Analyst reply undecodable, recalibrating");
                *self.degraded_results.write() += 1;
                AnalysisResult::recalibrating(&detail)
            }
        };

        match result.sentiment {
            Sentiment::Bullish => self.store.tag_last_candle(Signal::Bullish),
            Sentiment::Bearish => self.store.tag_last_candle(Signal::Bearish),
            Sentiment::Neutral | Sentiment::Degraded => {}
        }

        let lesson = result.lesson_learned.trim();
        if lesson.chars().count() >= self.config.min_lesson_chars {
            match self.memory.append(lesson) {
                Ok(()) => *self.lessons_recorded.write() += 1,
                Err(e) => error!(error = %e, "Failed to persist lesson"),
            }
        }

        publish_event(
            events::ANALYSIS_COMPLETED,
            result.timestamp_ms,
            serde_json::from_value(json!({
                "sentiment": result.sentiment.to_string(),
                "price": price,
            }))
            .unwrap_or_default(),
            "analysis_scheduler",
            EventPriority::Medium,
        );
        *self.latest_result.write() = Some(result);

        // News runs strictly after the analysis and its side effects; a
        // failure here never fails the cycle.
        match self.news.fetch_hotspots().await {
            Ok(mut digest) => {
                digest.items.truncate(self.config.max_news_items);
                publish_event(
                    events::NEWS_UPDATED,
                    now_ms(),
                    serde_json::from_value(json!({ "items": digest.items.len() }))
                        .unwrap_or_default(),
                    "analysis_scheduler",
                    EventPriority::Info,
                );
                *self.latest_news.write() = Some(digest);
            }
            Err(e) => warn!(error = %e, "Hotspot fetch failed"),
        }

        *self.cycles_completed.write() += 1;
        CycleOutcome::Completed
    }

    /// Scheduling loop: a one-shot startup trigger the first time the
    /// window reaches the minimum history (and no result exists yet), plus
    /// the fixed cadence thereafter. Overlap protection lives entirely in
    /// `run_cycle`.
    pub async fn run(self: Arc<Self>) {
        let mut cadence =
            tokio::time::interval(Duration::from_secs(self.config.interval_secs.max(1)));
        // The first interval tick fires immediately; periodic cycles should
        // start one full interval in.
        cadence.tick().await;

        let mut bootstrap_poll = tokio::time::interval(Duration::from_secs(1));
        bootstrap_poll.tick().await;

        loop {
            tokio::select! {
                _ = bootstrap_poll.tick() => {
                    if self.latest_result.read().is_none()
                        && self.store.len() >= self.config.min_history
                    {
                        info!(
                            candles = self.store.len(),
                            threshold = self.config.min_history,
                            "Minimum history reached, running startup analysis"
                        );
                        self.run_cycle().await;
                    }
                }
                _ = cadence.tick() => {
                    self.run_cycle().await;
                }
            }
        }
    }

    pub fn latest_result(&self) -> Option<AnalysisResult> {
        self.latest_result.read().clone()
    }

    pub fn latest_news(&self) -> Option<NewsDigest> {
        self.latest_news.read().clone()
    }

    pub fn get_stats(&self) -> SchedulerStats {
        SchedulerStats {
            cycles_completed: *self.cycles_completed.read(),
            cycles_skipped: *self.cycles_skipped.read(),
            cycles_no_data: *self.cycles_no_data.read(),
            degraded_results: *self.degraded_results.read(),
            lessons_recorded: *self.lessons_recorded.read(),
            has_result: self.latest_result.read().is_some(),
        }
    }
}

/// Compact textual digest of the recent window for the analyst prompt:
/// one header line with the net move, then one line per candle.
pub fn build_trend_digest(candles: &[Candle]) -> String {
    if candles.is_empty() {
        return "no candles yet".to_string();
    }

    let first = &candles[0];
    let last = &candles[candles.len() - 1];
    let net_pct = if first.close != 0.0 {
        (last.close - first.close) / first.close * 100.0
    } else {
        0.0
    };

    let mut digest = format!("last {} candles, net change {:+.2}%\n", candles.len(), net_pct);

    for candle in candles {
        let stamp = chrono::DateTime::from_timestamp_millis(candle.open_time)
            .map(|dt| dt.format("%H:%M").to_string())
            .unwrap_or_else(|| candle.open_time.to_string());

        let ema = match (candle.ema7, candle.ema25) {
            (Some(e7), Some(e25)) => format!(" ema7={:.2} ema25={:.2}", e7, e25),
            (Some(e7), None) => format!(" ema7={:.2}", e7),
            _ => String::new(),
        };

        digest.push_str(&format!(
            "{} O={:.2} H={:.2} L={:.2} C={:.2} V={:.3}{}\n",
            stamp, candle.open, candle.high, candle.low, candle.close, candle.volume, ema
        ));
    }

    digest
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::AnalysisConfig;
    use crate::core::types::CandleUpdate;
    use crate::layer3::news::NewsError;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    struct FixedAnalyst {
        calls: Arc<AtomicUsize>,
        sentiment: Sentiment,
        lesson: String,
    }

    #[async_trait]
    impl Analyst for FixedAnalyst {
        async fn analyze(&self, _request: &AnalysisRequest) -> Result<AnalysisResult, AnalystError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(AnalysisResult {
                sentiment: self.sentiment,
                entry: "42000".to_string(),
                exit: "43000".to_string(),
                reasoning: "test".to_string(),
                lesson_learned: self.lesson.clone(),
                timestamp_ms: 1_000,
            })
        }
    }

    struct NoNews;

    #[async_trait]
    impl NewsScout for NoNews {
        async fn fetch_hotspots(&self) -> Result<NewsDigest, NewsError> {
            Err(NewsError::Transport("offline".to_string()))
        }
    }

    fn make_scheduler(
        analyst: Arc<dyn Analyst>,
        dir: &TempDir,
    ) -> (Arc<AnalysisScheduler>, Arc<CandleStore>) {
        let config = AnalysisConfig::default();
        let store = Arc::new(CandleStore::new(60_000, 120));
        let memory =
            Arc::new(MemoryStream::load(dir.path().join("lessons.json"), 20).unwrap());
        let scheduler = Arc::new(AnalysisScheduler::new(
            config,
            store.clone(),
            memory,
            Arc::new(PriceCursor::default()),
            analyst,
            Arc::new(NoNews),
        ));
        (scheduler, store)
    }

    fn fill_store(store: &CandleStore, count: usize) {
        for i in 0..count {
            store.apply_candle(CandleUpdate {
                open_time: i as i64 * 60_000,
                open: 100.0,
                high: 101.0,
                low: 99.0,
                close: 100.5,
                volume: 1.0,
            });
        }
    }

    #[tokio::test]
    async fn test_cycle_tags_candle_and_records_lesson() {
        let dir = TempDir::new().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let analyst = Arc::new(FixedAnalyst {
            calls: calls.clone(),
            sentiment: Sentiment::Bullish,
            lesson: "buy strength, not hope".to_string(),
        });
        let (scheduler, store) = make_scheduler(analyst, &dir);
        fill_store(&store, 12);

        let outcome = scheduler.run_cycle().await;
        assert_eq!(outcome, CycleOutcome::Completed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let window = store.snapshot();
        assert_eq!(window.last().unwrap().signal, Some(Signal::Bullish));
        assert_eq!(scheduler.memory.entries(), vec!["buy strength, not hope"]);
        assert_eq!(scheduler.latest_result().unwrap().sentiment, Sentiment::Bullish);
    }

    #[tokio::test]
    async fn test_neutral_result_does_not_tag() {
        let dir = TempDir::new().unwrap();
        let analyst = Arc::new(FixedAnalyst {
            calls: Arc::new(AtomicUsize::new(0)),
            sentiment: Sentiment::Neutral,
            lesson: String::new(),
        });
        let (scheduler, store) = make_scheduler(analyst, &dir);
        fill_store(&store, 5);

        scheduler.run_cycle().await;
        assert_eq!(store.snapshot().last().unwrap().signal, None);
        assert!(scheduler.memory.is_empty());
    }

    #[tokio::test]
    async fn test_short_lesson_filtered() {
        let dir = TempDir::new().unwrap();
        let analyst = Arc::new(FixedAnalyst {
            calls: Arc::new(AtomicUsize::new(0)),
            sentiment: Sentiment::Bearish,
            lesson: "meh".to_string(),
        });
        let (scheduler, store) = make_scheduler(analyst, &dir);
        fill_store(&store, 5);

        scheduler.run_cycle().await;
        assert!(scheduler.memory.is_empty());
        assert_eq!(scheduler.get_stats().lessons_recorded, 0);
    }

    #[tokio::test]
    async fn test_empty_window_is_no_data() {
        let dir = TempDir::new().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let analyst = Arc::new(FixedAnalyst {
            calls: calls.clone(),
            sentiment: Sentiment::Bullish,
            lesson: String::new(),
        });
        let (scheduler, _store) = make_scheduler(analyst, &dir);

        assert_eq!(scheduler.run_cycle().await, CycleOutcome::NoData);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        // Guard released: a later cycle still runs.
        assert_eq!(scheduler.get_stats().cycles_no_data, 1);
    }

    #[test]
    fn test_trend_digest_shape() {
        let candles: Vec<Candle> = (0..3)
            .map(|i| Candle {
                close: 100.0 + i as f64,
                ..Candle::from_price(i * 60_000, 100.0 + i as f64, 1.0)
            })
            .collect();

        let digest = build_trend_digest(&candles);
        assert!(digest.starts_with("last 3 candles, net change +2.00%"));
        assert_eq!(digest.lines().count(), 4);

        assert_eq!(build_trend_digest(&[]), "no candles yet");
    }
}
