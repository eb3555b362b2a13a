// TrendLens entry point
// Wires config -> logging -> store/memory -> feed supervisor -> scheduler

use std::sync::Arc;
use tracing::{info, warn};

use trendlens::core::{get_config, setup_logging};
use trendlens::core::types::PriceCursor;
use trendlens::layer1::{FeedSupervisor, LatencyGauge};
use trendlens::layer2::CandleStore;
use trendlens::layer3::{AnalysisScheduler, HttpAnalyst, HttpNewsScout, MemoryStream};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = get_config();
    let (feed_cfg, analysis_cfg, memory_cfg, monitoring_cfg, summary) = {
        let guard = config.read();
        (
            guard.feed(),
            guard.analysis(),
            guard.memory(),
            guard.monitoring(),
            guard.get_summary(),
        )
    };

    setup_logging(
        Some(&monitoring_cfg.log_level),
        Some(monitoring_cfg.json_logs),
        Some(monitoring_cfg.console_output),
    );

    if !config.read().validate()? {
        warn!("Running with incomplete configuration; analysis cycles will degrade");
    }

    info!(
        symbol = %summary.symbol,
        interval_ms = summary.interval_ms,
        window = summary.candle_window,
        "Starting TrendLens"
    );

    let gauge = Arc::new(LatencyGauge::default());
    let cursor = Arc::new(PriceCursor::default());
    let store = Arc::new(CandleStore::new(feed_cfg.interval_ms, feed_cfg.candle_window));
    let memory = Arc::new(MemoryStream::load(&memory_cfg.path, memory_cfg.capacity)?);

    let analyst = Arc::new(HttpAnalyst::new(&analysis_cfg)?);
    let news = Arc::new(HttpNewsScout::new(&analysis_cfg)?);

    let supervisor = Arc::new(FeedSupervisor::new(
        feed_cfg,
        store.clone(),
        cursor.clone(),
        gauge,
    ));
    let scheduler = Arc::new(AnalysisScheduler::new(
        analysis_cfg,
        store.clone(),
        memory.clone(),
        cursor,
        analyst,
        news,
    ));

    tokio::spawn(supervisor.clone().run());
    tokio::spawn(scheduler.clone().run());

    tokio::signal::ctrl_c().await?;

    info!(
        feed = %supervisor.get_stats(),
        store = %store.get_stats(),
        scheduler = %scheduler.get_stats(),
        memory = %memory.get_stats(),
        "Shutting down"
    );
    Ok(())
}
