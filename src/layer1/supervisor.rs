// Feed Supervisor - Owns the single active feed connection
// Primary-to-secondary failover, no automatic climb back, degrade-don't-crash

use parking_lot::RwLock;
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::core::config::FeedConfig;
use crate::core::events::{self, EventPriority, publish_event};
use crate::core::types::{ConnectionState, FeedSource, MarketEvent, PriceCursor, now_ms};
use crate::layer1::connection::{FeedConnection, FeedMessage, LatencyGauge};
use crate::layer2::candle_store::CandleStore;

/// Statistics snapshot from the feed supervisor.
#[derive(Debug, Clone)]
pub struct FeedSupervisorStats {
    pub state: ConnectionState,
    pub events_routed: u64,
    pub events_dropped: u64,
    pub failovers: u64,
    pub latency_ms: Option<i64>,
    pub last_price: Option<f64>,
}

impl fmt::Display for FeedSupervisorStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FeedSupervisor(state={}, routed={}, dropped={}, failovers={}, latency_ms={:?})",
            self.state, self.events_routed, self.events_dropped, self.failovers, self.latency_ms
        )
    }
}

/// Owns exactly one active `FeedConnection` at a time. Starts on the
/// primary, falls over to the secondary on a transport error or on the
/// fallback timer, and never climbs back within a run; a second failure
/// parks the system in `Degraded`, still serving the last known window.
///
/// The state transitions live in synchronous handlers driven by the async
/// run loop, so the machine is fully testable without sockets. Each
/// handler is idempotent: a transition that does not match the current
/// state is a no-op.
pub struct FeedSupervisor {
    config: FeedConfig,
    store: Arc<CandleStore>,
    cursor: Arc<PriceCursor>,
    gauge: Arc<LatencyGauge>,

    state: RwLock<ConnectionState>,

    // Statistics
    events_routed: RwLock<u64>,
    events_dropped: RwLock<u64>,
    failovers: RwLock<u64>,
}

impl FeedSupervisor {
    pub fn new(
        config: FeedConfig,
        store: Arc<CandleStore>,
        cursor: Arc<PriceCursor>,
        gauge: Arc<LatencyGauge>,
    ) -> Self {
        Self {
            config,
            store,
            cursor,
            gauge,
            state: RwLock::new(ConnectionState::ConnectingPrimary),
            events_routed: RwLock::new(0),
            events_dropped: RwLock::new(0),
            failovers: RwLock::new(0),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Open handshake (plus subscribe, for the secondary) completed.
    pub fn on_connected(&self, source: FeedSource) {
        let mut state = self.state.write();
        let next = match (*state, source) {
            (ConnectionState::ConnectingPrimary, FeedSource::Primary) => {
                ConnectionState::ConnectedPrimary
            }
            (ConnectionState::ConnectingSecondary, FeedSource::Secondary) => {
                ConnectionState::ConnectedSecondary
            }
            // Stale or repeated notification
            _ => return,
        };

        let prev = *state;
        *state = next;
        drop(state);

        info!(from = %prev, to = %next, "Feed connected");
        self.publish_transition(prev, next, "connected");
    }

    /// Transport error from one of the sources. Returns the source that
    /// should be spawned next, if any.
    pub fn on_transport_error(&self, source: FeedSource, detail: &str) -> Option<FeedSource> {
        let mut state = self.state.write();
        match (*state, source) {
            (
                ConnectionState::ConnectingPrimary | ConnectionState::ConnectedPrimary,
                FeedSource::Primary,
            ) => {
                let prev = *state;
                *state = ConnectionState::ConnectingSecondary;
                *self.failovers.write() += 1;
                drop(state);

                warn!(error = detail, "Primary feed failed, falling over to secondary");
                self.publish_transition(prev, ConnectionState::ConnectingSecondary, detail);
                Some(FeedSource::Secondary)
            }
            (
                ConnectionState::ConnectingSecondary | ConnectionState::ConnectedSecondary,
                FeedSource::Secondary,
            ) => {
                let prev = *state;
                *state = ConnectionState::Degraded;
                drop(state);

                warn!(error = detail, "Secondary feed failed, no sources left");
                self.publish_transition(prev, ConnectionState::Degraded, detail);
                publish_event(
                    events::FEED_DEGRADED,
                    now_ms(),
                    serde_json::from_value(json!({ "reason": detail })).unwrap_or_default(),
                    "feed_supervisor",
                    EventPriority::Critical,
                );
                None
            }
            // Error from a source that is no longer active
            _ => None,
        }
    }

    /// The fallback timer expired while still waiting on the primary open
    /// handshake. A no-op in any other state, so timer and transport error
    /// can only fire the transition once between them.
    pub fn on_fallback_timeout(&self) -> Option<FeedSource> {
        {
            let mut state = self.state.write();
            if *state != ConnectionState::ConnectingPrimary {
                return None;
            }
            *state = ConnectionState::ConnectingSecondary;
            *self.failovers.write() += 1;
        }

        warn!(
            timeout_secs = self.config.fallback_timeout_secs,
            "Primary handshake timed out, falling over to secondary"
        );
        self.publish_transition(
            ConnectionState::ConnectingPrimary,
            ConnectionState::ConnectingSecondary,
            "fallback timeout",
        );
        Some(FeedSource::Secondary)
    }

    /// Route one normalized event into the candle store and price cursor.
    /// Events from a source that is no longer active are dropped.
    pub fn on_event(&self, source: FeedSource, event: MarketEvent) {
        if !self.state.read().accepts(source) {
            *self.events_dropped.write() += 1;
            return;
        }

        match event {
            MarketEvent::Candle(update) => {
                self.cursor.set(update.close);
                self.store.apply_candle(update);
            }
            MarketEvent::Tick(tick) => {
                self.cursor.set(tick.price);
                self.store.apply_tick(tick);
            }
        }
        *self.events_routed.write() += 1;
    }

    /// Supervision loop: spawns the primary connection, arms the fallback
    /// timer, then reacts to connection messages until the process ends.
    /// In `Degraded` the loop idles, keeping the last window readable.
    pub async fn run(self: Arc<Self>) {
        let (tx, mut rx) = mpsc::unbounded_channel();

        FeedConnection::primary(&self.config, self.gauge.clone()).spawn(tx.clone());

        let fallback = tokio::time::sleep(Duration::from_secs(self.config.fallback_timeout_secs));
        tokio::pin!(fallback);
        let mut fallback_armed = true;

        loop {
            tokio::select! {
                _ = &mut fallback, if fallback_armed => {
                    fallback_armed = false;
                    if let Some(FeedSource::Secondary) = self.on_fallback_timeout() {
                        FeedConnection::secondary(&self.config, self.gauge.clone())
                            .spawn(tx.clone());
                    }
                }
                msg = rx.recv() => match msg {
                    Some(FeedMessage::Connected(source)) => {
                        if source == FeedSource::Primary {
                            fallback_armed = false;
                        }
                        self.on_connected(source);
                    }
                    Some(FeedMessage::Event(source, event)) => {
                        self.on_event(source, event);
                    }
                    Some(FeedMessage::Disconnected(source, detail)) => {
                        if let Some(FeedSource::Secondary) =
                            self.on_transport_error(source, &detail)
                        {
                            FeedConnection::secondary(&self.config, self.gauge.clone())
                                .spawn(tx.clone());
                        }
                    }
                    None => break,
                }
            }
        }
    }

    pub fn get_stats(&self) -> FeedSupervisorStats {
        FeedSupervisorStats {
            state: self.state(),
            events_routed: *self.events_routed.read(),
            events_dropped: *self.events_dropped.read(),
            failovers: *self.failovers.read(),
            latency_ms: self.gauge.last_ms(),
            last_price: self.cursor.get(),
        }
    }

    fn publish_transition(&self, from: ConnectionState, to: ConnectionState, reason: &str) {
        publish_event(
            events::FEED_STATE_CHANGED,
            now_ms(),
            serde_json::from_value(json!({
                "from": from.to_string(),
                "to": to.to_string(),
                "reason": reason,
            }))
            .unwrap_or_default(),
            "feed_supervisor",
            EventPriority::High,
        );
    }
}

impl fmt::Display for FeedSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get_stats())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{CandleUpdate, Tick};

    fn make_supervisor() -> FeedSupervisor {
        let config = FeedConfig::default();
        let store = Arc::new(CandleStore::new(config.interval_ms, config.candle_window));
        FeedSupervisor::new(
            config,
            store,
            Arc::new(PriceCursor::default()),
            Arc::new(LatencyGauge::default()),
        )
    }

    #[test]
    fn test_happy_path_primary_connects() {
        let sup = make_supervisor();
        assert_eq!(sup.state(), ConnectionState::ConnectingPrimary);

        sup.on_connected(FeedSource::Primary);
        assert_eq!(sup.state(), ConnectionState::ConnectedPrimary);

        // Late fallback timer is a no-op once connected.
        assert!(sup.on_fallback_timeout().is_none());
        assert_eq!(sup.state(), ConnectionState::ConnectedPrimary);
    }

    #[test]
    fn test_fallback_timeout_fires_once() {
        let sup = make_supervisor();

        assert_eq!(sup.on_fallback_timeout(), Some(FeedSource::Secondary));
        assert_eq!(sup.state(), ConnectionState::ConnectingSecondary);

        // Second firing (or a late primary error) must not re-trigger.
        assert!(sup.on_fallback_timeout().is_none());
        assert!(sup.on_transport_error(FeedSource::Primary, "late error").is_none());
        assert_eq!(sup.state(), ConnectionState::ConnectingSecondary);
        assert_eq!(sup.get_stats().failovers, 1);
    }

    #[test]
    fn test_error_after_connected_primary_falls_over() {
        let sup = make_supervisor();
        sup.on_connected(FeedSource::Primary);

        assert_eq!(
            sup.on_transport_error(FeedSource::Primary, "reset by peer"),
            Some(FeedSource::Secondary)
        );
        assert_eq!(sup.state(), ConnectionState::ConnectingSecondary);
    }

    #[test]
    fn test_secondary_failure_degrades_terminally() {
        let sup = make_supervisor();
        sup.on_transport_error(FeedSource::Primary, "t0 error");
        sup.on_connected(FeedSource::Secondary);
        assert_eq!(sup.state(), ConnectionState::ConnectedSecondary);

        assert!(sup.on_transport_error(FeedSource::Secondary, "t2 error").is_none());
        assert_eq!(sup.state(), ConnectionState::Degraded);

        // Degraded is terminal for this run.
        assert!(sup.on_fallback_timeout().is_none());
        assert!(sup.on_transport_error(FeedSource::Primary, "x").is_none());
        assert!(sup.on_transport_error(FeedSource::Secondary, "y").is_none());
        sup.on_connected(FeedSource::Primary);
        assert_eq!(sup.state(), ConnectionState::Degraded);
    }

    #[test]
    fn test_stale_primary_events_dropped_after_failover() {
        let sup = make_supervisor();
        sup.on_transport_error(FeedSource::Primary, "gone");
        sup.on_connected(FeedSource::Secondary);

        // A straggler from the dead primary must not reach the store.
        sup.on_event(
            FeedSource::Primary,
            MarketEvent::Candle(CandleUpdate {
                open_time: 0,
                open: 1.0,
                high: 1.0,
                low: 1.0,
                close: 1.0,
                volume: 1.0,
            }),
        );
        assert!(sup.store.is_empty());

        sup.on_event(
            FeedSource::Secondary,
            MarketEvent::Tick(Tick { price: 2.0, event_time_ms: 1_000, volume_hint: 0.1 }),
        );
        assert_eq!(sup.store.len(), 1);

        let stats = sup.get_stats();
        assert_eq!(stats.events_dropped, 1);
        assert_eq!(stats.events_routed, 1);
        assert_eq!(stats.last_price, Some(2.0));
    }

    #[test]
    fn test_degraded_still_serves_window() {
        let sup = make_supervisor();
        sup.on_connected(FeedSource::Primary);
        sup.on_event(
            FeedSource::Primary,
            MarketEvent::Candle(CandleUpdate {
                open_time: 0,
                open: 10.0,
                high: 11.0,
                low: 9.0,
                close: 10.5,
                volume: 3.0,
            }),
        );

        sup.on_transport_error(FeedSource::Primary, "gone");
        sup.on_transport_error(FeedSource::Secondary, "gone too");
        assert!(sup.state().is_degraded());

        // Last known window stays readable.
        assert_eq!(sup.store.len(), 1);
        assert_eq!(sup.store.last_close(), Some(10.5));
    }
}
