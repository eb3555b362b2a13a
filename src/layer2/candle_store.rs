// Candle Store - Bounded, time-ordered candle window
// Single-writer merge/append semantics, full indicator recompute per mutation

use parking_lot::RwLock;
use std::fmt;
use tracing::{debug, warn};

use crate::core::types::{Candle, CandleUpdate, Signal, Tick};
use crate::layer2::indicators::compute_ema;

/// Tracked EMA periods, matching the candle's ema7/ema25/ema99 fields.
pub const EMA_PERIODS: [usize; 3] = [7, 25, 99];

/// Align a timestamp down to the start of its aggregation bucket.
pub fn bucket_start(event_time_ms: i64, interval_ms: i64) -> i64 {
    event_time_ms - event_time_ms.rem_euclid(interval_ms)
}

/// Statistics snapshot from the candle store.
#[derive(Debug, Clone)]
pub struct CandleStoreStats {
    pub candles_applied: u64,
    pub ticks_applied: u64,
    pub merges: u64,
    pub appends: u64,
    pub evictions: u64,
    pub dropped_out_of_order: u64,
    pub window_len: usize,
    pub last_close: Option<f64>,
}

impl fmt::Display for CandleStoreStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CandleStore(candles={}, ticks={}, merges={}, appends={}, evictions={}, len={})",
            self.candles_applied,
            self.ticks_applied,
            self.merges,
            self.appends,
            self.evictions,
            self.window_len
        )
    }
}

/// Owns the bounded candle window. All mutation entry points serialize on
/// one write lock; both merge/append paths compare against the same last
/// candle, so unserialized calls could corrupt that decision. Consumers
/// only ever see cloned snapshots.
pub struct CandleStore {
    interval_ms: i64,
    max_candles: usize,

    window: RwLock<Vec<Candle>>,

    // Statistics
    candles_applied: RwLock<u64>,
    ticks_applied: RwLock<u64>,
    merges: RwLock<u64>,
    appends: RwLock<u64>,
    evictions: RwLock<u64>,
    dropped_out_of_order: RwLock<u64>,
}

impl CandleStore {
    pub fn new(interval_ms: i64, max_candles: usize) -> Self {
        Self {
            interval_ms,
            max_candles: max_candles.max(1),
            window: RwLock::new(Vec::with_capacity(max_candles)),
            candles_applied: RwLock::new(0),
            ticks_applied: RwLock::new(0),
            merges: RwLock::new(0),
            appends: RwLock::new(0),
            evictions: RwLock::new(0),
            dropped_out_of_order: RwLock::new(0),
        }
    }

    pub fn interval_ms(&self) -> i64 {
        self.interval_ms
    }

    /// Apply a pre-built candle from the primary feed.
    ///
    /// If the incoming key equals the last candle's key the candle is
    /// replaced in place (the upstream sends the authoritative state of the
    /// forming candle on each update) while its `signal` annotation is
    /// preserved; otherwise the candle is appended.
    pub fn apply_candle(&self, update: CandleUpdate) {
        let mut window = self.window.write();
        *self.candles_applied.write() += 1;

        match window.last_mut() {
            Some(last) if last.open_time == update.open_time => {
                // Full OHLCV overwrite; the signal is a derived annotation
                // from the analysis subsystem and survives the update.
                last.open = update.open;
                last.high = update.high;
                last.low = update.low;
                last.close = update.close;
                last.volume = update.volume;
                *self.merges.write() += 1;
            }
            Some(last) if last.open_time > update.open_time => {
                debug_assert!(
                    false,
                    "out-of-order candle key: {} after {}",
                    update.open_time, last.open_time
                );
                warn!(
                    incoming = update.open_time,
                    last = last.open_time,
                    "Dropping out-of-order candle"
                );
                *self.dropped_out_of_order.write() += 1;
                return;
            }
            _ => {
                window.push(Candle {
                    open_time: update.open_time,
                    open: update.open,
                    high: update.high,
                    low: update.low,
                    close: update.close,
                    volume: update.volume,
                    ema7: None,
                    ema25: None,
                    ema99: None,
                    signal: None,
                });
                *self.appends.write() += 1;
            }
        }

        self.finish_mutation(&mut window);
    }

    /// Apply a raw tick from the secondary feed, aggregating it into the
    /// interval-aligned bucket it belongs to.
    pub fn apply_tick(&self, tick: Tick) {
        let bucket = bucket_start(tick.event_time_ms, self.interval_ms);

        let mut window = self.window.write();
        *self.ticks_applied.write() += 1;

        match window.last_mut() {
            Some(last) if last.open_time == bucket => {
                last.high = last.high.max(tick.price);
                last.low = last.low.min(tick.price);
                last.close = tick.price;
                // Each tick contributes a fractional slice of the
                // externally reported rolling volume.
                last.volume += tick.volume_hint;
                *self.merges.write() += 1;
            }
            Some(last) if last.open_time > bucket => {
                debug_assert!(
                    false,
                    "out-of-order tick bucket: {} after {}",
                    bucket, last.open_time
                );
                warn!(incoming = bucket, last = last.open_time, "Dropping out-of-order tick");
                *self.dropped_out_of_order.write() += 1;
                return;
            }
            _ => {
                window.push(Candle::from_price(bucket, tick.price, tick.volume_hint));
                *self.appends.write() += 1;
            }
        }

        self.finish_mutation(&mut window);
    }

    /// Tag the most recent candle with an analysis signal.
    /// No-op on an empty window; does not touch indicators.
    pub fn tag_last_candle(&self, signal: Signal) {
        let mut window = self.window.write();
        if let Some(last) = window.last_mut() {
            last.signal = Some(signal);
            debug!(open_time = last.open_time, signal = %signal, "Tagged candle");
        }
    }

    /// Enforce the window bound, then recompute every tracked EMA over the
    /// whole window and write the values back per index. Runs under the
    /// same write lock as the mutation, so snapshots never observe a
    /// partially updated window.
    fn finish_mutation(&self, window: &mut Vec<Candle>) {
        while window.len() > self.max_candles {
            window.remove(0);
            *self.evictions.write() += 1;
        }

        let ema7 = compute_ema(window, EMA_PERIODS[0]);
        let ema25 = compute_ema(window, EMA_PERIODS[1]);
        let ema99 = compute_ema(window, EMA_PERIODS[2]);

        for (i, candle) in window.iter_mut().enumerate() {
            candle.ema7 = ema7[i];
            candle.ema25 = ema25[i];
            candle.ema99 = ema99[i];
        }
    }

    // Accessors

    /// Immutable snapshot of the whole window.
    pub fn snapshot(&self) -> Vec<Candle> {
        self.window.read().clone()
    }

    /// Immutable snapshot of the most recent `n` candles, oldest first.
    pub fn recent(&self, n: usize) -> Vec<Candle> {
        let window = self.window.read();
        let start = window.len().saturating_sub(n);
        window[start..].to_vec()
    }

    pub fn len(&self) -> usize {
        self.window.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.read().is_empty()
    }

    pub fn last_close(&self) -> Option<f64> {
        self.window.read().last().map(|c| c.close)
    }

    pub fn get_stats(&self) -> CandleStoreStats {
        let window = self.window.read();
        CandleStoreStats {
            candles_applied: *self.candles_applied.read(),
            ticks_applied: *self.ticks_applied.read(),
            merges: *self.merges.read(),
            appends: *self.appends.read(),
            evictions: *self.evictions.read(),
            dropped_out_of_order: *self.dropped_out_of_order.read(),
            window_len: window.len(),
            last_close: window.last().map(|c| c.close),
        }
    }
}

impl fmt::Display for CandleStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get_stats())
    }
}
