// Indicator Engine - Rolling exponential moving averages
// Pure recompute over the full retained window; no state of its own

use crate::core::types::Candle;

/// Compute an EMA series over the candle closes.
///
/// Returns one entry per input candle. Indices before `period - 1` are
/// `None` (insufficient history); index `period - 1` carries the simple
/// mean of the first `period` closes as the seed; every later index uses
/// `ema[i] = close[i] * k + ema[i-1] * (1 - k)` with `k = 2 / (period + 1)`.
///
/// Recomputed over the whole window after every mutation rather than
/// maintained incrementally: the window can shrink from the front on
/// eviction, which would desynchronize a running accumulator.
pub fn compute_ema(candles: &[Candle], period: usize) -> Vec<Option<f64>> {
    let len = candles.len();
    let mut out = vec![None; len];
    if period == 0 || len < period {
        return out;
    }

    let seed: f64 = candles[..period].iter().map(|c| c.close).sum::<f64>() / period as f64;
    out[period - 1] = Some(seed);

    let k = 2.0 / (period as f64 + 1.0);
    let mut prev = seed;
    for i in period..len {
        let value = candles[i].close * k + prev * (1.0 - k);
        out[i] = Some(value);
        prev = value;
    }

    out
}
