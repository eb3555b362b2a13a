// Layer 2 - Data Processing
// Candle aggregation and rolling indicators over the retained window

pub mod candle_store;
pub mod indicators;

// Re-export commonly used items
pub use candle_store::{CandleStore, CandleStoreStats, EMA_PERIODS, bucket_start};
pub use indicators::compute_ema;
