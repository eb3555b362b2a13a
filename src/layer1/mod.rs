// Layer 1 - Feed Connectors
// Websocket connections to the upstream price sources and their supervisor

pub mod connection;
pub mod supervisor;

// Re-export commonly used items for convenience
pub use connection::{
    FeedConnection, FeedMessage, LatencyGauge, ParsedFrame, parse_primary_frame,
    parse_secondary_frame,
};
pub use supervisor::{FeedSupervisor, FeedSupervisorStats};
