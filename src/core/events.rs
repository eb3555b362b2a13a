// Event System for TrendLens
// Central pub/sub bus over tokio broadcast channels

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tokio::sync::broadcast;
use uuid::Uuid;

// ============================================================================
// Event type names
// ============================================================================

pub const FEED_STATE_CHANGED: &str = "feed.state_changed";
pub const FEED_DEGRADED: &str = "feed.degraded";
pub const ANALYSIS_COMPLETED: &str = "analysis.completed";
pub const NEWS_UPDATED: &str = "news.updated";

// ============================================================================
// Event Priority
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventPriority {
    Critical = 1, // Feed degraded, no sources left
    High = 2,     // Failover in progress
    Medium = 3,   // Analysis outcomes
    Info = 4,     // Minor updates
}

impl fmt::Display for EventPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// Event
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub event_type: String,
    pub timestamp: i64,
    pub data: HashMap<String, serde_json::Value>,
    pub source: String,
    pub priority: EventPriority,
    pub event_id: String,
}

impl Event {
    pub fn new(
        event_type: String,
        timestamp: i64,
        data: HashMap<String, serde_json::Value>,
        source: String,
        priority: EventPriority,
    ) -> Self {
        Self {
            event_type,
            timestamp,
            data,
            source,
            priority,
            event_id: Uuid::new_v4().to_string(),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Event(type={}, source={}, priority={:?}, id={})",
            self.event_type,
            self.source,
            self.priority,
            &self.event_id[..8]
        )
    }
}

// ============================================================================
// Event Bus
// ============================================================================

type EventCallback = Arc<dyn Fn(Event) + Send + Sync>;

pub struct EventBus {
    tx: broadcast::Sender<Event>,
    subscribers: Arc<RwLock<HashMap<String, Vec<EventCallback>>>>,
    event_history: Arc<RwLock<Vec<Event>>>,
    max_history: usize,
    stats: Arc<RwLock<EventBusStats>>,
}

#[derive(Debug, Clone, Default)]
struct EventBusStats {
    total_published: u64,
    total_delivered: u64,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(1024);

        Self {
            tx,
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            event_history: Arc::new(RwLock::new(Vec::new())),
            max_history: 1000,
            stats: Arc::new(RwLock::new(EventBusStats::default())),
        }
    }

    /// Subscribe a callback to one event type.
    pub fn subscribe<F>(&self, event_type: &str, callback: F)
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        let mut subscribers = self.subscribers.write();
        subscribers
            .entry(event_type.to_string())
            .or_default()
            .push(Arc::new(callback));
    }

    /// Publish an event to the broadcast channel and all direct subscribers.
    pub fn publish(&self, event: Event) {
        {
            let mut stats = self.stats.write();
            stats.total_published += 1;
        }

        {
            let mut history = self.event_history.write();
            history.push(event.clone());
            if history.len() > self.max_history {
                history.remove(0);
            }
        }

        // Broadcast receivers may or may not exist; both are fine.
        let _ = self.tx.send(event.clone());

        let subscribers = self.subscribers.read();
        if let Some(callbacks) = subscribers.get(&event.event_type) {
            let mut stats = self.stats.write();
            for callback in callbacks {
                callback(event.clone());
                stats.total_delivered += 1;
            }
        }
    }

    /// Get a receiver for all events (broadcast channel).
    pub fn subscribe_channel(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Get recent events from history, newest first.
    pub fn get_recent_events(&self, event_type: Option<&str>, limit: Option<usize>) -> Vec<Event> {
        let history = self.event_history.read();
        let limit = limit.unwrap_or(100);

        let events: Vec<Event> = if let Some(et) = event_type {
            history.iter().filter(|e| e.event_type == et).cloned().collect()
        } else {
            history.iter().cloned().collect()
        };

        events.into_iter().rev().take(limit).collect()
    }

    /// Get event bus statistics.
    pub fn get_stats(&self) -> EventBusStatsSnapshot {
        let stats = self.stats.read();
        let subscribers = self.subscribers.read();
        let history = self.event_history.read();

        EventBusStatsSnapshot {
            total_published: stats.total_published,
            total_delivered: stats.total_delivered,
            subscriber_count: subscribers.values().map(|v| v.len()).sum(),
            history_size: history.len(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of event bus statistics.
#[derive(Debug, Clone)]
pub struct EventBusStatsSnapshot {
    pub total_published: u64,
    pub total_delivered: u64,
    pub subscriber_count: usize,
    pub history_size: usize,
}

// ============================================================================
// Global Event Bus (thread-safe singleton)
// ============================================================================

static GLOBAL_EVENT_BUS: OnceLock<Arc<EventBus>> = OnceLock::new();

/// Get global event bus instance (singleton).
pub fn get_event_bus() -> Arc<EventBus> {
    Arc::clone(GLOBAL_EVENT_BUS.get_or_init(|| Arc::new(EventBus::new())))
}

/// Publish event (convenience function).
pub fn publish_event(
    event_type: &str,
    timestamp: i64,
    data: HashMap<String, serde_json::Value>,
    source: &str,
    priority: EventPriority,
) {
    let bus = get_event_bus();
    let event = Event::new(
        event_type.to_string(),
        timestamp,
        data,
        source.to_string(),
        priority,
    );
    bus.publish(event);
}
