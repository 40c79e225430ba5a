//! Time-sorted merged event stream.
//!
//! One `Event` carries a timestamp, symbol, and a kind-specific
//! payload; the queue discriminates at dispatch rather than keeping
//! per-kind channels, so loaders for different event kinds can be
//! called in any order and still produce one globally-ordered stream.

use crate::types::{Side, Symbol};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub enum EventKind {
    Trade { price: f64, amount: f64, side: Side },
    Depth { bids: Vec<(f64, f64)>, asks: Vec<(f64, f64)> },
    Funding { rate: f64 },
    Candle { open: f64, high: f64, low: f64, close: f64, volume: f64 },
}

#[derive(Debug, Clone)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub symbol: Symbol,
    pub kind: EventKind,
}

/// A merged, time-sorted sequence of events contributed by any loader.
/// Sorting is stable by timestamp so events with equal timestamps keep
/// their relative insertion order.
#[derive(Default)]
pub struct EventQueue {
    events: Vec<Event>,
    sorted: bool,
}

impl EventQueue {
    pub fn new() -> Self {
        Self { events: Vec::new(), sorted: true }
    }

    pub fn push(&mut self, event: Event) {
        if let Some(last) = self.events.last() {
            if event.timestamp < last.timestamp {
                self.sorted = false;
            }
        }
        self.events.push(event);
    }

    pub fn extend(&mut self, events: impl IntoIterator<Item = Event>) {
        for e in events {
            self.push(e);
        }
    }

    pub fn sort(&mut self) {
        if !self.sorted {
            self.events.sort_by_key(|e| e.timestamp);
            self.sorted = true;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.sorted = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(ms: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(ms).unwrap()
    }

    #[test]
    fn sort_is_stable_for_equal_timestamps() {
        let mut q = EventQueue::new();
        q.push(Event { timestamp: ts(5), symbol: Symbol::new("A"), kind: EventKind::Funding { rate: 0.1 } });
        q.push(Event { timestamp: ts(1), symbol: Symbol::new("B"), kind: EventKind::Funding { rate: 0.2 } });
        q.push(Event { timestamp: ts(1), symbol: Symbol::new("C"), kind: EventKind::Funding { rate: 0.3 } });
        q.sort();

        let symbols: Vec<&str> = q.iter().map(|e| e.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["B", "C", "A"]);
    }
}
