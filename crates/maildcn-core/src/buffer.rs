//! Bounded history buffers
//!
//! Every buffer is most-recent-first: insertion happens at the head and
//! eviction, for capped buffers, always drops the tail.

use maildcn_common::types::ProtocolEvent;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Capacity of the raw live feed
pub const LIVE_CAPACITY: usize = 100;

/// Capacity of the paced recent-events view
pub const RECENT_CAPACITY: usize = 10;

/// Shared handle to an event; the same event sits in several buffers
pub type EventRef = Arc<ProtocolEvent>;

/// Most-recent-first collection with head insert and tail eviction
#[derive(Debug, Clone)]
pub struct BoundedBuffer<T> {
    items: VecDeque<T>,
    capacity: Option<usize>,
}

impl<T> BoundedBuffer<T> {
    /// Buffer holding at most `capacity` items
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity: Some(capacity),
        }
    }

    /// Buffer without a cap
    pub fn unbounded() -> Self {
        Self {
            items: VecDeque::new(),
            capacity: None,
        }
    }

    /// Insert at the head, evicting from the tail when over capacity
    pub fn push(&mut self, item: T) {
        self.items.push_front(item);
        if let Some(cap) = self.capacity {
            self.items.truncate(cap);
        }
    }

    /// Most recently inserted item
    pub fn head(&self) -> Option<&T> {
        self.items.front()
    }

    /// Items, most recent first
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

/// The three views fed from the same event stream
#[derive(Debug, Clone)]
pub struct EventBuffers {
    live: BoundedBuffer<EventRef>,
    recent: BoundedBuffer<EventRef>,
    history: BoundedBuffer<EventRef>,
}

impl EventBuffers {
    pub fn new() -> Self {
        Self {
            live: BoundedBuffer::with_capacity(LIVE_CAPACITY),
            recent: BoundedBuffer::with_capacity(RECENT_CAPACITY),
            history: BoundedBuffer::unbounded(),
        }
    }

    /// Insert into the live feed and the session history
    pub fn push(&mut self, event: EventRef) {
        self.history.push(event.clone());
        self.live.push(event);
    }

    /// Insert into the session history only
    pub fn push_history(&mut self, event: EventRef) {
        self.history.push(event);
    }

    /// Insert into the paced recent-events view
    pub fn push_recent(&mut self, event: EventRef) {
        self.recent.push(event);
    }

    /// Empty all three buffers
    pub fn clear(&mut self) {
        self.live.clear();
        self.recent.clear();
        self.history.clear();
    }

    pub fn live(&self) -> &BoundedBuffer<EventRef> {
        &self.live
    }

    pub fn recent(&self) -> &BoundedBuffer<EventRef> {
        &self.recent
    }

    pub fn history(&self) -> &BoundedBuffer<EventRef> {
        &self.history
    }

    /// History entries for one protocol node, most recent first
    pub fn history_for(&self, node_id: &str) -> Vec<EventRef> {
        self.history
            .iter()
            .filter(|event| event.matches(node_id))
            .cloned()
            .collect()
    }

    /// Number of history entries per protocol (lowercased)
    pub fn protocol_counts(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for event in self.history.iter() {
            *counts
                .entry(event.protocol.trim().to_ascii_lowercase())
                .or_insert(0) += 1;
        }
        counts
    }
}

impl Default for EventBuffers {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn event(protocol: &str, n: usize) -> EventRef {
        Arc::new(ProtocolEvent::new(protocol, format!("STAGE_{n}"), format!("event {n}")))
    }

    #[test]
    fn test_capped_buffer_evicts_oldest() {
        let mut buffer = BoundedBuffer::with_capacity(3);
        for n in 1..=5 {
            buffer.push(n);
        }
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.head(), Some(&5));
        assert_eq!(buffer.iter().copied().collect::<Vec<_>>(), vec![5, 4, 3]);
    }

    #[test]
    fn test_unbounded_buffer_keeps_everything() {
        let mut buffer = BoundedBuffer::unbounded();
        for n in 0..1000 {
            buffer.push(n);
        }
        assert_eq!(buffer.len(), 1000);
        assert_eq!(buffer.capacity(), None);
        assert_eq!(buffer.iter().last(), Some(&0));
    }

    #[test]
    fn test_live_length_is_min_of_pushes_and_cap() {
        for total in [0usize, 1, 99, 100, 101, 250] {
            let mut buffers = EventBuffers::new();
            let mut last = None;
            for n in 0..total {
                let e = event("smtp", n);
                last = Some(e.clone());
                buffers.push(e);
            }
            assert_eq!(buffers.live().len(), total.min(LIVE_CAPACITY));
            assert_eq!(buffers.history().len(), total);
            if let Some(last) = last {
                assert!(Arc::ptr_eq(buffers.live().head().unwrap(), &last));
            }
        }
    }

    #[test]
    fn test_recent_is_independent_and_capped() {
        let mut buffers = EventBuffers::new();
        for n in 0..15 {
            buffers.push_recent(event("tls", n));
        }
        assert_eq!(buffers.recent().len(), RECENT_CAPACITY);
        assert!(buffers.live().is_empty());
        assert_eq!(buffers.recent().head().unwrap().stage, "STAGE_14");
    }

    #[test]
    fn test_clear_empties_all_views() {
        let mut buffers = EventBuffers::new();
        buffers.push(event("ai", 1));
        buffers.push_recent(event("ai", 1));
        buffers.clear();
        assert!(buffers.live().is_empty());
        assert!(buffers.recent().is_empty());
        assert!(buffers.history().is_empty());
    }

    #[test]
    fn test_history_drill_down_and_counts() {
        let mut buffers = EventBuffers::new();
        buffers.push(event("SMTP", 1));
        buffers.push(event("tls", 2));
        buffers.push(event("smtp", 3));
        buffers.push(event("mystery", 4));

        let smtp = buffers.history_for("smtp");
        assert_eq!(smtp.len(), 2);
        assert_eq!(smtp[0].stage, "STAGE_3");

        let counts = buffers.protocol_counts();
        assert_eq!(counts.get("smtp"), Some(&2));
        assert_eq!(counts.get("tls"), Some(&1));
        assert_eq!(counts.get("mystery"), Some(&1));
    }
}
