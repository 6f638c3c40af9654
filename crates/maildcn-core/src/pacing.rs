//! Paced insertion into the recent-events view
//!
//! Events reach the recent view a little after they arrive so a human can
//! follow them. Pending insertions are owned here rather than by detached
//! timers, so clearing or dropping the pacer cancels them.

use crate::buffer::EventRef;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

pub const MIN_SPEED: f64 = 0.1;
pub const MAX_SPEED: f64 = 10.0;

/// Delayed-insertion queue
#[derive(Debug)]
pub struct Pacer {
    base_delay: Duration,
    speed: f64,
    pending: VecDeque<(Instant, EventRef)>,
}

impl Pacer {
    pub fn new(base_delay: Duration, speed: f64) -> Self {
        Self {
            base_delay,
            speed: clamp_speed(speed),
            pending: VecDeque::new(),
        }
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Change the speed multiplier; returns the clamped value actually used.
    /// Already scheduled insertions keep their deadline.
    pub fn set_speed(&mut self, speed: f64) -> f64 {
        self.speed = clamp_speed(speed);
        self.speed
    }

    /// Effective delay at the current speed
    pub fn delay(&self) -> Duration {
        self.base_delay.div_f64(self.speed)
    }

    /// Schedule an event for insertion `delay()` after `now`
    pub fn schedule(&mut self, event: EventRef, now: Instant) {
        let due = now + self.delay();
        // Speed changes can make a new deadline earlier than queued ones.
        let pos = self
            .pending
            .iter()
            .rposition(|(at, _)| *at <= due)
            .map_or(0, |i| i + 1);
        self.pending.insert(pos, (due, event));
    }

    /// Remove and return every event due at `now`, oldest deadline first
    pub fn drain_due(&mut self, now: Instant) -> Vec<EventRef> {
        let mut due = Vec::new();
        while let Some((at, _)) = self.pending.front() {
            if *at > now {
                break;
            }
            if let Some((_, event)) = self.pending.pop_front() {
                due.push(event);
            }
        }
        due
    }

    /// Earliest pending deadline
    pub fn next_due(&self) -> Option<Instant> {
        self.pending.front().map(|(at, _)| *at)
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Drop every pending insertion
    pub fn cancel_all(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }
}

fn clamp_speed(speed: f64) -> f64 {
    if speed.is_nan() {
        return 1.0;
    }
    speed.clamp(MIN_SPEED, MAX_SPEED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use maildcn_common::types::ProtocolEvent;
    use std::sync::Arc;

    fn event(stage: &str) -> EventRef {
        Arc::new(ProtocolEvent::new("smtp", stage, ""))
    }

    #[test]
    fn test_delay_scales_with_speed() {
        let mut pacer = Pacer::new(Duration::from_millis(1000), 1.0);
        assert_eq!(pacer.delay(), Duration::from_millis(1000));
        pacer.set_speed(2.0);
        assert_eq!(pacer.delay(), Duration::from_millis(500));
        assert_eq!(pacer.set_speed(100.0), MAX_SPEED);
        assert_eq!(pacer.set_speed(0.0), MIN_SPEED);
        assert_eq!(pacer.set_speed(f64::NAN), 1.0);
    }

    #[test]
    fn test_drain_only_due_events() {
        let start = Instant::now();
        let mut pacer = Pacer::new(Duration::from_millis(1000), 1.0);
        pacer.schedule(event("A"), start);
        pacer.schedule(event("B"), start + Duration::from_millis(400));

        assert!(pacer.drain_due(start + Duration::from_millis(999)).is_empty());

        let due = pacer.drain_due(start + Duration::from_millis(1000));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].stage, "A");
        assert_eq!(pacer.next_due(), Some(start + Duration::from_millis(1400)));
    }

    #[test]
    fn test_faster_speed_keeps_deadlines_ordered() {
        let start = Instant::now();
        let mut pacer = Pacer::new(Duration::from_millis(1000), 1.0);
        pacer.schedule(event("slow"), start);
        pacer.set_speed(4.0);
        pacer.schedule(event("fast"), start);

        let due = pacer.drain_due(start + Duration::from_millis(2000));
        let stages: Vec<_> = due.iter().map(|e| e.stage.as_str()).collect();
        assert_eq!(stages, vec!["fast", "slow"]);
    }

    #[test]
    fn test_cancel_all() {
        let start = Instant::now();
        let mut pacer = Pacer::new(Duration::from_millis(10), 1.0);
        pacer.schedule(event("A"), start);
        pacer.schedule(event("B"), start);
        assert_eq!(pacer.cancel_all(), 2);
        assert!(pacer.next_due().is_none());
        assert!(pacer.drain_due(start + Duration::from_secs(5)).is_empty());
    }
}
