//! Transient user-facing notices

use crate::buffer::BoundedBuffer;
use maildcn_common::Error;
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Notices kept at once
pub const NOTICE_CAPACITY: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
    pub created_at: Instant,
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self.level {
            NoticeLevel::Info => "info",
            NoticeLevel::Warning => "warn",
            NoticeLevel::Error => "error",
        };
        write!(f, "[{}] {}", tag, self.message)
    }
}

/// Short-lived notifications; failures never change other state
#[derive(Debug)]
pub struct Notices {
    items: BoundedBuffer<Notice>,
    ttl: Duration,
    pushed: u64,
}

impl Notices {
    pub fn new(ttl: Duration) -> Self {
        Self {
            items: BoundedBuffer::with_capacity(NOTICE_CAPACITY),
            ttl,
            pushed: 0,
        }
    }

    pub fn push(&mut self, level: NoticeLevel, message: impl Into<String>, now: Instant) {
        let message = message.into();
        match level {
            NoticeLevel::Info => info!("{}", message),
            NoticeLevel::Warning => warn!("{}", message),
            NoticeLevel::Error => error!("{}", message),
        }
        self.items.push(Notice {
            level,
            message,
            created_at: now,
        });
        self.pushed += 1;
    }

    /// Log and surface an error
    pub fn push_error(&mut self, err: &Error, now: Instant) {
        let level = if err.is_remote() {
            NoticeLevel::Warning
        } else {
            NoticeLevel::Error
        };
        self.push(level, err.to_string(), now);
    }

    /// Notices younger than the TTL, most recent first
    pub fn active(&self, now: Instant) -> impl Iterator<Item = &Notice> {
        let ttl = self.ttl;
        self.items
            .iter()
            .filter(move |notice| now.saturating_duration_since(notice.created_at) < ttl)
    }

    /// Drop expired notices
    pub fn prune(&mut self, now: Instant) {
        if self.items.iter().all(|n| now.saturating_duration_since(n.created_at) < self.ttl) {
            return;
        }
        let keep: Vec<Notice> = self.active(now).cloned().collect();
        self.items.clear();
        for notice in keep.into_iter().rev() {
            self.items.push(notice);
        }
    }

    /// When the oldest notice still held expires
    pub fn next_expiry(&self) -> Option<Instant> {
        self.items.iter().map(|n| n.created_at + self.ttl).min()
    }

    /// Notices pushed since creation, including expired and evicted ones
    pub fn pushed(&self) -> u64 {
        self.pushed
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notices_expire() {
        let start = Instant::now();
        let mut notices = Notices::new(Duration::from_secs(5));
        notices.push(NoticeLevel::Info, "first", start);
        notices.push(
            NoticeLevel::Warning,
            "second",
            start + Duration::from_secs(3),
        );

        let later = start + Duration::from_secs(6);
        let active: Vec<_> = notices.active(later).map(|n| n.message.as_str()).collect();
        assert_eq!(active, vec!["second"]);

        notices.prune(later);
        assert_eq!(notices.len(), 1);
    }

    #[test]
    fn test_next_expiry_tracks_oldest() {
        let start = Instant::now();
        let mut notices = Notices::new(Duration::from_secs(5));
        assert_eq!(notices.next_expiry(), None);

        notices.push(NoticeLevel::Info, "first", start);
        notices.push(NoticeLevel::Info, "first", start + Duration::from_secs(2));
        assert_eq!(notices.next_expiry(), Some(start + Duration::from_secs(5)));
        assert_eq!(notices.pushed(), 2);

        notices.prune(start + Duration::from_secs(5));
        assert_eq!(notices.next_expiry(), Some(start + Duration::from_secs(7)));
        notices.prune(start + Duration::from_secs(7));
        assert_eq!(notices.next_expiry(), None);
        assert_eq!(notices.pushed(), 2);
    }

    #[test]
    fn test_notices_are_capped() {
        let now = Instant::now();
        let mut notices = Notices::new(Duration::from_secs(5));
        for n in 0..8 {
            notices.push(NoticeLevel::Info, format!("n{n}"), now);
        }
        assert_eq!(notices.len(), NOTICE_CAPACITY);
        assert_eq!(notices.active(now).next().unwrap().message, "n7");
    }

    #[test]
    fn test_error_levels() {
        let now = Instant::now();
        let mut notices = Notices::new(Duration::from_secs(5));
        notices.push_error(&Error::Network("connection refused".into()), now);
        notices.push_error(&Error::Storage("disk full".into()), now);
        let levels: Vec<_> = notices.active(now).map(|n| n.level).collect();
        assert_eq!(levels, vec![NoticeLevel::Error, NoticeLevel::Warning]);
        assert_eq!(
            notices.active(now).last().unwrap().to_string(),
            "[warn] Network error: connection refused"
        );
    }
}
