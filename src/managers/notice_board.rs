//! Notice Board for Linkshelf.
//!
//! Holds the single transient notice shown to the user. A notice is visible
//! for a fixed window after it is set; setting another replaces it and
//! restarts the window. Time is read from `tokio::time` so tests can drive it
//! with a paused clock.

use std::time::Duration;

use tokio::time::Instant;

use crate::types::notice::Notice;

/// Default visibility window for a notice.
pub const DEFAULT_NOTICE_TTL: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub struct NoticeBoard {
    ttl: Duration,
    current: Option<(Notice, Instant)>,
}

impl NoticeBoard {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, current: None }
    }

    /// Shows `notice`, replacing any previous one. Returns when it expires.
    pub fn set(&mut self, notice: Notice) -> Instant {
        let now = Instant::now();
        self.current = Some((notice, now));
        now + self.ttl
    }

    /// The notice, if it is still inside its visibility window.
    pub fn current(&self) -> Option<&Notice> {
        match &self.current {
            Some((notice, set_at)) if set_at.elapsed() < self.ttl => Some(notice),
            _ => None,
        }
    }

    /// Drops an expired notice. Returns `true` if one was removed.
    pub fn prune(&mut self) -> bool {
        let expired = matches!(&self.current, Some((_, set_at)) if set_at.elapsed() >= self.ttl);
        if expired {
            self.current = None;
        }
        expired
    }
}
