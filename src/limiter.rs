use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;
use tracing::debug;

/// Trailing-time-span event counter.
///
/// Events are held newest-first; stale entries are lazily purged from
/// the tail on every `count`/`increment` call. There are no error
/// conditions: the counter always succeeds.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    span: Duration,
    events: VecDeque<DateTime<Utc>>,
}

impl RollingWindow {
    pub fn new(span: Duration) -> Self {
        Self {
            span,
            events: VecDeque::new(),
        }
    }

    /// Rebuilds a window from persisted event timestamps (newest first),
    /// so a process restart does not reset the budget.
    pub fn restore(span: Duration, events: Vec<DateTime<Utc>>) -> Self {
        Self {
            span,
            events: events.into(),
        }
    }

    pub fn span(&self) -> Duration {
        self.span
    }

    /// Records one event at `now` and returns the updated count.
    pub fn increment(&mut self, now: DateTime<Utc>) -> usize {
        self.events.push_front(now);
        self.count(now)
    }

    /// Returns the number of events inside the trailing span, pruning
    /// anything older on the way.
    pub fn count(&mut self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.span;
        while let Some(oldest) = self.events.back() {
            if *oldest <= cutoff {
                self.events.pop_back();
            } else {
                break;
            }
        }
        self.events.len()
    }

    /// Event timestamps, newest first, for persistence.
    pub fn events(&self) -> Vec<DateTime<Utc>> {
        self.events.iter().copied().collect()
    }
}

/// Category of an API request, used to decide which budget ceiling
/// applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// The always-attempted fetch for the current top of hour.
    Live,
    /// A catch-up fetch issued by the backfill walker.
    Backfill,
}

// Headroom withheld from backfill so a live request fits every hour of
// the day even when backfill has used its whole share.
const LIVE_RESERVE_PER_HOUR: usize = 1;
const LIVE_RESERVE_PER_DAY: usize = 24;

/// Dual rolling-window request budget: a trailing-hour ceiling and a
/// trailing-day ceiling, shared by live and backfill requests for one
/// location.
#[derive(Debug)]
pub struct RateLimiter {
    hour_window: RollingWindow,
    day_window: RollingWindow,
    hour_limit: usize,
    day_limit: usize,
}

impl RateLimiter {
    pub fn new(hour_limit: usize, day_limit: usize) -> Self {
        Self {
            hour_window: RollingWindow::new(Duration::hours(1)),
            day_window: RollingWindow::new(Duration::days(1)),
            hour_limit,
            day_limit,
        }
    }

    /// Whether a request of `kind` may be issued right now. Denial is
    /// not an error; the caller simply skips the fetch and retries on a
    /// later cycle.
    pub fn allows(&mut self, kind: RequestKind, now: DateTime<Utc>) -> bool {
        let (hour_ceiling, day_ceiling) = match kind {
            RequestKind::Live => (self.hour_limit, self.day_limit),
            RequestKind::Backfill => (
                self.hour_limit.saturating_sub(LIVE_RESERVE_PER_HOUR),
                self.day_limit.saturating_sub(LIVE_RESERVE_PER_DAY),
            ),
        };

        let allowed = self.hour_window.count(now) < hour_ceiling
            && self.day_window.count(now) < day_ceiling;
        if !allowed {
            debug!(
                hour_count = self.hour_window.count(now),
                day_count = self.day_window.count(now),
                ?kind,
                "request budget exhausted"
            );
        }
        allowed
    }

    /// Records one attempted request against both windows. The limiter
    /// tracks requests attempted, not successes, so this is called for
    /// every permitted fetch regardless of its outcome.
    pub fn record(&mut self, now: DateTime<Utc>) {
        self.hour_window.increment(now);
        self.day_window.increment(now);
    }

    pub fn hour_count(&mut self, now: DateTime<Utc>) -> usize {
        self.hour_window.count(now)
    }

    pub fn day_count(&mut self, now: DateTime<Utc>) -> usize {
        self.day_window.count(now)
    }

    pub fn hour_events(&self) -> Vec<DateTime<Utc>> {
        self.hour_window.events()
    }

    pub fn day_events(&self) -> Vec<DateTime<Utc>> {
        self.day_window.events()
    }

    /// Replaces both event lists with persisted ones.
    pub fn restore_events(
        &mut self,
        hour_events: Vec<DateTime<Utc>>,
        day_events: Vec<DateTime<Utc>>,
    ) {
        self.hour_window = RollingWindow::restore(Duration::hours(1), hour_events);
        self.day_window = RollingWindow::restore(Duration::days(1), day_events);
    }
}
