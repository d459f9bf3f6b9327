//! Logical clock driving [`JobScheduler::tick`](super::JobScheduler::tick).

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::warn;

/// Most logical ticks replayed in one call before the clock skips ahead.
const MAX_CATCH_UP: usize = 60;

/// Hands out every logical tick between wake-ups.
///
/// The wall clock is only used to tell how far to advance. A wake-up that
/// arrives late still yields each tick it slept through, so no second (and
/// no frequency boundary) is skipped. A gap longer than [`MAX_CATCH_UP`]
/// ticks, e.g. after a suspend, is dropped instead of replayed.
#[derive(Debug, Clone)]
pub struct Ticker {
    next: DateTime<Utc>,
    step: chrono::Duration,
}

impl Ticker {
    /// Start at the whole second containing `start`.
    pub fn new(start: DateTime<Utc>, interval: Duration) -> Self {
        let step = chrono::Duration::from_std(interval)
            .unwrap_or_else(|_| chrono::Duration::seconds(1))
            .max(chrono::Duration::milliseconds(1));
        Self {
            next: whole_second(start),
            step,
        }
    }

    /// Next logical tick to be handed out.
    pub fn next_tick(&self) -> DateTime<Utc> {
        self.next
    }

    /// Every logical tick at or before `now`, in order.
    pub fn advance(&mut self, now: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        let mut ticks = Vec::new();
        while self.next <= now {
            if ticks.len() == MAX_CATCH_UP {
                warn!(
                    behind_ms = (now - self.next).num_milliseconds(),
                    "ticker fell behind, skipping ahead"
                );
                self.next = whole_second(now) + self.step;
                break;
            }
            ticks.push(self.next);
            self.next += self.step;
        }
        ticks
    }
}

fn whole_second(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(at.timestamp(), 0).unwrap_or(at)
}
