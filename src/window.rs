//! Rolling per-user transaction counts.
//!
//! For a transaction on day `d`, counts the same user's transactions dated in
//! `[d - days, d - 1]`. Transactions on `d` itself are never counted, including
//! the transaction being scored.

use crate::model::{TransactionEvent, UserId};
use crate::temporal::days_before;
use rustc_hash::FxHashMap;
use time::Date;

/// Look-back window over the preceding `days` days
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RollingWindow {
    days: u32,
}

impl RollingWindow {
    pub fn new(days: u32) -> Self {
        Self { days }
    }

    pub fn days(&self) -> u32 {
        self.days
    }

    /// Count, for every event, the user's events inside its window.
    ///
    /// The returned vector is aligned with `events`.
    pub fn counts(&self, events: &[TransactionEvent]) -> Vec<u32> {
        let mut by_user: FxHashMap<&UserId, Vec<Date>> = FxHashMap::default();
        for event in events {
            by_user
                .entry(&event.user_id)
                .or_default()
                .push(event.occurred_on);
        }
        for dates in by_user.values_mut() {
            dates.sort_unstable();
        }

        events
            .iter()
            .map(|event| {
                let dates = &by_user[&event.user_id];
                let window_start = days_before(event.occurred_on, self.days);
                let upper = dates.partition_point(|day| *day < event.occurred_on);
                let lower = dates.partition_point(|day| *day < window_start);
                (upper - lower) as u32
            })
            .collect()
    }
}

impl Default for RollingWindow {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_WINDOW_DAYS)
    }
}
