//! Expiry Watchdog - countdowns and edge-triggered window expiry
//!
//! Per tracked interval: `Active -> Expired -> Handled`. The first tick that
//! sees a `(interval, window_end)` at or past its end records it and asks for
//! a refresh; later ticks for the same key are no-ops. All expiries landing
//! in one tick share a single refresh request.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::info;

use super::aggregator::AggregatedIntervalResult;
use crate::types::Interval;

/// Keys older than this are forgotten
const RECORD_RETENTION_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryState {
    Active,
    /// Crossed its end on this tick
    Expired,
    Handled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Countdown {
    pub interval: Interval,
    pub remaining_secs: i64,
    pub display: String,
    pub state: ExpiryState,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchdogTick {
    pub countdowns: Vec<Countdown>,
    pub expired: Vec<Interval>,
    /// One downstream refresh is due
    pub refresh_due: bool,
}

/// `H:MM:SS` from one hour up, `M:SS` below; negative clamps to zero
pub fn format_countdown(remaining_secs: i64) -> String {
    let secs = remaining_secs.max(0);
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{}:{:02}", m, s)
    }
}

/// De-duplication record keyed by `(interval, window_end)`
#[derive(Debug, Default)]
pub struct ExpiryWatchdog {
    handled: HashMap<(Interval, i64), DateTime<Utc>>,
}

impl ExpiryWatchdog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_handled(&self, interval: Interval, window_end: DateTime<Utc>) -> bool {
        self.handled
            .contains_key(&(interval, window_end.timestamp()))
    }

    pub fn tick(&mut self, now: DateTime<Utc>, results: &[AggregatedIntervalResult]) -> WatchdogTick {
        self.prune(now);

        let mut tick = WatchdogTick::default();
        for result in results {
            let remaining = (result.window_end - now).num_seconds();
            let key = (result.interval, result.window_end.timestamp());

            let state = if result.window_end > now {
                ExpiryState::Active
            } else if self.handled.contains_key(&key) {
                ExpiryState::Handled
            } else {
                self.handled.insert(key, result.window_end);
                tick.expired.push(result.interval);
                ExpiryState::Expired
            };

            tick.countdowns.push(Countdown {
                interval: result.interval,
                remaining_secs: remaining.max(0),
                display: format_countdown(remaining),
                state,
            });
        }

        if !tick.expired.is_empty() {
            tick.refresh_due = true;
            info!(expired = ?tick.expired, "⏰ Interval window expired");
        }
        tick
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let horizon = now - Duration::hours(RECORD_RETENTION_HOURS);
        self.handled.retain(|_, end| *end >= horizon);
    }

    pub fn clear(&mut self) {
        self.handled.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 12, h, m, s).unwrap()
    }

    fn result(interval: Interval, end: DateTime<Utc>) -> AggregatedIntervalResult {
        AggregatedIntervalResult {
            interval,
            label: "x",
            color: "#000000",
            open_price: dec!(1),
            close_price: None,
            traded_probability: dec!(50),
            primary_token_id: None,
            window_start: end - Duration::minutes(5),
            window_end: end,
        }
    }

    #[test]
    fn countdown_formats() {
        assert_eq!(format_countdown(1), "0:01");
        assert_eq!(format_countdown(299), "4:59");
        assert_eq!(format_countdown(3599), "59:59");
        assert_eq!(format_countdown(3600), "1:00:00");
        assert_eq!(format_countdown(86_399), "23:59:59");
        assert_eq!(format_countdown(-12), "0:00");
    }

    #[test]
    fn five_minute_countdown_one_second_before_end() {
        let mut watchdog = ExpiryWatchdog::new();
        let tick = watchdog.tick(at(13, 4, 59), &[result(Interval::Min5, at(13, 5, 0))]);
        assert_eq!(tick.countdowns[0].display, "0:01");
        assert_eq!(tick.countdowns[0].state, ExpiryState::Active);
        assert!(!tick.refresh_due);
    }

    #[test]
    fn sub_second_remaining_is_still_active() {
        let mut watchdog = ExpiryWatchdog::new();
        let results = [result(Interval::Min5, at(13, 5, 0))];

        let early = watchdog.tick(at(13, 5, 0) - Duration::milliseconds(400), &results);
        assert_eq!(early.countdowns[0].state, ExpiryState::Active);
        assert_eq!(early.countdowns[0].display, "0:00");
        assert!(!early.refresh_due);
        assert!(!watchdog.is_handled(Interval::Min5, at(13, 5, 0)));

        let on_boundary = watchdog.tick(at(13, 5, 0), &results);
        assert_eq!(on_boundary.countdowns[0].state, ExpiryState::Expired);
        assert!(on_boundary.refresh_due);
    }

    #[test]
    fn repeated_ticks_past_boundary_trigger_once() {
        let mut watchdog = ExpiryWatchdog::new();
        let results = [result(Interval::Min5, at(13, 5, 0))];

        let triggers = (0..10)
            .map(|i| watchdog.tick(at(13, 5, i), &results))
            .filter(|t| t.refresh_due)
            .count();
        assert_eq!(triggers, 1);
        assert!(watchdog.is_handled(Interval::Min5, at(13, 5, 0)));

        let later = watchdog.tick(at(13, 5, 30), &results);
        assert_eq!(later.countdowns[0].state, ExpiryState::Handled);
    }

    #[test]
    fn simultaneous_expiries_share_one_refresh() {
        let mut watchdog = ExpiryWatchdog::new();
        let results = [
            result(Interval::Min5, at(14, 0, 0)),
            result(Interval::Min15, at(14, 0, 0)),
            result(Interval::Hour1, at(14, 0, 0)),
        ];
        let tick = watchdog.tick(at(14, 0, 0), &results);
        assert!(tick.refresh_due);
        assert_eq!(tick.expired.len(), 3);
        assert!(!watchdog.tick(at(14, 0, 1), &results).refresh_due);
    }

    #[test]
    fn next_window_triggers_again() {
        let mut watchdog = ExpiryWatchdog::new();
        assert!(watchdog
            .tick(at(13, 5, 0), &[result(Interval::Min5, at(13, 5, 0))])
            .refresh_due);
        assert!(watchdog
            .tick(at(13, 10, 0), &[result(Interval::Min5, at(13, 10, 0))])
            .refresh_due);
    }

    #[test]
    fn old_keys_are_pruned() {
        let mut watchdog = ExpiryWatchdog::new();
        watchdog.tick(at(0, 5, 0), &[result(Interval::Min5, at(0, 5, 0))]);
        let next_day = at(0, 5, 0) + Duration::hours(25);
        watchdog.tick(next_day, &[]);
        assert!(!watchdog.is_handled(Interval::Min5, at(0, 5, 0)));
    }
}
