//! Period Aligner - exchange-aligned reporting windows
//!
//! Computes the start/end instant of the currently active window for an
//! interval. Most intervals are epoch-aligned; some prediction-market
//! intervals roll over at an anchor hour instead (4h at 01:00 UTC, daily at
//! 17:00 UTC). Each aligner carries its own immutable rule table so the
//! exchange side and the prediction side can disagree about a boundary.

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::types::Interval;

const HOUR: i64 = 3600;
const DAY: i64 = 24 * HOUR;

/// How an interval's boundaries sit relative to the unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignmentRule {
    /// Boundaries at every multiple of the duration since the epoch
    Uniform,
    /// Boundaries shifted forward from the epoch grid by `anchor_secs`
    Offset { anchor_secs: i64 },
}

impl AlignmentRule {
    pub const fn anchored_at_hour(hour: i64) -> Self {
        AlignmentRule::Offset {
            anchor_secs: hour * HOUR,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AlignError {
    #[error("interval {0} is not supported by this aligner")]
    UnsupportedInterval(Interval),
}

/// The currently active reporting window for an interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct IntervalWindow {
    pub interval: Interval,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl IntervalWindow {
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }
}

/// Prediction-market boundaries
pub const PREDICTION_MARKET_RULES: &[(Interval, AlignmentRule)] = &[
    (Interval::Min5, AlignmentRule::Uniform),
    (Interval::Min15, AlignmentRule::Uniform),
    (Interval::Hour1, AlignmentRule::Uniform),
    (Interval::Hour4, AlignmentRule::anchored_at_hour(1)),
    (Interval::Day1, AlignmentRule::anchored_at_hour(17)),
];

/// Exchange candle boundaries (the epoch is a Thursday, weeks open Monday)
pub const EXCHANGE_RULES: &[(Interval, AlignmentRule)] = &[
    (Interval::Min1, AlignmentRule::Uniform),
    (Interval::Min3, AlignmentRule::Uniform),
    (Interval::Min5, AlignmentRule::Uniform),
    (Interval::Min15, AlignmentRule::Uniform),
    (Interval::Min30, AlignmentRule::Uniform),
    (Interval::Hour1, AlignmentRule::Uniform),
    (Interval::Hour2, AlignmentRule::Uniform),
    (Interval::Hour4, AlignmentRule::Uniform),
    (Interval::Hour6, AlignmentRule::Uniform),
    (Interval::Hour8, AlignmentRule::Uniform),
    (Interval::Hour12, AlignmentRule::Uniform),
    (Interval::Day1, AlignmentRule::Uniform),
    (Interval::Day3, AlignmentRule::Uniform),
    (Interval::Week1, AlignmentRule::Offset { anchor_secs: 4 * DAY }),
];

/// Pure window calculator over an injected rule table
#[derive(Debug, Clone, Copy)]
pub struct PeriodAligner {
    rules: &'static [(Interval, AlignmentRule)],
}

impl PeriodAligner {
    pub const fn new(rules: &'static [(Interval, AlignmentRule)]) -> Self {
        Self { rules }
    }

    pub const fn prediction_market() -> Self {
        Self::new(PREDICTION_MARKET_RULES)
    }

    pub const fn exchange() -> Self {
        Self::new(EXCHANGE_RULES)
    }

    pub fn supports(&self, interval: Interval) -> bool {
        self.rule(interval).is_some()
    }

    fn rule(&self, interval: Interval) -> Option<AlignmentRule> {
        self.rules
            .iter()
            .find(|(iv, _)| *iv == interval)
            .map(|(_, rule)| *rule)
    }

    fn duration(&self, interval: Interval) -> Result<(i64, AlignmentRule), AlignError> {
        let rule = self
            .rule(interval)
            .ok_or(AlignError::UnsupportedInterval(interval))?;
        let duration = interval
            .duration_secs()
            .ok_or(AlignError::UnsupportedInterval(interval))?;
        Ok((duration, rule))
    }

    /// Window start (unix seconds) for the window containing `now_secs`
    pub fn window_start(&self, interval: Interval, now_secs: i64) -> Result<i64, AlignError> {
        let (duration, rule) = self.duration(interval)?;
        let start = match rule {
            AlignmentRule::Uniform => now_secs - now_secs.rem_euclid(duration),
            AlignmentRule::Offset { anchor_secs } => {
                // Rotate so the anchor sits on the epoch grid, floor, rotate back
                let rotated = now_secs - anchor_secs;
                let mut start = rotated - rotated.rem_euclid(duration) + anchor_secs;
                if start > now_secs {
                    start -= duration;
                }
                start
            }
        };
        Ok(start)
    }

    /// The window active at `now`
    pub fn current_window(
        &self,
        interval: Interval,
        now: DateTime<Utc>,
    ) -> Result<IntervalWindow, AlignError> {
        let (duration, _) = self.duration(interval)?;
        let start = self.window_start(interval, now.timestamp())?;
        let start = to_instant(start, interval)?;
        let end = to_instant(start.timestamp() + duration, interval)?;
        Ok(IntervalWindow {
            interval,
            start,
            end,
        })
    }
}

impl Default for PeriodAligner {
    fn default() -> Self {
        Self::prediction_market()
    }
}

fn to_instant(secs: i64, interval: Interval) -> Result<DateTime<Utc>, AlignError> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or(AlignError::UnsupportedInterval(interval))
}
