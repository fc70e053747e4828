//! Driving clock - one timer, several cadences
//!
//! Every periodic consumer (expiry watchdog, ticker poll, aggregation poll,
//! probability poll) hangs off a single tokio interval through its own tick
//! counter, so cancelling the loop cancels all of them.

use std::time::Duration;

use tokio::time::{self, Interval as TokioInterval, MissedTickBehavior};

use crate::config::ScheduleConfig;

/// Fires once every `every` ticks
#[derive(Debug, Clone, Copy)]
struct Cadence {
    every: u32,
    count: u32,
}

impl Cadence {
    fn new(every: u32) -> Self {
        Self {
            every: every.max(1),
            count: 0,
        }
    }

    fn step(&mut self) -> bool {
        self.count += 1;
        if self.count >= self.every {
            self.count = 0;
            true
        } else {
            false
        }
    }
}

/// Consumers due on one tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClockEvents {
    pub tick: u64,
    pub expiry: bool,
    pub ticker: bool,
    pub aggregation: bool,
    pub probability: bool,
}

#[derive(Debug)]
pub struct DrivingClock {
    period: Duration,
    timer: TokioInterval,
    ticks: u64,
    ticker: Cadence,
    aggregation: Cadence,
    probability: Cadence,
}

impl DrivingClock {
    pub fn new(schedule: &ScheduleConfig) -> Self {
        let period = Duration::from_millis(schedule.tick_ms.max(1));
        Self {
            period,
            timer: Self::timer(period),
            ticks: 0,
            ticker: Cadence::new(schedule.ticker_every_ticks),
            aggregation: Cadence::new(schedule.aggregation_every_ticks),
            probability: Cadence::new(schedule.probability_every_ticks),
        }
    }

    fn timer(period: Duration) -> TokioInterval {
        let mut timer = time::interval_at(time::Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        timer
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Wait for the next tick
    pub async fn tick(&mut self) -> ClockEvents {
        self.timer.tick().await;
        self.advance()
    }

    /// Count one tick without waiting
    pub fn advance(&mut self) -> ClockEvents {
        self.ticks += 1;
        ClockEvents {
            tick: self.ticks,
            expiry: true,
            ticker: self.ticker.step(),
            aggregation: self.aggregation.step(),
            probability: self.probability.step(),
        }
    }

    /// Restart every cadence from zero, e.g. after a session switch
    pub fn reset(&mut self) {
        self.ticker.count = 0;
        self.aggregation.count = 0;
        self.probability.count = 0;
        self.timer = Self::timer(self.period);
    }
}
