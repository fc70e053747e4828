//! Candle Stream Merger - bulk load + push delta reconciliation
//!
//! The buffer is a bounded sliding window sized to the bulk load. Deltas
//! either rewrite the last candle (same window), slide the window forward
//! by one (new window) or are dropped (empty buffer, stale time, or a
//! subscription generation that has already been torn down).

use std::collections::VecDeque;
use std::fmt;

use tracing::debug;

use crate::types::{Candle, SymbolKey};

/// Monotonic token identifying one (symbol, interval) subscription
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionGeneration(pub u64);

impl SubscriptionGeneration {
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SubscriptionGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen#{}", self.0)
    }
}

/// Push delta tagged with the subscription that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KlineEvent {
    pub generation: SubscriptionGeneration,
    pub candle: Candle,
    /// Exchange flagged the window as closed
    pub closed: bool,
}

/// What a merge did to the buffer, consumed by the render path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandleUpdate {
    /// Buffer replaced wholesale
    Reloaded,
    /// Last candle rewritten in place
    ReplacedLast(Candle),
    /// Oldest candle evicted, new candle appended
    Appended { appended: Candle, evicted: Option<Candle> },
    /// Nothing changed
    Ignored(IgnoreReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    EmptyBuffer,
    OutOfOrder,
    StaleSubscription,
}

impl CandleUpdate {
    pub fn is_change(&self) -> bool {
        !matches!(self, CandleUpdate::Ignored(_))
    }
}

/// Ordered, gap-free candle buffer for one subscription
#[derive(Debug, Default)]
pub struct CandleStream {
    key: Option<SymbolKey>,
    generation: SubscriptionGeneration,
    buffer: VecDeque<Candle>,
}

impl CandleStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(&self) -> Option<SymbolKey> {
        self.key
    }

    pub fn generation(&self) -> SubscriptionGeneration {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.buffer.back()
    }

    pub fn candles(&self) -> Vec<Candle> {
        self.buffer.iter().cloned().collect()
    }

    /// First and last candle time, used as the horizontal span of annotation lines
    pub fn time_range(&self) -> Option<(i64, i64)> {
        Some((self.buffer.front()?.time, self.buffer.back()?.time))
    }

    /// Drop the buffer and adopt a new subscription; deltas from older
    /// generations become no-ops from here on
    pub fn reset(&mut self, key: SymbolKey, generation: SubscriptionGeneration) {
        self.key = Some(key);
        self.generation = generation;
        self.buffer.clear();
    }

    /// Replace the buffer with a bulk load
    ///
    /// Input is normalised to strictly increasing `time` (later duplicates win)
    /// so the buffer invariant holds even for a sloppy provider.
    pub fn load(&mut self, generation: SubscriptionGeneration, mut bulk: Vec<Candle>) -> CandleUpdate {
        if generation != self.generation {
            debug!(
                stale = %generation,
                current = %self.generation,
                "Dropping bulk load from torn-down subscription"
            );
            return CandleUpdate::Ignored(IgnoreReason::StaleSubscription);
        }

        bulk.sort_by_key(|c| c.time);
        let mut buffer: VecDeque<Candle> = VecDeque::with_capacity(bulk.len());
        for candle in bulk {
            match buffer.back_mut() {
                Some(last) if last.time == candle.time => *last = candle,
                _ => buffer.push_back(candle),
            }
        }
        self.buffer = buffer;
        CandleUpdate::Reloaded
    }

    /// Merge one push delta
    pub fn apply(&mut self, event: KlineEvent) -> CandleUpdate {
        if event.generation != self.generation {
            debug!(
                stale = %event.generation,
                current = %self.generation,
                time = event.candle.time,
                "Dropping delta from torn-down subscription"
            );
            return CandleUpdate::Ignored(IgnoreReason::StaleSubscription);
        }
        self.apply_delta(event.candle)
    }

    /// Merge a delta for the current subscription
    pub fn apply_delta(&mut self, candle: Candle) -> CandleUpdate {
        let Some(last) = self.buffer.back_mut() else {
            return CandleUpdate::Ignored(IgnoreReason::EmptyBuffer);
        };

        if candle.time == last.time {
            *last = candle.clone();
            CandleUpdate::ReplacedLast(candle)
        } else if candle.time > last.time {
            let evicted = self.buffer.pop_front();
            self.buffer.push_back(candle.clone());
            CandleUpdate::Appended {
                appended: candle,
                evicted,
            }
        } else {
            CandleUpdate::Ignored(IgnoreReason::OutOfOrder)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Interval;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn candle(time: i64, close: Decimal) -> Candle {
        Candle {
            time,
            open: dec!(100),
            high: close.max(dec!(100)),
            low: close.min(dec!(100)),
            close,
            volume: dec!(1.5),
        }
    }

    fn loaded(times: &[i64]) -> CandleStream {
        let mut stream = CandleStream::new();
        let gen = SubscriptionGeneration(1);
        stream.reset(
            SymbolKey {
                symbol: "BTCUSDT",
                interval: Interval::Min1,
            },
            gen,
        );
        stream.load(gen, times.iter().map(|&t| candle(t, dec!(100))).collect());
        stream
    }

    #[test]
    fn same_window_delta_replaces_last() {
        let mut stream = loaded(&[100, 200]);
        let update = stream.apply_delta(candle(200, dec!(105)));

        assert_eq!(update, CandleUpdate::ReplacedLast(candle(200, dec!(105))));
        assert_eq!(stream.len(), 2);
        assert_eq!(stream.candles()[0].time, 100);
        assert_eq!(stream.last().unwrap().close, dec!(105));
    }

    #[test]
    fn new_window_delta_slides_the_buffer() {
        let mut stream = loaded(&[100, 200]);
        stream.apply_delta(candle(200, dec!(105)));
        let update = stream.apply_delta(candle(300, dec!(99)));

        match update {
            CandleUpdate::Appended { appended, evicted } => {
                assert_eq!(appended.time, 300);
                assert_eq!(evicted.map(|c| c.time), Some(100));
            }
            other => panic!("expected append, got {other:?}"),
        }
        let times: Vec<i64> = stream.candles().iter().map(|c| c.time).collect();
        assert_eq!(times, vec![200, 300]);
        assert_eq!(stream.candles()[0].close, dec!(105));
    }

    #[test]
    fn older_delta_is_ignored() {
        let mut stream = loaded(&[100, 200]);
        let before = stream.candles();
        assert_eq!(
            stream.apply_delta(candle(150, dec!(1))),
            CandleUpdate::Ignored(IgnoreReason::OutOfOrder)
        );
        assert_eq!(stream.candles(), before);
    }

    #[test]
    fn delta_before_any_load_is_ignored() {
        let mut stream = CandleStream::new();
        assert_eq!(
            stream.apply_delta(candle(100, dec!(1))),
            CandleUpdate::Ignored(IgnoreReason::EmptyBuffer)
        );
        assert!(stream.is_empty());
    }

    #[test]
    fn boundary_update_then_next_window_never_double_counts() {
        let mut stream = loaded(&[0, 60, 120]);
        // final tick of the 120 window, then the first tick of 180, then a late 120 tick
        stream.apply_delta(candle(120, dec!(101)));
        stream.apply_delta(candle(180, dec!(102)));
        stream.apply_delta(candle(120, dec!(103)));

        let times: Vec<i64> = stream.candles().iter().map(|c| c.time).collect();
        assert_eq!(times, vec![60, 120, 180]);
        assert_eq!(stream.candles()[1].close, dec!(101));
    }

    #[test]
    fn length_never_grows_past_bulk_size() {
        let mut stream = loaded(&[0, 60, 120]);
        for i in 3..50 {
            stream.apply_delta(candle(i * 60, dec!(100)));
            stream.apply_delta(candle(i * 60, dec!(101)));
            assert_eq!(stream.len(), 3);
        }
        assert_eq!(stream.time_range(), Some((47 * 60, 49 * 60)));
    }

    #[test]
    fn stale_generation_is_a_no_op() {
        let mut stream = loaded(&[100, 200]);
        let old = stream.generation();
        stream.reset(
            SymbolKey {
                symbol: "ETHUSDT",
                interval: Interval::Min1,
            },
            old.next(),
        );
        stream.load(old.next(), vec![candle(1000, dec!(1))]);

        let update = stream.apply(KlineEvent {
            generation: old,
            candle: candle(2000, dec!(2)),
            closed: false,
        });
        assert_eq!(update, CandleUpdate::Ignored(IgnoreReason::StaleSubscription));
        assert_eq!(stream.load(old, vec![]), CandleUpdate::Ignored(IgnoreReason::StaleSubscription));
        assert_eq!(stream.len(), 1);
    }

    #[test]
    fn bulk_load_is_normalised() {
        let stream = loaded(&[300, 100, 200, 200]);
        let times: Vec<i64> = stream.candles().iter().map(|c| c.time).collect();
        assert_eq!(times, vec![100, 200, 300]);
    }
}
