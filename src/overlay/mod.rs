//! Overlay module - prediction-market annotations over the candle chart
//!
//! Aggregates per-interval market state, watches for window expiry and owns
//! the merged set of annotation lines.

mod aggregator;
mod ledger;
mod watchdog;

pub use aggregator::{
    apply_probability_updates, AggregatedIntervalResult, MultiIntervalAggregator,
    ProbabilityUpdate,
};
pub use ledger::{
    AnnotationLedger, AnnotationLine, LedgerChange, LineId, LineStyle, UserEditReport,
    POLYMARKET_NAMESPACE,
};
pub use watchdog::{format_countdown, Countdown, ExpiryState, ExpiryWatchdog, WatchdogTick};
