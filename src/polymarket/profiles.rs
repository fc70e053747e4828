//! Interval profiles for the prediction-market side
//!
//! Static per-interval metadata: crypto-price variant, discovery category,
//! display label and annotation color.

use serde::Serialize;

use crate::types::Interval;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IntervalProfile {
    pub interval: Interval,
    /// `variant` parameter of the crypto-price endpoint
    pub variant: &'static str,
    /// Gamma `tag_slug` used for market discovery
    pub category: &'static str,
    pub label: &'static str,
    pub color: &'static str,
}

pub const INTERVAL_PROFILES: &[IntervalProfile] = &[
    IntervalProfile {
        interval: Interval::Min5,
        variant: "fiveminute",
        category: "5M",
        label: "5m",
        color: "#52c41a",
    },
    IntervalProfile {
        interval: Interval::Min15,
        variant: "fifteen",
        category: "15M",
        label: "15m",
        color: "#1890ff",
    },
    IntervalProfile {
        interval: Interval::Hour1,
        variant: "hourly",
        category: "1H",
        label: "1h",
        color: "#fa8c16",
    },
    IntervalProfile {
        interval: Interval::Hour4,
        variant: "fourhour",
        category: "4h",
        label: "4h",
        color: "#eb2f96",
    },
    IntervalProfile {
        interval: Interval::Day1,
        variant: "daily",
        category: "daily",
        label: "1d",
        color: "#722ed1",
    },
];

pub fn profile(interval: Interval) -> Option<&'static IntervalProfile> {
    INTERVAL_PROFILES.iter().find(|p| p.interval == interval)
}
