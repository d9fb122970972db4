//! Point/time accrual rules for a single chatter over a single run.

use serde::{Deserialize, Serialize};

pub const DEFAULT_BASE_POINTS: i64 = 2;
pub const DEFAULT_BASE_SUB_POINTS: i64 = 10;

/// Offline rates at or below this threshold grant no points.
pub const OFFLINE_RATE_THRESHOLD: f32 = 0.01;

/// Per-channel point rates with defaults already applied.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelRates {
    pub base_points: i64,
    pub base_sub_points: i64,
    pub offline_rate: f32,
}

impl ChannelRates {
    /// Builds rates from the raw channel overrides; non-positive or absent values fall back to
    /// the defaults.
    pub fn new(base_points: Option<i64>, base_sub_points: Option<i64>, offline_rate: f32) -> Self {
        Self {
            base_points: base_points
                .filter(|p| *p > 0)
                .unwrap_or(DEFAULT_BASE_POINTS),
            base_sub_points: base_sub_points
                .filter(|p| *p > 0)
                .unwrap_or(DEFAULT_BASE_SUB_POINTS),
            offline_rate,
        }
    }
}

impl Default for ChannelRates {
    fn default() -> Self {
        Self::new(None, None, 0.0)
    }
}

/// Increment applied to one ledger row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Accrual {
    pub points: i64,
    pub minutes_online: i64,
    pub minutes_offline: i64,
}

/// Computes the accrual for one chatter.
///
/// Exactly one of the minute counters is non-zero and it always equals `interval_minutes`.
pub fn evaluate(
    rates: &ChannelRates,
    online: bool,
    subscriber: bool,
    interval_minutes: i64,
) -> Accrual {
    let rate = if subscriber {
        rates.base_sub_points
    } else {
        rates.base_points
    };

    if online {
        return Accrual {
            points: rate,
            minutes_online: interval_minutes,
            minutes_offline: 0,
        };
    }

    let points = if rates.offline_rate > OFFLINE_RATE_THRESHOLD {
        // single-precision product, rounded half away from zero
        f64::from(rate as f32 * rates.offline_rate).round() as i64
    } else {
        0
    };

    Accrual {
        points,
        minutes_online: 0,
        minutes_offline: interval_minutes,
    }
}

/// Both possible accruals for a channel run, keyed on the subscriber flag of the target row.
///
/// Computed once per channel so the ledger can apply the right one per row inside a single
/// set-based statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccrualPlan {
    pub online: bool,
    pub regular: Accrual,
    pub subscriber: Accrual,
}

impl AccrualPlan {
    pub fn new(rates: &ChannelRates, online: bool, interval_minutes: i64) -> Self {
        Self {
            online,
            regular: evaluate(rates, online, false, interval_minutes),
            subscriber: evaluate(rates, online, true, interval_minutes),
        }
    }

    /// Accrual for an existing row, which carries its own subscriber flag.
    pub fn for_existing(&self, subscriber: bool) -> Accrual {
        if subscriber {
            self.subscriber
        } else {
            self.regular
        }
    }

    /// Accrual for a row created during this run. New rows are never subscribers, so a
    /// subscribing chatter is credited at the regular rate on first sighting.
    pub fn for_new(&self) -> Accrual {
        self.regular
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const INTERVAL: i64 = 10;

    #[test]
    fn test_online_regular_chatter() {
        let rates = ChannelRates::default();
        let accrual = evaluate(&rates, true, false, INTERVAL);

        assert_eq!(
            accrual,
            Accrual {
                points: 2,
                minutes_online: 10,
                minutes_offline: 0
            }
        );
    }

    #[test]
    fn test_online_subscriber() {
        let rates = ChannelRates::new(Some(3), Some(15), 0.0);
        let accrual = evaluate(&rates, true, true, INTERVAL);

        assert_eq!(accrual.points, 15);
        assert_eq!(accrual.minutes_online, INTERVAL);
        assert_eq!(accrual.minutes_offline, 0);
    }

    #[test]
    fn test_offline_subscriber_half_rate() {
        let rates = ChannelRates::new(None, Some(10), 0.5);
        let accrual = evaluate(&rates, false, true, INTERVAL);

        assert_eq!(
            accrual,
            Accrual {
                points: 5,
                minutes_online: 0,
                minutes_offline: 10
            }
        );
    }

    #[test]
    fn test_offline_rate_at_or_below_threshold_grants_nothing() {
        for offline_rate in [0.0, 0.005, 0.01] {
            let rates = ChannelRates::new(Some(1000), Some(5000), offline_rate);

            for subscriber in [false, true] {
                let accrual = evaluate(&rates, false, subscriber, INTERVAL);
                assert_eq!(accrual.points, 0, "rate {offline_rate}");
                assert_eq!(accrual.minutes_offline, INTERVAL);
                assert_eq!(accrual.minutes_online, 0);
            }
        }
    }

    #[test]
    fn test_offline_rounding_is_half_away_from_zero() {
        // 5 * 0.5 = 2.5 -> 3
        let rates = ChannelRates::new(Some(5), None, 0.5);
        assert_eq!(evaluate(&rates, false, false, INTERVAL).points, 3);

        // 3 * 0.5 = 1.5 -> 2
        let rates = ChannelRates::new(Some(3), None, 0.5);
        assert_eq!(evaluate(&rates, false, false, INTERVAL).points, 2);

        // 2 * 0.25 = 0.5 -> 1
        let rates = ChannelRates::new(Some(2), None, 0.25);
        assert_eq!(evaluate(&rates, false, false, INTERVAL).points, 1);

        // 2 * 0.2 = 0.4 -> 0
        let rates = ChannelRates::new(Some(2), None, 0.2);
        assert_eq!(evaluate(&rates, false, false, INTERVAL).points, 0);
    }

    #[test]
    fn test_non_positive_overrides_use_defaults() {
        let rates = ChannelRates::new(Some(0), Some(-4), 0.0);
        assert_eq!(rates.base_points, DEFAULT_BASE_POINTS);
        assert_eq!(rates.base_sub_points, DEFAULT_BASE_SUB_POINTS);
    }

    #[test]
    fn test_exactly_one_minute_counter_moves() {
        let rates = ChannelRates::new(Some(4), Some(8), 0.75);
        for online in [true, false] {
            for subscriber in [true, false] {
                let a = evaluate(&rates, online, subscriber, INTERVAL);
                assert_eq!(a.minutes_online + a.minutes_offline, INTERVAL);
                assert!(a.minutes_online == 0 || a.minutes_offline == 0);
                assert_eq!(a.minutes_online != 0, online);
            }
        }
    }

    #[test]
    fn test_plan_new_rows_use_regular_rate() {
        let rates = ChannelRates::new(Some(2), Some(10), 0.0);
        let plan = AccrualPlan::new(&rates, true, INTERVAL);

        assert_eq!(plan.for_new().points, 2);
        assert_eq!(plan.for_existing(true).points, 10);
        assert_eq!(plan.for_existing(false).points, 2);
    }
}
