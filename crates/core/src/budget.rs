//! Budget guard: windowed counters over model spend and call rate. Any
//! breach flips a process-wide switch observed before every model call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use tracing::warn;

use crate::config::BudgetConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Metric {
    TokensPerHour,
    TokensPerDay,
    CostPerDayCents,
    RequestsPerMinute,
    ErrorsPerHour,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TokensPerHour => "tokens_per_hour",
            Self::TokensPerDay => "tokens_per_day",
            Self::CostPerDayCents => "cost_per_day_cents",
            Self::RequestsPerMinute => "requests_per_minute",
            Self::ErrorsPerHour => "errors_per_hour",
        }
    }

    fn window(&self) -> WindowKind {
        match self {
            Self::RequestsPerMinute => WindowKind::Minute,
            Self::TokensPerHour | Self::ErrorsPerHour => WindowKind::Hour,
            Self::TokensPerDay | Self::CostPerDayCents => WindowKind::Day,
        }
    }

    /// The daily cost cap is a hard stop: it does not recover when its
    /// window rolls over, only on explicit administrative reset.
    fn recovers_automatically(&self) -> bool {
        !matches!(self, Self::CostPerDayCents)
    }

    const ALL: [Metric; 5] = [
        Metric::TokensPerHour,
        Metric::TokensPerDay,
        Metric::CostPerDayCents,
        Metric::RequestsPerMinute,
        Metric::ErrorsPerHour,
    ];
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WindowKind {
    Minute,
    Hour,
    Day,
}

impl WindowKind {
    fn floor(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let base = Utc
            .with_ymd_and_hms(now.year(), now.month(), now.day(), 0, 0, 0)
            .single()
            .unwrap_or(now);
        match self {
            Self::Minute => base
                + Duration::hours(i64::from(now.hour()))
                + Duration::minutes(i64::from(now.minute())),
            Self::Hour => base + Duration::hours(i64::from(now.hour())),
            Self::Day => base,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Active,
    Breach(Metric),
}

#[derive(Clone, Copy, Debug)]
struct Counter {
    window_start: DateTime<Utc>,
    value: u64,
}

/// Process-wide guard. Counters are behind one mutex; the shutdown switch
/// is an atomic read on the hot path.
#[derive(Debug)]
pub struct BudgetGuard {
    limits: BudgetConfig,
    counters: Mutex<[Counter; 5]>,
    shut_down: AtomicBool,
}

impl BudgetGuard {
    pub fn new(limits: BudgetConfig, now: DateTime<Utc>) -> Self {
        let counters = Metric::ALL
            .map(|metric| Counter { window_start: metric.window().floor(now), value: 0 });
        Self { limits, counters: Mutex::new(counters), shut_down: AtomicBool::new(false) }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Records `amount` against a metric, rolling the window when its
    /// boundary has passed. A breach flips the global switch; recovery on
    /// rollover clears it if no hard-capped metric remains breached.
    pub fn record(&self, metric: Metric, amount: u64, now: DateTime<Utc>) -> Verdict {
        let verdict = {
            let Ok(mut counters) = self.counters.lock() else {
                // A poisoned budget lock is treated as a breach; failing
                // closed is the only safe reading of unknown spend.
                self.shut_down.store(true, Ordering::Release);
                return Verdict::Breach(metric);
            };

            self.roll_windows(&mut counters, now);

            let index = Self::index_of(metric);
            counters[index].value = counters[index].value.saturating_add(amount);

            if counters[index].value > self.limit_of(metric) {
                Verdict::Breach(metric)
            } else {
                Verdict::Active
            }
        };

        if let Verdict::Breach(metric) = verdict {
            if !self.shut_down.swap(true, Ordering::AcqRel) {
                warn!(
                    event_name = "budget_breach",
                    metric = metric.as_str(),
                    "budget limit breached, model calls shut down"
                );
            }
        }

        verdict
    }

    /// Re-evaluates the switch; called opportunistically (e.g. by the
    /// watchdog) so window-scoped breaches recover on rollover.
    pub fn refresh(&self, now: DateTime<Utc>) {
        let Ok(mut counters) = self.counters.lock() else {
            return;
        };
        self.roll_windows(&mut counters, now);

        let any_breached = Metric::ALL.iter().any(|metric| {
            counters[Self::index_of(*metric)].value > self.limit_of(*metric)
        });
        if !any_breached {
            self.shut_down.store(false, Ordering::Release);
        }
    }

    /// Deliberate administrative reset of the daily cost counter.
    pub fn reset_daily_cost(&self, now: DateTime<Utc>) {
        let Ok(mut counters) = self.counters.lock() else {
            return;
        };
        let index = Self::index_of(Metric::CostPerDayCents);
        counters[index] =
            Counter { window_start: Metric::CostPerDayCents.window().floor(now), value: 0 };
        drop(counters);
        self.refresh(now);
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> Vec<(Metric, u64, u64)> {
        let Ok(mut counters) = self.counters.lock() else {
            return Vec::new();
        };
        self.roll_windows(&mut counters, now);
        Metric::ALL
            .iter()
            .map(|metric| {
                (*metric, counters[Self::index_of(*metric)].value, self.limit_of(*metric))
            })
            .collect()
    }

    fn roll_windows(&self, counters: &mut [Counter; 5], now: DateTime<Utc>) {
        for (index, metric) in Metric::ALL.iter().enumerate() {
            let boundary = metric.window().floor(now);
            if counters[index].window_start < boundary && metric.recovers_automatically() {
                counters[index] = Counter { window_start: boundary, value: 0 };
            }
        }
    }

    fn limit_of(&self, metric: Metric) -> u64 {
        match metric {
            Metric::TokensPerHour => self.limits.max_tokens_per_hour,
            Metric::TokensPerDay => self.limits.max_tokens_per_day,
            Metric::CostPerDayCents => self.limits.max_cost_per_day_cents,
            Metric::RequestsPerMinute => self.limits.max_requests_per_minute,
            Metric::ErrorsPerHour => self.limits.max_errors_per_hour,
        }
    }

    fn index_of(metric: Metric) -> usize {
        match metric {
            Metric::TokensPerHour => 0,
            Metric::TokensPerDay => 1,
            Metric::CostPerDayCents => 2,
            Metric::RequestsPerMinute => 3,
            Metric::ErrorsPerHour => 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use crate::config::BudgetConfig;

    use super::{BudgetGuard, Metric, Verdict};

    fn limits() -> BudgetConfig {
        BudgetConfig {
            max_tokens_per_hour: 1_000,
            max_tokens_per_day: 5_000,
            max_cost_per_day_cents: 200,
            max_requests_per_minute: 3,
            max_errors_per_hour: 10,
        }
    }

    fn start() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 10).unwrap()
    }

    #[test]
    fn breach_fires_exactly_at_threshold_crossing() {
        let guard = BudgetGuard::new(limits(), start());
        for _ in 0..3 {
            assert_eq!(guard.record(Metric::RequestsPerMinute, 1, start()), Verdict::Active);
        }
        assert_eq!(
            guard.record(Metric::RequestsPerMinute, 1, start()),
            Verdict::Breach(Metric::RequestsPerMinute)
        );
        assert!(guard.is_shut_down());
    }

    #[test]
    fn minute_window_recovers_on_rollover() {
        let guard = BudgetGuard::new(limits(), start());
        for _ in 0..4 {
            guard.record(Metric::RequestsPerMinute, 1, start());
        }
        assert!(guard.is_shut_down());

        let next_minute = start() + Duration::seconds(60);
        assert_eq!(guard.record(Metric::RequestsPerMinute, 1, next_minute), Verdict::Active);
        guard.refresh(next_minute);
        assert!(!guard.is_shut_down());
    }

    #[test]
    fn daily_cost_cap_holds_until_manual_reset() {
        let guard = BudgetGuard::new(limits(), start());
        assert_eq!(
            guard.record(Metric::CostPerDayCents, 500, start()),
            Verdict::Breach(Metric::CostPerDayCents)
        );

        // Next day: a window-scoped metric would have recovered, the hard
        // cap must not.
        let next_day = start() + Duration::days(1);
        guard.refresh(next_day);
        assert!(guard.is_shut_down());

        guard.reset_daily_cost(next_day);
        assert!(!guard.is_shut_down());
    }

    #[test]
    fn counters_are_independent() {
        let guard = BudgetGuard::new(limits(), start());
        guard.record(Metric::TokensPerHour, 900, start());
        assert_eq!(guard.record(Metric::TokensPerDay, 900, start()), Verdict::Active);
        assert_eq!(
            guard.record(Metric::TokensPerHour, 200, start()),
            Verdict::Breach(Metric::TokensPerHour)
        );

        let snapshot = guard.snapshot(start());
        let tokens_day =
            snapshot.iter().find(|(metric, _, _)| *metric == Metric::TokensPerDay);
        assert_eq!(tokens_day.map(|(_, value, _)| *value), Some(900));
    }
}
