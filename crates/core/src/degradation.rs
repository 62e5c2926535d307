//! Degradation levels. The level itself is a pure function of current
//! health inputs; the controller only adds a dwell window so a flapping
//! dependency does not bounce the conversation tier up and down.

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

/// Conversation restriction tiers, ascending severity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    /// Full function.
    L0,
    /// CRM unavailable: informational answers served from the knowledge
    /// source, booking intents queued to the fallback path.
    L1,
    /// Model unavailable or budget shut down: keyword-matched replies only.
    L2,
    /// Both down: one fixed technical-issue response, nothing else.
    L3,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::L0 => "l0",
            Self::L1 => "l1",
            Self::L2 => "l2",
            Self::L3 => "l3",
        }
    }

    pub fn allows_crm(&self) -> bool {
        *self < Self::L1
    }

    pub fn allows_model(&self) -> bool {
        *self < Self::L2
    }
}

/// Health inputs contributing to the level. Channel health never changes
/// the conversational tier (a dead channel cannot carry a reply anyway),
/// but it is kept for alerting.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HealthInputs {
    pub crm_healthy: bool,
    pub model_healthy: bool,
    pub budget_shut_down: bool,
    pub channel_healthy: Vec<(crate::domain::message::Channel, bool)>,
}

/// Pure level computation; identical inputs always yield identical output.
pub fn level(inputs: &HealthInputs) -> Level {
    let model_usable = inputs.model_healthy && !inputs.budget_shut_down;
    match (inputs.crm_healthy, model_usable) {
        (true, true) => Level::L0,
        (false, true) => Level::L1,
        (true, false) => Level::L2,
        (false, false) => Level::L3,
    }
}

/// Queue depths that raise the backlog alert flag, orthogonal to the
/// conversational level.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BacklogThresholds {
    pub dead_letter_depth: u64,
    pub fallback_depth: u64,
}

/// Tracks the effective level with recovery hysteresis: deteriorations
/// apply immediately, improvements only after the dwell window has held.
#[derive(Debug)]
pub struct DegradationController {
    dwell: Duration,
    effective: Level,
    /// Candidate improvement and when it was first observed.
    pending_recovery: Option<(Level, DateTime<Utc>)>,
    backlog: BacklogThresholds,
    backlog_alert: bool,
}

impl DegradationController {
    pub fn new(dwell: Duration, backlog: BacklogThresholds) -> Self {
        Self {
            dwell,
            effective: Level::L0,
            pending_recovery: None,
            backlog,
            backlog_alert: false,
        }
    }

    pub fn effective(&self) -> Level {
        self.effective
    }

    pub fn backlog_alert(&self) -> bool {
        self.backlog_alert
    }

    /// Recomputes the effective level from fresh health inputs.
    pub fn observe(&mut self, inputs: &HealthInputs, now: DateTime<Utc>) -> Level {
        let target = level(inputs);

        if target > self.effective {
            warn!(
                event_name = "degradation_level_raised",
                from = self.effective.as_str(),
                to = target.as_str(),
                "dependency health deteriorated"
            );
            self.effective = target;
            self.pending_recovery = None;
            return self.effective;
        }

        if target < self.effective {
            match self.pending_recovery {
                Some((candidate, since)) if candidate == target => {
                    if now - since >= self.dwell {
                        info!(
                            event_name = "degradation_level_recovered",
                            from = self.effective.as_str(),
                            to = target.as_str(),
                            "dependency health recovered"
                        );
                        self.effective = target;
                        self.pending_recovery = None;
                    }
                }
                _ => self.pending_recovery = Some((target, now)),
            }
        } else {
            self.pending_recovery = None;
        }

        self.effective
    }

    /// Updates the backlog alert flag; returns true on the rising edge so
    /// the caller can notify the administrator exactly once.
    pub fn observe_backlog(&mut self, dead_letter_depth: u64, fallback_depth: u64) -> bool {
        let alerting = dead_letter_depth > self.backlog.dead_letter_depth
            || fallback_depth > self.backlog.fallback_depth;
        let rising = alerting && !self.backlog_alert;
        if rising {
            warn!(
                event_name = "queue_backlog_alert",
                dead_letter_depth,
                fallback_depth,
                "queue backlog over threshold"
            );
        }
        self.backlog_alert = alerting;
        rising
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{level, BacklogThresholds, DegradationController, HealthInputs, Level};

    fn inputs(crm: bool, model: bool, budget_down: bool) -> HealthInputs {
        HealthInputs {
            crm_healthy: crm,
            model_healthy: model,
            budget_shut_down: budget_down,
            channel_healthy: Vec::new(),
        }
    }

    #[test]
    fn level_is_pure_over_inputs() {
        assert_eq!(level(&inputs(true, true, false)), Level::L0);
        assert_eq!(level(&inputs(false, true, false)), Level::L1);
        assert_eq!(level(&inputs(true, false, false)), Level::L2);
        assert_eq!(level(&inputs(true, true, true)), Level::L2);
        assert_eq!(level(&inputs(false, false, false)), Level::L3);
        // Same tuple again, after other calls: same answer.
        assert_eq!(level(&inputs(false, true, false)), Level::L1);
    }

    #[test]
    fn deterioration_is_immediate_recovery_waits_for_dwell() {
        let mut controller = DegradationController::new(
            Duration::seconds(30),
            BacklogThresholds { dead_letter_depth: 10, fallback_depth: 5 },
        );
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 2, 0, 0).unwrap();

        assert_eq!(controller.observe(&inputs(false, true, false), start), Level::L1);

        // CRM comes back, but the dwell window has not yet held.
        let early = start + Duration::seconds(10);
        assert_eq!(controller.observe(&inputs(true, true, false), early), Level::L1);

        let held = start + Duration::seconds(45);
        assert_eq!(controller.observe(&inputs(true, true, false), held), Level::L0);
    }

    #[test]
    fn flap_during_dwell_restarts_the_window() {
        let mut controller = DegradationController::new(
            Duration::seconds(30),
            BacklogThresholds { dead_letter_depth: 10, fallback_depth: 5 },
        );
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 2, 0, 0).unwrap();

        controller.observe(&inputs(false, true, false), start);
        controller.observe(&inputs(true, true, false), start + Duration::seconds(10));
        // Flap: CRM down again before recovery committed.
        assert_eq!(
            controller.observe(&inputs(false, true, false), start + Duration::seconds(20)),
            Level::L1
        );
        // Healthy again; the old pending window must not count.
        assert_eq!(
            controller.observe(&inputs(true, true, false), start + Duration::seconds(25)),
            Level::L1
        );
        assert_eq!(
            controller.observe(&inputs(true, true, false), start + Duration::seconds(60)),
            Level::L0
        );
    }

    #[test]
    fn backlog_alert_rises_once_and_does_not_change_level() {
        let mut controller = DegradationController::new(
            Duration::seconds(30),
            BacklogThresholds { dead_letter_depth: 10, fallback_depth: 5 },
        );

        assert!(controller.observe_backlog(11, 0));
        assert!(controller.backlog_alert());
        // Still over threshold: no second rising edge.
        assert!(!controller.observe_backlog(12, 0));
        assert_eq!(controller.effective(), Level::L0);

        assert!(!controller.observe_backlog(0, 0));
        assert!(!controller.backlog_alert());
    }
}
