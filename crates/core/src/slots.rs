//! Slot merge policy: validates extracted values, protects confirmed slots
//! from silent overwrite, and reports which required slots are still open.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::domain::slot::{Slot, SlotMap, SlotName, SlotPatch, SlotValue};
use crate::errors::SlotRejection;
use crate::temporal::TemporalParser;

/// Outcome of merging one patch into a session's slot map.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub accepted: Vec<SlotName>,
    pub rejected: Vec<(SlotName, SlotRejection)>,
    /// Slots that held a confirmed value and were left untouched because
    /// the patch entry was not flagged as a user correction.
    pub protected: Vec<SlotName>,
}

impl MergeReport {
    pub fn changed(&self) -> bool {
        !self.accepted.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct SlotManager {
    temporal: TemporalParser,
}

impl SlotManager {
    pub fn new(temporal: TemporalParser) -> Self {
        Self { temporal }
    }

    /// Applies `patch` to `slots`. Every entry is validated independently;
    /// one bad value never blocks the rest of the patch.
    pub fn merge(&self, slots: &mut SlotMap, patch: &SlotPatch, now: DateTime<Utc>) -> MergeReport {
        let mut report = MergeReport::default();

        for entry in &patch.entries {
            if let Some(existing) = slots.get(entry.name) {
                if existing.confirmed && !entry.correction {
                    report.protected.push(entry.name);
                    continue;
                }
            }

            match self.validate(entry.name, &entry.raw_value, now) {
                Ok(value) => {
                    let slot = if entry.correction {
                        Slot::corrected(value)
                    } else {
                        Slot::extracted(value, entry.confidence)
                    };
                    slots.insert(entry.name, slot);
                    report.accepted.push(entry.name);
                }
                Err(rejection) => {
                    debug!(
                        event_name = "slot_rejected",
                        slot = entry.name.as_str(),
                        reason = %rejection,
                        "rejected slot value"
                    );
                    report.rejected.push((entry.name, rejection));
                }
            }
        }

        report
    }

    fn validate(
        &self,
        name: SlotName,
        raw: &str,
        now: DateTime<Utc>,
    ) -> Result<SlotValue, SlotRejection> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(SlotRejection::Empty);
        }

        match name {
            SlotName::ClientPhone => normalize_phone(trimmed)
                .map(|normalized| SlotValue::Phone { normalized })
                .ok_or(SlotRejection::UnparsablePhone),
            SlotName::DateTime => {
                let moment =
                    self.temporal.resolve(trimmed, now).ok_or(SlotRejection::UnparsableDateTime)?;
                if moment.resolved < now {
                    return Err(SlotRejection::PastDate);
                }
                Ok(SlotValue::DateTime { raw: trimmed.to_string(), resolved: moment.resolved })
            }
            SlotName::Group | SlotName::ClientName | SlotName::ScheduleId => {
                Ok(SlotValue::Text { text: trimmed.to_string() })
            }
        }
    }

    /// Required booking slots still missing from the map, in prompt order.
    pub fn required_missing(&self, slots: &SlotMap) -> Vec<SlotName> {
        SlotName::REQUIRED_FOR_BOOKING
            .into_iter()
            .filter(|name| !slots.contains(*name))
            .collect()
    }
}

/// Normalizes phone input to E.164-ish `+<digits>`. Russian local forms
/// (`8...`) map onto `+7`; anything with too few digits is rejected.
fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < 10 || digits.len() > 15 {
        return None;
    }

    let normalized = if digits.len() == 11 && digits.starts_with('8') {
        format!("+7{}", &digits[1..])
    } else if digits.len() == 10 {
        format!("+7{digits}")
    } else {
        format!("+{digits}")
    };

    Some(normalized)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use crate::domain::slot::{SlotConfidence, SlotMap, SlotName, SlotPatch, SlotPatchEntry};
    use crate::errors::SlotRejection;
    use crate::temporal::TemporalParser;

    use super::{normalize_phone, SlotManager};

    fn manager() -> SlotManager {
        SlotManager::new(TemporalParser::new(600))
    }

    fn now() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 2, 0, 0).unwrap()
    }

    #[test]
    fn phone_forms_normalize_to_plus_seven() {
        assert_eq!(normalize_phone("8 (999) 000-11-22").as_deref(), Some("+79990001122"));
        assert_eq!(normalize_phone("+7 999 000 11 22").as_deref(), Some("+79990001122"));
        assert_eq!(normalize_phone("9990001122").as_deref(), Some("+79990001122"));
        assert_eq!(normalize_phone("12345"), None);
    }

    #[test]
    fn confirmed_slot_survives_plain_extraction() {
        let manager = manager();
        let mut slots = SlotMap::default();

        let mut first = SlotPatch::default();
        first.entries.push(SlotPatchEntry {
            name: SlotName::Group,
            raw_value: "salsa".into(),
            confidence: SlotConfidence::High,
            correction: true,
        });
        manager.merge(&mut slots, &first, now());

        let mut second = SlotPatch::default();
        second.push(SlotName::Group, "bachata");
        let report = manager.merge(&mut slots, &second, now());

        assert_eq!(report.protected, vec![SlotName::Group]);
        assert_eq!(slots.text(SlotName::Group), Some("salsa"));
    }

    #[test]
    fn correction_overwrites_confirmed_slot() {
        let manager = manager();
        let mut slots = SlotMap::default();

        let mut first = SlotPatch::default();
        first.entries.push(SlotPatchEntry {
            name: SlotName::Group,
            raw_value: "salsa".into(),
            confidence: SlotConfidence::High,
            correction: true,
        });
        manager.merge(&mut slots, &first, now());

        let mut second = SlotPatch::default();
        second.entries.push(SlotPatchEntry {
            name: SlotName::Group,
            raw_value: "bachata".into(),
            confidence: SlotConfidence::High,
            correction: true,
        });
        let report = manager.merge(&mut slots, &second, now());

        assert!(report.changed());
        assert_eq!(slots.text(SlotName::Group), Some("bachata"));
    }

    #[test]
    fn past_datetime_is_rejected_without_blocking_other_entries() {
        let manager = manager();
        let mut slots = SlotMap::default();

        let mut patch = SlotPatch::default();
        patch.push(SlotName::ClientName, "Anna");
        // January 15 already passed, so the parser wraps it to next year.
        patch.push(SlotName::DateTime, "15.01 18:30");
        let late_now = Utc.with_ymd_and_hms(2026, 3, 2, 23, 30, 0).unwrap();
        let report = manager.merge(&mut slots, &patch, late_now);

        assert!(report.accepted.contains(&SlotName::ClientName));
        assert!(report.accepted.contains(&SlotName::DateTime));

        let mut bad = SlotPatch::default();
        bad.push(SlotName::ClientPhone, "call me maybe");
        let report = manager.merge(&mut slots, &bad, late_now);
        assert_eq!(report.rejected, vec![(SlotName::ClientPhone, SlotRejection::UnparsablePhone)]);
    }

    #[test]
    fn required_missing_tracks_booking_gate() {
        let manager = manager();
        let mut slots = SlotMap::default();

        assert_eq!(manager.required_missing(&slots).len(), 4);

        let mut patch = SlotPatch::default();
        patch.push(SlotName::Group, "salsa");
        patch.push(SlotName::ClientPhone, "89990001122");
        manager.merge(&mut slots, &patch, now());

        let missing = manager.required_missing(&slots);
        assert_eq!(missing, vec![SlotName::DateTime, SlotName::ClientName]);
    }
}
