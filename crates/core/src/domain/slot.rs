use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotName {
    Group,
    DateTime,
    ClientName,
    ClientPhone,
    ScheduleId,
}

impl SlotName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Group => "group",
            Self::DateTime => "datetime",
            Self::ClientName => "client_name",
            Self::ClientPhone => "client_phone",
            Self::ScheduleId => "schedule_id",
        }
    }

    /// Human-readable label used when asking the user for a missing slot.
    pub fn prompt_label(&self) -> &'static str {
        match self {
            Self::Group => "class or style",
            Self::DateTime => "date and time",
            Self::ClientName => "your name",
            Self::ClientPhone => "your phone number",
            Self::ScheduleId => "the exact class",
        }
    }

    /// Slots that gate the transition into confirm-booking.
    pub const REQUIRED_FOR_BOOKING: [SlotName; 4] =
        [SlotName::Group, SlotName::DateTime, SlotName::ClientName, SlotName::ClientPhone];
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotConfidence {
    Low,
    Medium,
    High,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotSource {
    ModelExtracted,
    UserCorrected,
    AutoFilled,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SlotValue {
    Text { text: String },
    Phone { normalized: String },
    DateTime { raw: String, resolved: DateTime<Utc> },
}

impl SlotValue {
    pub fn display(&self) -> String {
        match self {
            Self::Text { text } => text.clone(),
            Self::Phone { normalized } => normalized.clone(),
            Self::DateTime { resolved, .. } => resolved.format("%d.%m.%Y %H:%M").to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub value: SlotValue,
    pub confidence: SlotConfidence,
    pub source: SlotSource,
    pub confirmed: bool,
}

impl Slot {
    pub fn extracted(value: SlotValue, confidence: SlotConfidence) -> Self {
        Self { value, confidence, source: SlotSource::ModelExtracted, confirmed: false }
    }

    pub fn corrected(value: SlotValue) -> Self {
        Self {
            value,
            confidence: SlotConfidence::High,
            source: SlotSource::UserCorrected,
            confirmed: true,
        }
    }

    pub fn auto_filled(value: SlotValue) -> Self {
        Self {
            value,
            confidence: SlotConfidence::High,
            source: SlotSource::AutoFilled,
            confirmed: false,
        }
    }
}

/// The session's slot map. A session is the sole owner of its slot map;
/// mutation goes through the slot manager's merge policy.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotMap {
    slots: BTreeMap<SlotName, Slot>,
}

impl SlotMap {
    pub fn get(&self, name: SlotName) -> Option<&Slot> {
        self.slots.get(&name)
    }

    pub fn insert(&mut self, name: SlotName, slot: Slot) {
        self.slots.insert(name, slot);
    }

    pub fn remove(&mut self, name: SlotName) -> Option<Slot> {
        self.slots.remove(&name)
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, name: SlotName) -> bool {
        self.slots.contains_key(&name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SlotName, &Slot)> {
        self.slots.iter()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }

    pub fn text(&self, name: SlotName) -> Option<&str> {
        match self.slots.get(&name).map(|slot| &slot.value) {
            Some(SlotValue::Text { text }) => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn phone(&self) -> Option<&str> {
        match self.slots.get(&SlotName::ClientPhone).map(|slot| &slot.value) {
            Some(SlotValue::Phone { normalized }) => Some(normalized.as_str()),
            _ => None,
        }
    }

    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        match self.slots.get(&SlotName::DateTime).map(|slot| &slot.value) {
            Some(SlotValue::DateTime { resolved, .. }) => Some(*resolved),
            _ => None,
        }
    }
}

/// A patch of extracted or corrected slot values, produced by intent
/// resolution and applied by the slot manager.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotPatch {
    pub entries: Vec<SlotPatchEntry>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotPatchEntry {
    pub name: SlotName,
    pub raw_value: String,
    pub confidence: SlotConfidence,
    pub correction: bool,
}

impl SlotPatch {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, name: SlotName, raw_value: impl Into<String>) {
        self.entries.push(SlotPatchEntry {
            name,
            raw_value: raw_value.into(),
            confidence: SlotConfidence::Medium,
            correction: false,
        });
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{Slot, SlotConfidence, SlotMap, SlotName, SlotValue};

    #[test]
    fn typed_accessors_return_only_matching_kinds() {
        let mut map = SlotMap::default();
        map.insert(
            SlotName::Group,
            Slot::extracted(SlotValue::Text { text: "salsa".into() }, SlotConfidence::High),
        );
        map.insert(
            SlotName::ClientPhone,
            Slot::corrected(SlotValue::Phone { normalized: "+79990001122".into() }),
        );
        let when = Utc.with_ymd_and_hms(2026, 9, 1, 9, 0, 0).unwrap();
        map.insert(
            SlotName::DateTime,
            Slot::extracted(
                SlotValue::DateTime { raw: "tomorrow 19:00".into(), resolved: when },
                SlotConfidence::Medium,
            ),
        );

        assert_eq!(map.text(SlotName::Group), Some("salsa"));
        assert_eq!(map.phone(), Some("+79990001122"));
        assert_eq!(map.datetime(), Some(when));
        assert_eq!(map.text(SlotName::ClientPhone), None);
    }

    #[test]
    fn corrected_slot_is_confirmed_high_confidence() {
        let slot = Slot::corrected(SlotValue::Text { text: "hip-hop".into() });
        assert!(slot.confirmed);
        assert_eq!(slot.confidence, SlotConfidence::High);
    }
}
