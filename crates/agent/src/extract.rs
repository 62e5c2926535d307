//! Recovery of structured turns from raw model output. Models wrap JSON in
//! prose or code fences often enough that a strict parse alone would discard
//! usable answers; recovery walks progressively looser readings and gives up
//! only when no JSON object can be found at all.

use std::collections::BTreeMap;

use serde::Deserialize;

use bookline_core::domain::slot::{SlotConfidence, SlotName, SlotPatch, SlotPatchEntry};
use bookline_core::fsm::Intent;

/// One classified turn as the model reports it. `slots` uses the wire names
/// of the slot map; unknown keys are ignored rather than rejected.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct ModelTurn {
    pub intent: String,
    #[serde(default)]
    pub slots: BTreeMap<String, String>,
    #[serde(default)]
    pub reply: Option<String>,
}

/// Three readings, strictest first: the whole output as JSON, then the
/// first fenced code block, then the outermost brace-delimited chunk.
pub fn parse_model_turn(raw: &str) -> Option<ModelTurn> {
    if let Ok(turn) = serde_json::from_str::<ModelTurn>(raw.trim()) {
        return Some(turn);
    }
    if let Some(block) = fenced_block(raw) {
        if let Ok(turn) = serde_json::from_str::<ModelTurn>(block) {
            return Some(turn);
        }
    }
    brace_delimited(raw).and_then(|chunk| serde_json::from_str::<ModelTurn>(chunk).ok())
}

fn fenced_block(raw: &str) -> Option<&str> {
    let start = raw.find("```")?;
    let body = &raw[start + 3..];
    let body = body.strip_prefix("json").unwrap_or(body);
    let end = body.find("```")?;
    Some(body[..end].trim())
}

fn brace_delimited(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(&raw[start..=end])
}

/// Maps a parsed turn onto the engine's intent and a slot patch. Slot
/// values stay raw here; validation belongs to the slot manager.
pub fn resolve_turn(turn: &ModelTurn) -> (Intent, SlotPatch) {
    let mut patch = SlotPatch::default();
    for (key, raw_value) in &turn.slots {
        let Some(name) = slot_name(key) else { continue };
        patch.entries.push(SlotPatchEntry {
            name,
            raw_value: raw_value.clone(),
            confidence: SlotConfidence::Medium,
            correction: false,
        });
    }

    let intent = match turn.intent.as_str() {
        "booking" => Intent::Booking,
        "cancel" => Intent::Cancel,
        "admin_escalation" | "admin" => Intent::AdminEscalation,
        "schedule" => Intent::Schedule,
        "price" => Intent::Price { group: turn.slots.get("group").cloned() },
        "info" => Intent::Info { topic: turn.slots.get("topic").cloned().unwrap_or_default() },
        "lateness" => Intent::Lateness,
        "greeting" => Intent::Greeting,
        _ => Intent::Unknown,
    };

    (intent, patch)
}

fn slot_name(raw: &str) -> Option<SlotName> {
    match raw {
        "group" => Some(SlotName::Group),
        "datetime" | "date_time" => Some(SlotName::DateTime),
        "client_name" | "name" => Some(SlotName::ClientName),
        "client_phone" | "phone" => Some(SlotName::ClientPhone),
        "schedule_id" => Some(SlotName::ScheduleId),
        _ => None,
    }
}
