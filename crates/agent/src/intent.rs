//! Keyword classification: the degraded-mode replacement for the model and
//! the fallback when model output cannot be recovered. Deliberately blunt;
//! it only needs to route the obvious cases.

use bookline_core::domain::slot::{SlotName, SlotPatch};
use bookline_core::fsm::Intent;

#[derive(Clone, Debug, Default)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, text: &str) -> (Intent, SlotPatch) {
        let lowered = text.to_lowercase();
        let words: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|word| !word.is_empty())
            .collect();

        let mut patch = SlotPatch::default();
        if let Some(phone) = extract_phone(text) {
            patch.push(SlotName::ClientPhone, phone);
        }
        if mentions_datetime(&lowered, &words) {
            // The temporal parser scans the full phrase itself.
            patch.push(SlotName::DateTime, text.trim());
        }

        let intent = if has_word(&words, &["cancel", "unbook"]) {
            Intent::Cancel
        } else if has_word(&words, &["admin", "administrator", "manager", "human", "operator"]) {
            Intent::AdminEscalation
        } else if has_word(&words, &["book", "booking", "reserve", "enroll", "enrol"])
            || lowered.contains("sign me up")
            || lowered.contains("sign up")
        {
            Intent::Booking
        } else if has_word(&words, &["schedule", "timetable"])
            || lowered.contains("what classes")
            || lowered.contains("when is")
            || lowered.contains("when are")
        {
            Intent::Schedule
        } else if has_word(&words, &["price", "prices", "cost"]) || lowered.contains("how much") {
            Intent::Price { group: None }
        } else if has_word(&words, &["late"]) || lowered.contains("running behind") {
            Intent::Lateness
        } else if has_word(&words, &["hi", "hello", "hey"])
            || lowered.contains("good morning")
            || lowered.contains("good evening")
        {
            Intent::Greeting
        } else if has_word(&words, &["address", "parking", "shoes", "wear", "bring"])
            || lowered.contains("where are you")
        {
            Intent::Info { topic: lowered.clone() }
        } else {
            Intent::Unknown
        };

        (intent, patch)
    }

    /// Yes/no reading of a confirmation answer; `None` when the text is
    /// neither, so it can be treated as a correction instead.
    pub fn affirmation(&self, text: &str) -> Option<bool> {
        let lowered = text.to_lowercase();
        let words: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|word| !word.is_empty())
            .collect();

        if has_word(&words, &["yes", "yep", "yeah", "sure", "confirm", "ok", "okay", "da"]) {
            return Some(true);
        }
        if has_word(&words, &["no", "nope", "cancel", "stop", "wrong"]) {
            return Some(false);
        }
        None
    }
}

fn has_word(words: &[&str], needles: &[&str]) -> bool {
    words.iter().any(|word| needles.contains(word))
}

fn mentions_datetime(lowered: &str, words: &[&str]) -> bool {
    const DAY_WORDS: [&str; 10] = [
        "today", "tonight", "tomorrow", "monday", "tuesday", "wednesday", "thursday", "friday",
        "saturday", "sunday",
    ];
    if has_word(words, &DAY_WORDS) {
        return true;
    }
    // HH:MM or dd.mm shapes anywhere in the text.
    lowered.split_whitespace().any(|token| {
        token.split_once(':').is_some_and(|(h, m)| {
            h.parse::<u32>().is_ok() && m.trim_matches(|c: char| !c.is_ascii_digit()).parse::<u32>().is_ok()
        }) || token
            .split_once('.')
            .is_some_and(|(d, m)| d.parse::<u32>().is_ok() && m.parse::<u32>().is_ok())
    })
}

/// First run of phone-shaped characters carrying at least ten digits.
fn extract_phone(text: &str) -> Option<String> {
    let mut current = String::new();
    let mut best: Option<String> = None;
    for ch in text.chars() {
        if ch.is_ascii_digit() || matches!(ch, '+' | '(' | ')' | '-' | ' ') {
            current.push(ch);
        } else {
            consider_phone(&mut best, &current);
            current.clear();
        }
    }
    consider_phone(&mut best, &current);
    best
}

fn consider_phone(best: &mut Option<String>, candidate: &str) {
    if best.is_some() {
        return;
    }
    let digits = candidate.chars().filter(|c| c.is_ascii_digit()).count();
    if digits >= 10 {
        *best = Some(candidate.trim().to_string());
    }
}

#[cfg(test)]
mod tests {
    use bookline_core::domain::slot::SlotName;
    use bookline_core::fsm::Intent;

    use super::KeywordClassifier;

    #[test]
    fn obvious_intents_route_by_keyword() {
        let classifier = KeywordClassifier::new();
        assert_eq!(classifier.classify("I want to book salsa").0, Intent::Booking);
        assert_eq!(classifier.classify("please cancel my class").0, Intent::Cancel);
        assert_eq!(classifier.classify("can I talk to a human?").0, Intent::AdminEscalation);
        assert_eq!(classifier.classify("what's the schedule this week").0, Intent::Schedule);
        assert_eq!(classifier.classify("how much is a class").0, Intent::Price { group: None });
        assert_eq!(classifier.classify("I'll be 10 minutes late").0, Intent::Lateness);
        assert_eq!(classifier.classify("hello!").0, Intent::Greeting);
    }

    #[test]
    fn substrings_inside_words_do_not_match() {
        let classifier = KeywordClassifier::new();
        // "hi" inside "this", "late" inside "translate".
        assert_eq!(classifier.classify("translate this for me").0, Intent::Unknown);
    }

    #[test]
    fn phone_and_datetime_ride_along_as_slots() {
        let classifier = KeywordClassifier::new();
        let (intent, patch) = classifier.classify("book salsa tomorrow 19:00, +7 999 000 11 22");
        assert_eq!(intent, Intent::Booking);
        let names: Vec<_> = patch.entries.iter().map(|entry| entry.name).collect();
        assert!(names.contains(&SlotName::ClientPhone));
        assert!(names.contains(&SlotName::DateTime));
    }

    #[test]
    fn short_digit_runs_are_not_phones() {
        let classifier = KeywordClassifier::new();
        let (_, patch) = classifier.classify("see you at 19:00 in studio 2");
        assert!(patch.entries.iter().all(|entry| entry.name != SlotName::ClientPhone));
    }

    #[test]
    fn affirmation_reads_yes_no_and_neither() {
        let classifier = KeywordClassifier::new();
        assert_eq!(classifier.affirmation("Yes, book it"), Some(true));
        assert_eq!(classifier.affirmation("no, the time is wrong"), Some(false));
        assert_eq!(classifier.affirmation("actually make it bachata"), None);
    }
}
