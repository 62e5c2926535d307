//! Resolves relative date and time phrases against studio-local time.
//!
//! The model extracts raw phrases like "tomorrow 19:00"; resolution to a
//! concrete timestamp always happens here, in code, so a misremembered
//! calendar inside the model can never move a booking to the wrong day.

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, Offset, TimeZone, Utc,
    Weekday,
};

use crate::domain::slot::SlotConfidence;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedMoment {
    pub resolved: DateTime<Utc>,
    pub confidence: SlotConfidence,
    /// True when the phrase carried no explicit time and we defaulted it.
    pub time_assumed: bool,
}

#[derive(Clone, Debug)]
pub struct TemporalParser {
    offset: FixedOffset,
    default_time: NaiveTime,
}

impl TemporalParser {
    pub fn new(utc_offset_minutes: i32) -> Self {
        // Offset is validated at config load; UTC fallback keeps the
        // constructor infallible for callers.
        let offset = match FixedOffset::east_opt(utc_offset_minutes * 60) {
            Some(offset) => offset,
            None => Utc.fix(),
        };
        let default_time = NaiveTime::from_hms_opt(19, 0, 0).unwrap_or(NaiveTime::MIN);
        Self { offset, default_time }
    }

    /// Parses a free-form phrase relative to `now`. Returns `None` when no
    /// date or time content was recognized at all.
    pub fn resolve(&self, phrase: &str, now: DateTime<Utc>) -> Option<ResolvedMoment> {
        let normalized = phrase.trim().to_lowercase();
        if normalized.is_empty() {
            return None;
        }

        let local_now = now.with_timezone(&self.offset);
        let today = local_now.date_naive();

        let mut date: Option<(NaiveDate, SlotConfidence)> = None;
        let mut time: Option<NaiveTime> = None;

        for token in normalized.split_whitespace() {
            let token = token.trim_matches(|c: char| matches!(c, ',' | '.' | '!' | '?') && !token.contains(':'));
            if date.is_none() {
                if let Some(found) = parse_date_token(token, today) {
                    date = Some(found);
                    continue;
                }
            }
            if time.is_none() {
                if let Some(found) = parse_time_token(token) {
                    time = Some(found);
                }
            }
        }

        // Phrase-level keywords span multiple words.
        if date.is_none() {
            if normalized.contains("day after tomorrow") {
                date = Some((today + Duration::days(2), SlotConfidence::High));
            } else if normalized.contains("tomorrow") {
                date = Some((today + Duration::days(1), SlotConfidence::High));
            } else if normalized.contains("today") || normalized.contains("tonight") {
                date = Some((today, SlotConfidence::High));
            }
        }

        let (resolved_date, mut confidence, time_assumed) = match (date, time) {
            (Some((date, confidence)), Some(_)) => (date, confidence, false),
            (Some((date, confidence)), None) => {
                (date, confidence.min(SlotConfidence::Medium), true)
            }
            // A bare time means the next occurrence of that time.
            (None, Some(parsed_time)) => {
                let date = if parsed_time > local_now.time() {
                    today
                } else {
                    today + Duration::days(1)
                };
                (date, SlotConfidence::Medium, false)
            }
            (None, None) => return None,
        };

        let chosen_time = time.unwrap_or(self.default_time);
        let local = self.offset.from_local_datetime(&resolved_date.and_time(chosen_time)).single()?;
        let resolved = local.with_timezone(&Utc);

        if resolved < now {
            confidence = SlotConfidence::Low;
        }

        Some(ResolvedMoment { resolved, confidence, time_assumed })
    }
}

fn parse_date_token(token: &str, today: NaiveDate) -> Option<(NaiveDate, SlotConfidence)> {
    if let Some(weekday) = parse_weekday(token) {
        return Some((next_weekday(today, weekday), SlotConfidence::Medium));
    }

    // dd.mm or dd/mm, year implied by the next occurrence.
    let separator = if token.contains('.') {
        '.'
    } else if token.contains('/') {
        '/'
    } else {
        return None;
    };
    let mut parts = token.splitn(2, separator);
    let day: u32 = parts.next()?.parse().ok()?;
    let month: u32 = parts.next()?.parse().ok()?;

    let this_year = NaiveDate::from_ymd_opt(today.year(), month, day)?;
    let date = if this_year >= today {
        this_year
    } else {
        NaiveDate::from_ymd_opt(today.year() + 1, month, day)?
    };
    Some((date, SlotConfidence::High))
}

fn parse_time_token(token: &str) -> Option<NaiveTime> {
    if let Some((hours, minutes)) = token.split_once(':') {
        let hours: u32 = hours.parse().ok()?;
        let minutes: u32 = minutes.parse().ok()?;
        return NaiveTime::from_hms_opt(hours, minutes, 0);
    }

    // "7pm" / "19h" shapes.
    if let Some(stripped) = token.strip_suffix("pm") {
        let hours: u32 = stripped.parse().ok()?;
        return NaiveTime::from_hms_opt((hours % 12) + 12, 0, 0);
    }
    if let Some(stripped) = token.strip_suffix("am") {
        let hours: u32 = stripped.parse().ok()?;
        return NaiveTime::from_hms_opt(hours % 12, 0, 0);
    }
    if let Some(stripped) = token.strip_suffix('h') {
        let hours: u32 = stripped.parse().ok()?;
        return NaiveTime::from_hms_opt(hours, 0, 0);
    }

    None
}

fn parse_weekday(token: &str) -> Option<Weekday> {
    match token {
        "monday" | "mon" => Some(Weekday::Mon),
        "tuesday" | "tue" | "tues" => Some(Weekday::Tue),
        "wednesday" | "wed" => Some(Weekday::Wed),
        "thursday" | "thu" | "thur" | "thurs" => Some(Weekday::Thu),
        "friday" | "fri" => Some(Weekday::Fri),
        "saturday" | "sat" => Some(Weekday::Sat),
        "sunday" | "sun" => Some(Weekday::Sun),
        _ => None,
    }
}

/// Strictly future occurrence: asking for "friday" on a Friday means next week.
fn next_weekday(today: NaiveDate, target: Weekday) -> NaiveDate {
    let today_num = today.weekday().num_days_from_monday() as i64;
    let target_num = target.num_days_from_monday() as i64;
    let mut delta = target_num - today_num;
    if delta <= 0 {
        delta += 7;
    }
    today + Duration::days(delta)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn parser() -> TemporalParser {
        // UTC+10, studio-local.
        TemporalParser::new(600)
    }

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).single().expect("valid timestamp")
    }

    #[test]
    fn tomorrow_with_explicit_time() {
        // 2026-03-02 12:00 local (+10) = 02:00 UTC.
        let now = at(2026, 3, 2, 2, 0);
        let moment = parser().resolve("tomorrow 19:00", now).expect("parsed");
        // 2026-03-03 19:00 local = 09:00 UTC.
        assert_eq!(moment.resolved, at(2026, 3, 3, 9, 0));
        assert_eq!(moment.confidence, SlotConfidence::High);
        assert!(!moment.time_assumed);
    }

    #[test]
    fn weekday_rolls_to_next_week_when_today() {
        let monday = at(2026, 3, 2, 2, 0);
        let moment = parser().resolve("monday 10:00", monday).expect("parsed");
        assert_eq!(moment.resolved, at(2026, 3, 9, 0, 0));
        assert_eq!(moment.confidence, SlotConfidence::Medium);
    }

    #[test]
    fn numeric_date_wraps_to_next_year() {
        let now = at(2026, 11, 20, 2, 0);
        let moment = parser().resolve("15.01 18:30", now).expect("parsed");
        assert_eq!(moment.resolved, at(2027, 1, 15, 8, 30));
    }

    #[test]
    fn bare_time_picks_next_occurrence() {
        // 20:00 local, asking for 19:00 means tomorrow.
        let now = at(2026, 3, 2, 10, 0);
        let moment = parser().resolve("19:00", now).expect("parsed");
        assert_eq!(moment.resolved, at(2026, 3, 3, 9, 0));
    }

    #[test]
    fn date_without_time_assumes_evening_slot() {
        let now = at(2026, 3, 2, 2, 0);
        let moment = parser().resolve("tomorrow", now).expect("parsed");
        assert!(moment.time_assumed);
        assert_eq!(moment.confidence, SlotConfidence::Medium);
        assert_eq!(moment.resolved, at(2026, 3, 3, 9, 0));
    }

    #[test]
    fn unrecognized_phrase_returns_none() {
        let now = at(2026, 3, 2, 2, 0);
        assert!(parser().resolve("what classes do you have", now).is_none());
    }
}
