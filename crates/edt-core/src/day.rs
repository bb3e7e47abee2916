//! Day-of-week tokens.

use std::fmt;

use chrono::Weekday;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Canonical day token as stored in `scheduled_courses.day`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Day {
    #[serde(rename = "mo")]
    Monday,
    #[serde(rename = "tu")]
    Tuesday,
    #[serde(rename = "we")]
    Wednesday,
    #[serde(rename = "th")]
    Thursday,
    #[serde(rename = "fr")]
    Friday,
    #[serde(rename = "sa")]
    Saturday,
    #[serde(rename = "su")]
    Sunday,
}

impl Day {
    pub const ALL: [Day; 7] = [
        Day::Monday,
        Day::Tuesday,
        Day::Wednesday,
        Day::Thursday,
        Day::Friday,
        Day::Saturday,
        Day::Sunday,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Day::Monday => "mo",
            Day::Tuesday => "tu",
            Day::Wednesday => "we",
            Day::Thursday => "th",
            Day::Friday => "fr",
            Day::Saturday => "sa",
            Day::Sunday => "su",
        }
    }

    pub fn from_weekday(weekday: Weekday) -> Self {
        match weekday {
            Weekday::Mon => Day::Monday,
            Weekday::Tue => Day::Tuesday,
            Weekday::Wed => Day::Wednesday,
            Weekday::Thu => Day::Thursday,
            Weekday::Fri => Day::Friday,
            Weekday::Sat => Day::Saturday,
            Weekday::Sun => Day::Sunday,
        }
    }
}

impl fmt::Display for Day {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of [`normalize_day`]: either a canonical day or the cleaned-up
/// input, left for downstream validation to reject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizedDay {
    Canonical(Day),
    Unrecognized(String),
}

impl NormalizedDay {
    pub fn day(&self) -> Option<Day> {
        match self {
            NormalizedDay::Canonical(day) => Some(*day),
            NormalizedDay::Unrecognized(_) => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            NormalizedDay::Canonical(day) => day.as_str(),
            NormalizedDay::Unrecognized(token) => token,
        }
    }
}

/// Map upstream day codes, English and French day names onto [`Day`].
pub fn normalize_day(token: &str) -> NormalizedDay {
    let code = token.trim().to_lowercase();
    let day = match code.as_str() {
        "m" | "mo" | "mon" | "monday" | "lundi" => Day::Monday,
        "tu" | "tue" | "tuesday" | "mardi" => Day::Tuesday,
        "w" | "we" | "wed" | "wednesday" | "mercredi" => Day::Wednesday,
        "th" | "thu" | "thursday" | "jeudi" => Day::Thursday,
        "f" | "fr" | "fri" | "friday" | "vendredi" => Day::Friday,
        "s" | "sa" | "sat" | "saturday" | "samedi" => Day::Saturday,
        "su" | "sun" | "sunday" | "dimanche" => Day::Sunday,
        _ => {
            warn!(token, normalized = %code, "unknown day code");
            return NormalizedDay::Unrecognized(code);
        }
    };
    NormalizedDay::Canonical(day)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monday_spellings_collapse_to_one_token() {
        for token in ["m", "mo", "lundi", "Monday", " MON "] {
            assert_eq!(normalize_day(token), NormalizedDay::Canonical(Day::Monday), "{token}");
        }
    }

    #[test]
    fn french_and_english_names_cover_the_week() {
        let pairs = [
            ("mardi", Day::Tuesday),
            ("wednesday", Day::Wednesday),
            ("Jeudi", Day::Thursday),
            ("f", Day::Friday),
            ("samedi", Day::Saturday),
            ("dimanche", Day::Sunday),
            ("su", Day::Sunday),
        ];
        for (token, expected) in pairs {
            assert_eq!(normalize_day(token).day(), Some(expected), "{token}");
        }
    }

    #[test]
    fn unknown_token_is_passed_through_lowercased() {
        let normalized = normalize_day("Funday");
        assert_eq!(normalized, NormalizedDay::Unrecognized("funday".into()));
        assert_eq!(normalized.as_str(), "funday");
        assert!(normalized.day().is_none());
    }

    #[test]
    fn canonical_tokens_serialize_as_two_letters() {
        let json = serde_json::to_string(&Day::Tuesday).expect("serialize");
        assert_eq!(json, "\"tu\"");
        assert_eq!(Day::from_weekday(Weekday::Sun), Day::Sunday);
    }
}
