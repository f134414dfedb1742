use chrono::{NaiveTime, Timelike, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type EntryId = String;

// Kind of weekly slot a catalog entry describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    #[default]
    Class,
    Meal,
    Gym,
}

/// Fixed weekday enumeration, ordered Monday first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Day {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl Day {
    pub fn as_str(&self) -> &'static str {
        match self {
            Day::Monday => "Monday",
            Day::Tuesday => "Tuesday",
            Day::Wednesday => "Wednesday",
            Day::Thursday => "Thursday",
            Day::Friday => "Friday",
            Day::Saturday => "Saturday",
            Day::Sunday => "Sunday",
        }
    }

    pub fn weekday(&self) -> Weekday {
        match self {
            Day::Monday => Weekday::Mon,
            Day::Tuesday => Weekday::Tue,
            Day::Wednesday => Weekday::Wed,
            Day::Thursday => Weekday::Thu,
            Day::Friday => Weekday::Fri,
            Day::Saturday => Weekday::Sat,
            Day::Sunday => Weekday::Sun,
        }
    }
}

impl fmt::Display for Day {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Day {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "monday" | "mon" => Ok(Day::Monday),
            "tuesday" | "tue" => Ok(Day::Tuesday),
            "wednesday" | "wed" => Ok(Day::Wednesday),
            "thursday" | "thu" => Ok(Day::Thursday),
            "friday" | "fri" => Ok(Day::Friday),
            "saturday" | "sat" => Ok(Day::Saturday),
            "sunday" | "sun" => Ok(Day::Sunday),
            other => Err(format!("Unrecognized day: {}", other)),
        }
    }
}

/// One recurring weekly class, meal or gym slot.
///
/// `day` keeps the catalog's raw value so that records with an unknown day
/// can still be reported back as data warnings instead of failing to load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub id: EntryId,
    #[serde(default)]
    pub kind: EntryKind,
    pub day: String,
    #[serde(with = "clock_time")]
    pub start_time: NaiveTime,
    #[serde(with = "clock_time")]
    pub end_time: NaiveTime,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
}

impl ScheduleEntry {
    pub fn parsed_day(&self) -> Option<Day> {
        self.day.parse().ok()
    }

    pub fn has_valid_time_range(&self) -> bool {
        self.start_time < self.end_time
    }
}

/// Parse a time of day written as `HH:MM` or `HH:MM:SS`, truncated to the minute.
pub fn parse_clock_time(value: &str) -> Result<NaiveTime, String> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .map(|t| t.with_second(0).unwrap_or(t))
        .map_err(|e| format!("Invalid time '{}': {}", value, e))
}

// Serde adapter writing times as HH:MM
pub mod clock_time {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_clock_time(&raw).map_err(serde::de::Error::custom)
    }
}
