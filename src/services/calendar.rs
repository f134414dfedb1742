use chrono::{Datelike, NaiveDate, NaiveDateTime};
use tracing::{debug, warn};

use crate::models::entry::ScheduleEntry;

const PRODUCT_ID: &str = "-//UCA Schedule App//EN";
const LINE_END: &str = "\r\n";

// Escape text values per iCalendar rules
fn escape_ics(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace(';', "\\;")
        .replace(',', "\\,")
        .replace('\n', "\\n")
}

/// First date on or after `from` falling on `weekday`
pub fn next_or_same(from: NaiveDate, weekday: chrono::Weekday) -> NaiveDate {
    let diff = (weekday.num_days_from_monday() + 7 - from.weekday().num_days_from_monday()) % 7;
    from + chrono::Duration::days(i64::from(diff))
}

fn format_local(value: NaiveDateTime) -> String {
    value.format("%Y%m%dT%H%M%S").to_string()
}

/// Render a timetable as an iCalendar document of weekly recurring events.
///
/// Each entry starts on the next occurrence of its weekday counted from
/// `today`. Entries whose day is not a weekday name, or whose end is not
/// after their start, are left out.
pub fn render_ics(entries: &[ScheduleEntry], user_id: &str, today: NaiveDate) -> String {
    let mut out = String::new();
    let mut push = |line: String| {
        out.push_str(&line);
        out.push_str(LINE_END);
    };

    push("BEGIN:VCALENDAR".to_string());
    push("VERSION:2.0".to_string());
    push(format!("PRODID:{}", PRODUCT_ID));

    let mut exported = 0;
    for entry in entries {
        let Some(day) = entry.parsed_day() else {
            warn!("Not exporting entry {}: unrecognized day '{}'", entry.id, entry.day);
            continue;
        };

        if !entry.has_valid_time_range() {
            warn!(
                "Not exporting entry {}: ends at {} which is not after its start {}",
                entry.id,
                entry.end_time.format("%H:%M"),
                entry.start_time.format("%H:%M")
            );
            continue;
        }

        let date = next_or_same(today, day.weekday());
        let start = date.and_time(entry.start_time);
        let end = date.and_time(entry.end_time);

        push("BEGIN:VEVENT".to_string());
        push(format!("UID:uca-{}-{}@uca-schedule", entry.id, user_id));
        push(format!("SUMMARY:{}", escape_ics(&entry.label)));
        push(format!(
            "LOCATION:{}",
            escape_ics(entry.location.as_deref().unwrap_or(""))
        ));
        push(format!("DTSTART:{}", format_local(start)));
        push(format!("DTEND:{}", format_local(end)));
        push("RRULE:FREQ=WEEKLY".to_string());
        push("END:VEVENT".to_string());
        exported += 1;
    }

    push("END:VCALENDAR".to_string());

    debug!("Rendered {} calendar events for user {}", exported, user_id);
    out
}
