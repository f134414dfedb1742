//! Shared builders for unit and integration tests.

use chrono::NaiveTime;

use crate::auth::{hash_password, Session};
use crate::models::entry::{EntryKind, ScheduleEntry};
use crate::models::user::{Role, UserRecord};

pub fn time(value: &str) -> NaiveTime {
    NaiveTime::parse_from_str(value, "%H:%M").unwrap()
}

/// Class entry with a label derived from its id
pub fn entry(id: &str, day: &str, start: &str, end: &str) -> ScheduleEntry {
    ScheduleEntry {
        id: id.to_string(),
        kind: EntryKind::Class,
        day: day.to_string(),
        start_time: time(start),
        end_time: time(end),
        label: format!("Course {}", id),
        location: Some("Room 101".to_string()),
        class_group: None,
        gender: None,
    }
}

pub fn session(user_id: &str, class_group: Option<&str>) -> Session {
    Session {
        user_id: user_id.to_string(),
        username: user_id.to_string(),
        class_group: class_group.map(str::to_string),
        gender: None,
        role: Role::Student,
        token: "test-token".to_string(),
    }
}

/// Lowest bcrypt cost, keeps hashing fast in tests
pub const TEST_HASH_COST: u32 = 4;

pub fn user(id: &str, username: &str, password: &str, class_group: Option<&str>, role: Role) -> UserRecord {
    UserRecord {
        id: id.to_string(),
        username: username.to_string(),
        password_hash: hash_password(password, TEST_HASH_COST).unwrap(),
        class_group: class_group.map(str::to_string),
        gender: None,
        role,
    }
}

/// Catalog from the worked example: two overlapping Monday classes and one on Tuesday
pub fn example_catalog() -> Vec<ScheduleEntry> {
    vec![
        entry("E1", "Monday", "09:00", "10:00"),
        entry("E2", "Monday", "09:30", "10:30"),
        entry("E3", "Tuesday", "09:00", "10:00"),
    ]
}
