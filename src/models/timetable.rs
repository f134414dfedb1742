use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::models::entry::{Day, EntryId, ScheduleEntry};

// A same-day overlap between two selected entries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub day: Day,
    pub first_entry_id: EntryId,
    pub second_entry_id: EntryId,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    InvalidTimeRange,
    UnknownDay,
}

// Non-fatal problem found in a catalog record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataWarning {
    pub entry_id: EntryId,
    pub kind: WarningKind,
    pub message: String,
}

/// Result of loading or saving a personal timetable.
///
/// `entries` is the resolved selection ordered by id, `weekly` the same
/// entries bucketed by day and sorted by start time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimetableView {
    pub entries: Vec<ScheduleEntry>,
    pub weekly: BTreeMap<Day, Vec<ScheduleEntry>>,
    pub conflicts: Vec<Conflict>,
    pub data_warnings: Vec<DataWarning>,
}

// Request body for saving a timetable
#[derive(Debug, Clone, Deserialize)]
pub struct SaveTimetableRequest {
    #[serde(default)]
    pub entry_ids: BTreeSet<EntryId>,
}
