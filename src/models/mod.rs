pub mod entry;
pub mod notification;
pub mod timetable;
pub mod user;
