use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: u64,
    pub user_id: String,
    pub kind: String,
    pub message: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct UnreadCount {
    pub unread: usize,
}

// Admin request to notify every member of a class group
#[derive(Debug, Deserialize)]
pub struct BroadcastRequest {
    pub class_group: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    pub message: String,
}

pub fn default_kind() -> String {
    "schedule_change".to_string()
}

#[derive(Debug, Serialize)]
pub struct BroadcastResponse {
    pub notified: usize,
}
