use chrono::Utc;
use std::sync::Mutex;
use tracing::{debug, info};

use crate::error::ServiceError;
use crate::models::notification::Notification;
use crate::services::users::UserDirectory;

/// Notifications kept per user before the oldest are dropped
pub const DEFAULT_FEED_CAPACITY: usize = 100;

struct Feed {
    next_id: u64,
    // Insertion order, oldest first
    items: Vec<Notification>,
}

impl Feed {
    // Drop the oldest read items of a user first, then the oldest unread ones
    fn trim_user(&mut self, user_id: &str, capacity: usize) -> usize {
        let held = self.items.iter().filter(|n| n.user_id == user_id).count();
        let mut excess = held.saturating_sub(capacity);
        let dropped = excess;

        for read_only in [true, false] {
            self.items.retain(|n| {
                if excess == 0 || n.user_id != user_id || (read_only && !n.is_read) {
                    return true;
                }
                excess -= 1;
                false
            });
        }

        dropped
    }
}

/// In-memory per-user notification feed.
///
/// Each user keeps at most `capacity` notifications.
pub struct NotificationService {
    feed: Mutex<Feed>,
    capacity: usize,
}

impl Default for NotificationService {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationService {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_FEED_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            feed: Mutex::new(Feed {
                next_id: 1,
                items: Vec::new(),
            }),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Feed>, ServiceError> {
        self.feed
            .lock()
            .map_err(|_| ServiceError::Internal("notification feed lock poisoned".to_string()))
    }

    pub fn notify_user(&self, user_id: &str, kind: &str, message: &str) -> Result<u64, ServiceError> {
        let mut feed = self.lock()?;
        let id = feed.next_id;
        feed.next_id += 1;
        feed.items.push(Notification {
            id,
            user_id: user_id.to_string(),
            kind: kind.to_string(),
            message: message.to_string(),
            is_read: false,
            created_at: Utc::now(),
        });

        let dropped = feed.trim_user(user_id, self.capacity);
        if dropped > 0 {
            debug!("Dropped {} old notifications of user {}", dropped, user_id);
        }
        Ok(id)
    }

    /// Notify every member of a class group except the acting user.
    pub fn notify_class_group(
        &self,
        users: &UserDirectory,
        actor_id: &str,
        class_group: &str,
        kind: &str,
        message: &str,
    ) -> Result<usize, ServiceError> {
        let mut notified = 0;
        for member in users.members_of(class_group)? {
            if member.id == actor_id {
                continue;
            }
            self.notify_user(&member.id, kind, message)?;
            notified += 1;
        }

        info!("Sent '{}' notification to {} members of {}", kind, notified, class_group);
        Ok(notified)
    }

    /// Notifications of a user, newest first
    pub fn list_for(&self, user_id: &str) -> Result<Vec<Notification>, ServiceError> {
        let feed = self.lock()?;
        let mut items: Vec<Notification> = feed
            .items
            .iter()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(items)
    }

    pub fn unread_count(&self, user_id: &str) -> Result<usize, ServiceError> {
        let feed = self.lock()?;
        Ok(feed
            .items
            .iter()
            .filter(|n| n.user_id == user_id && !n.is_read)
            .count())
    }

    pub fn mark_read(&self, user_id: &str, notification_id: u64) -> Result<(), ServiceError> {
        let mut feed = self.lock()?;
        let item = feed
            .items
            .iter_mut()
            .find(|n| n.id == notification_id)
            .ok_or_else(|| ServiceError::NotFound(format!("notification {}", notification_id)))?;

        if item.user_id != user_id {
            return Err(ServiceError::Forbidden(format!(
                "notification {} belongs to another user",
                notification_id
            )));
        }

        item.is_read = true;
        Ok(())
    }

    /// Returns how many notifications changed state
    pub fn mark_all_read(&self, user_id: &str) -> Result<usize, ServiceError> {
        let mut feed = self.lock()?;
        let mut changed = 0;
        for item in feed.items.iter_mut().filter(|n| n.user_id == user_id && !n.is_read) {
            item.is_read = true;
            changed += 1;
        }
        Ok(changed)
    }
}
