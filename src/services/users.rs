use csv::{ReaderBuilder, WriterBuilder};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{error, info, warn};

use crate::auth::{hash_password, verify_password};
use crate::error::ServiceError;
use crate::models::user::{ProfileUpdate, RegisterRequest, Role, UserRecord};

const MIN_PASSWORD_LEN: usize = 8;

/// User accounts persisted in a CSV file.
///
/// Columns: `id,username,password_hash,class_group,gender,role`. Every change
/// rewrites the whole file into a temporary sibling and renames it into
/// place while holding the directory lock.
pub struct UserDirectory {
    csv_path: Option<PathBuf>,
    password_cost: u32,
    users: Mutex<Vec<UserRecord>>,
}

// Usernames are unique, the first record wins
fn dedup_usernames(records: Vec<UserRecord>) -> Vec<UserRecord> {
    let mut kept: Vec<UserRecord> = Vec::with_capacity(records.len());
    for record in records {
        if kept.iter().any(|user| user.username == record.username) {
            warn!("Duplicate username {} in user directory, keeping the first", record.username);
            continue;
        }
        kept.push(record);
    }
    kept
}

fn check_password(password: &str) -> Result<(), ServiceError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ServiceError::Validation(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

fn normalize_gender(gender: Option<String>) -> Result<Option<String>, ServiceError> {
    let Some(gender) = gender else {
        return Ok(None);
    };

    match gender.trim().to_lowercase().as_str() {
        "" => Ok(None),
        "male" => Ok(Some("male".to_string())),
        "female" => Ok(Some("female".to_string())),
        other => Err(ServiceError::Validation(format!("unknown gender '{}'", other))),
    }
}

fn normalize_class_group(class_group: Option<String>) -> Option<String> {
    class_group
        .map(|group| group.trim().to_string())
        .filter(|group| !group.is_empty())
}

fn next_user_id(users: &[UserRecord]) -> String {
    let mut n = users.len() + 1;
    loop {
        let id = format!("u{}", n);
        if !users.iter().any(|user| user.id == id) {
            return id;
        }
        n += 1;
    }
}

fn read_users(csv_path: &Path) -> Result<Vec<UserRecord>, ServiceError> {
    let mut reader = ReaderBuilder::new().has_headers(true).from_path(csv_path)?;
    let mut users = Vec::new();
    for row in reader.deserialize::<UserRecord>() {
        users.push(row?);
    }
    Ok(users)
}

fn write_users(csv_path: &Path, users: &[UserRecord]) -> Result<(), ServiceError> {
    let tmp_path = csv_path.with_extension("csv.tmp");

    let file = File::create(&tmp_path)?;
    let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
    writer.write_record(["id", "username", "password_hash", "class_group", "gender", "role"])?;
    for user in users {
        writer.serialize(user)?;
    }
    writer.flush()?;
    drop(writer);

    fs::rename(&tmp_path, csv_path).map_err(|e| {
        error!("Failed to replace {}: {}", csv_path.display(), e);
        ServiceError::from(e)
    })
}

impl UserDirectory {
    /// In-memory directory, changes are not persisted
    pub fn from_records(records: Vec<UserRecord>) -> Self {
        Self {
            csv_path: None,
            password_cost: bcrypt::DEFAULT_COST,
            users: Mutex::new(dedup_usernames(records)),
        }
    }

    pub fn load(csv_path: impl Into<PathBuf>) -> Result<Self, ServiceError> {
        let csv_path = csv_path.into();

        if !csv_path.exists() {
            info!("Creating new users file at {}", csv_path.display());
            write_users(&csv_path, &[])?;
        }

        let users = read_users(&csv_path)?;
        info!("Loaded {} users from {}", users.len(), csv_path.display());

        Ok(Self {
            csv_path: Some(csv_path),
            password_cost: bcrypt::DEFAULT_COST,
            users: Mutex::new(dedup_usernames(users)),
        })
    }

    pub fn with_password_cost(mut self, cost: u32) -> Self {
        self.password_cost = cost;
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<UserRecord>>, ServiceError> {
        self.users
            .lock()
            .map_err(|_| ServiceError::Internal("user directory lock poisoned".to_string()))
    }

    // Persist first, then swap the in-memory copy
    fn commit(&self, users: &mut Vec<UserRecord>, updated: Vec<UserRecord>) -> Result<(), ServiceError> {
        if let Some(csv_path) = &self.csv_path {
            write_users(csv_path, &updated)?;
        }
        *users = updated;
        Ok(())
    }

    async fn hash(&self, password: String) -> Result<String, ServiceError> {
        let cost = self.password_cost;
        tokio::task::spawn_blocking(move || hash_password(&password, cost))
            .await
            .map_err(|e| ServiceError::Internal(format!("password hashing task failed: {}", e)))?
    }

    async fn matches(password: &str, password_hash: &str) -> Result<bool, ServiceError> {
        let password = password.to_string();
        let password_hash = password_hash.to_string();
        tokio::task::spawn_blocking(move || verify_password(&password, &password_hash))
            .await
            .map_err(|e| ServiceError::Internal(format!("password check task failed: {}", e)))
    }

    pub fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, ServiceError> {
        Ok(self.lock()?.iter().find(|user| user.username == username).cloned())
    }

    pub fn find_by_id(&self, user_id: &str) -> Result<Option<UserRecord>, ServiceError> {
        Ok(self.lock()?.iter().find(|user| user.id == user_id).cloned())
    }

    /// Users belonging to a class group, ordered by id
    pub fn members_of(&self, class_group: &str) -> Result<Vec<UserRecord>, ServiceError> {
        let mut members: Vec<UserRecord> = self
            .lock()?
            .iter()
            .filter(|user| user.class_group.as_deref() == Some(class_group))
            .cloned()
            .collect();
        members.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(members)
    }

    /// Check a username/password pair, returning the matching account.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<UserRecord, ServiceError> {
        let invalid = || ServiceError::Unauthorized("invalid username or password".to_string());

        let user = self.find_by_username(username)?.ok_or_else(invalid)?;
        if Self::matches(password, &user.password_hash).await? {
            Ok(user)
        } else {
            Err(invalid())
        }
    }

    /// Create a student account.
    pub async fn register(&self, request: RegisterRequest) -> Result<UserRecord, ServiceError> {
        let username = request.username.trim().to_string();
        if username.is_empty() {
            return Err(ServiceError::Validation("username must not be empty".to_string()));
        }
        check_password(&request.password)?;
        let gender = normalize_gender(request.gender)?;
        let class_group = normalize_class_group(request.class_group);

        let password_hash = self.hash(request.password).await?;

        let mut users = self.lock()?;
        if users.iter().any(|user| user.username == username) {
            return Err(ServiceError::Conflict(format!(
                "username {} is already taken",
                username
            )));
        }

        let record = UserRecord {
            id: next_user_id(&users),
            username,
            password_hash,
            class_group,
            gender,
            role: Role::Student,
        };

        let mut updated = users.clone();
        updated.push(record.clone());
        self.commit(&mut users, updated)?;

        info!("Registered user {} ({})", record.id, record.username);
        Ok(record)
    }

    pub fn update_profile(&self, user_id: &str, update: ProfileUpdate) -> Result<UserRecord, ServiceError> {
        let gender = normalize_gender(update.gender)?;
        let class_group = normalize_class_group(update.class_group);

        let mut users = self.lock()?;
        let mut updated = users.clone();
        let record = updated
            .iter_mut()
            .find(|user| user.id == user_id)
            .ok_or_else(|| ServiceError::NotFound(format!("user {}", user_id)))?;

        if gender.is_some() {
            record.gender = gender;
        }
        if class_group.is_some() {
            record.class_group = class_group;
        }
        let record = record.clone();

        self.commit(&mut users, updated)?;
        info!("Updated profile of user {}", user_id);
        Ok(record)
    }

    /// Replace a password after checking the current one.
    pub async fn change_password(
        &self,
        user_id: &str,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), ServiceError> {
        check_password(new_password)?;

        let user = self
            .find_by_id(user_id)?
            .ok_or_else(|| ServiceError::NotFound(format!("user {}", user_id)))?;
        if !Self::matches(current_password, &user.password_hash).await? {
            return Err(ServiceError::Validation("current password is incorrect".to_string()));
        }

        let password_hash = self.hash(new_password.to_string()).await?;

        let mut users = self.lock()?;
        let mut updated = users.clone();
        let record = updated
            .iter_mut()
            .find(|user| user.id == user_id)
            .ok_or_else(|| ServiceError::NotFound(format!("user {}", user_id)))?;
        record.password_hash = password_hash;

        self.commit(&mut users, updated)?;
        info!("Changed password of user {}", user_id);
        Ok(())
    }

    /// Set a user's role, returning the record and whether it changed.
    pub fn set_role(&self, user_id: &str, role: Role) -> Result<(UserRecord, bool), ServiceError> {
        let mut users = self.lock()?;
        let current = users
            .iter()
            .find(|user| user.id == user_id)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("user {}", user_id)))?;

        if current.role == role {
            return Ok((current, false));
        }

        let mut updated = users.clone();
        let mut record = current;
        record.role = role;
        if let Some(slot) = updated.iter_mut().find(|user| user.id == user_id) {
            *slot = record.clone();
        }

        self.commit(&mut users, updated)?;
        info!("Role of user {} set to {}", user_id, role);
        Ok((record, true))
    }
}
