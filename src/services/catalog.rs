use async_trait::async_trait;
use csv::ReaderBuilder;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

use crate::auth::Session;
use crate::error::ServiceError;
use crate::models::entry::{parse_clock_time, EntryKind, ScheduleEntry};

/// Source of the schedule entries a session may choose from.
///
/// Implementations return entries in no particular order.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EntryCatalog: Send + Sync {
    async fn list_entries(&self, session: &Session) -> Result<Vec<ScheduleEntry>, ServiceError>;
}

/// Whether a session may see a catalog entry.
///
/// Admins see everything. Others see entries without a class group or for
/// their own group. Gender-restricted entries need a matching session
/// gender.
pub fn is_visible(entry: &ScheduleEntry, session: &Session) -> bool {
    if session.is_admin() {
        return true;
    }

    let group_ok = match (&entry.class_group, &session.class_group) {
        (None, _) => true,
        (Some(entry_group), Some(user_group)) => entry_group == user_group,
        (Some(_), None) => false,
    };

    let gender_ok = match (&entry.gender, &session.gender) {
        (None, _) => true,
        (Some(entry_gender), Some(user_gender)) => entry_gender.eq_ignore_ascii_case(user_gender),
        (Some(_), None) => false,
    };

    group_ok && gender_ok
}

// Row of the catalog CSV file; times stay raw until validated
#[derive(Debug, Deserialize)]
struct CatalogRow {
    id: String,
    kind: Option<EntryKind>,
    class_group: Option<String>,
    gender: Option<String>,
    label: String,
    day: String,
    start_time: String,
    end_time: String,
    location: Option<String>,
}

impl CatalogRow {
    fn into_entry(self) -> Result<ScheduleEntry, String> {
        Ok(ScheduleEntry {
            start_time: parse_clock_time(&self.start_time)?,
            end_time: parse_clock_time(&self.end_time)?,
            id: self.id,
            kind: self.kind.unwrap_or_default(),
            day: self.day,
            label: self.label,
            location: self.location,
            class_group: self.class_group,
            gender: self.gender,
        })
    }
}

/// Catalog backed by a CSV file, re-read on every call.
///
/// Columns: `id,kind,class_group,gender,label,day,start_time,end_time,location`.
pub struct CsvEntryCatalog {
    csv_path: PathBuf,
}

impl CsvEntryCatalog {
    pub fn new(csv_path: impl Into<PathBuf>) -> Self {
        let csv_path = csv_path.into();
        info!("Using CSV entry catalog at {}", csv_path.display());
        Self { csv_path }
    }

    pub fn read_entries(csv_path: &Path) -> Result<Vec<ScheduleEntry>, ServiceError> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(csv_path)
            .map_err(|e| ServiceError::dependency("catalog", e.to_string()))?;

        let mut entries = Vec::new();
        for (line, row) in reader.deserialize::<CatalogRow>().enumerate() {
            let parsed = row
                .map_err(|e| e.to_string())
                .and_then(CatalogRow::into_entry);

            match parsed {
                Ok(entry) => entries.push(entry),
                // Header is line 1
                Err(e) => warn!("Skipping unreadable catalog row {}: {}", line + 2, e),
            }
        }

        Ok(entries)
    }
}

#[async_trait]
impl EntryCatalog for CsvEntryCatalog {
    async fn list_entries(&self, session: &Session) -> Result<Vec<ScheduleEntry>, ServiceError> {
        let csv_path = self.csv_path.clone();
        let entries = tokio::task::spawn_blocking(move || Self::read_entries(&csv_path))
            .await
            .map_err(|e| ServiceError::Internal(format!("catalog read task failed: {}", e)))??;

        let visible: Vec<ScheduleEntry> = entries
            .into_iter()
            .filter(|entry| is_visible(entry, session))
            .collect();

        debug!("Catalog has {} entries visible to user {}", visible.len(), session.user_id);
        Ok(visible)
    }
}

// Entry as served by the remote scheduling API
#[derive(Debug, Deserialize)]
struct RemoteEntry {
    id: Value,
    #[serde(default)]
    kind: Option<EntryKind>,
    #[serde(alias = "course_name")]
    label: String,
    day: String,
    start_time: String,
    end_time: String,
    #[serde(default)]
    location: Option<String>,
    #[serde(default, alias = "student_class_name")]
    class_group: Option<String>,
    #[serde(default)]
    gender: Option<String>,
}

impl RemoteEntry {
    fn into_entry(self) -> Result<ScheduleEntry, String> {
        let id = match self.id {
            Value::String(id) => id,
            Value::Number(id) => id.to_string(),
            other => return Err(format!("unsupported entry id {}", other)),
        };

        Ok(ScheduleEntry {
            start_time: parse_clock_time(&self.start_time)?,
            end_time: parse_clock_time(&self.end_time)?,
            id,
            kind: self.kind.unwrap_or_default(),
            day: self.day,
            label: self.label,
            location: self.location,
            class_group: self.class_group,
            gender: self.gender,
        })
    }
}

/// Catalog served by a remote scheduling API.
///
/// The session's bearer token is forwarded so the remote side applies its
/// own visibility rules.
pub struct HttpEntryCatalog {
    client: Client,
    endpoint: String,
}

impl HttpEntryCatalog {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    pub fn classes_url(&self) -> String {
        format!("{}/api/classes/", self.endpoint)
    }
}

#[async_trait]
impl EntryCatalog for HttpEntryCatalog {
    async fn list_entries(&self, session: &Session) -> Result<Vec<ScheduleEntry>, ServiceError> {
        let url = self.classes_url();
        info!("Requesting catalog for user {}", session.user_id);
        debug!("Catalog URL: {}", url);

        let res = self
            .client
            .get(&url)
            .header("Content-Type", "application/json")
            .bearer_auth(&session.token)
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            return Err(ServiceError::dependency(
                "catalog",
                format!("remote catalog answered {}", status),
            ));
        }

        let remote = res.json::<Vec<RemoteEntry>>().await?;
        let mut entries = Vec::with_capacity(remote.len());
        for item in remote {
            match item.into_entry() {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!("Skipping unreadable remote catalog entry: {}", e),
            }
        }

        Ok(entries)
    }
}
