use async_trait::async_trait;
use csv::{ReaderBuilder, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info};

#[cfg(test)]
use mockall::automock;

use crate::error::ServiceError;
use crate::models::entry::EntryId;

/// Whole-set persistence of each user's selected entry ids.
///
/// There is no partial update: `set_selection` replaces the stored set.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SelectionStore: Send + Sync {
    async fn get_selection(&self, user_id: &str) -> Result<BTreeSet<EntryId>, ServiceError>;

    async fn set_selection(&self, user_id: &str, ids: BTreeSet<EntryId>) -> Result<(), ServiceError>;
}

// Record stored in CSV, one row per selected entry
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SelectionRecord {
    pub user_id: String,
    pub entry_id: EntryId,
}

/// CSV-backed selection store.
///
/// Saves rewrite the whole file into a temporary sibling and rename it into
/// place while holding the file mutex, so readers see either the old or the
/// new selection. Concurrent saves for one user are last-write-wins.
pub struct CsvSelectionStore {
    csv_path: PathBuf,
    file_mutex: Arc<Mutex<()>>,
}

impl CsvSelectionStore {
    pub fn new(csv_path: impl Into<PathBuf>) -> Result<Self, ServiceError> {
        let csv_path = csv_path.into();

        if !csv_path.exists() {
            info!("Creating new selections file at {}", csv_path.display());
            write_records(&csv_path, &[])?;
        }

        Ok(Self {
            csv_path,
            file_mutex: Arc::new(Mutex::new(())),
        })
    }

    pub fn read_all(&self) -> Result<Vec<SelectionRecord>, ServiceError> {
        let _guard = self
            .file_mutex
            .lock()
            .map_err(|_| ServiceError::Internal("selection store lock poisoned".to_string()))?;
        read_records(&self.csv_path)
    }

    fn get_blocking(&self, user_id: &str) -> Result<BTreeSet<EntryId>, ServiceError> {
        let ids = self
            .read_all()?
            .into_iter()
            .filter(|record| record.user_id == user_id)
            .map(|record| record.entry_id)
            .collect();
        Ok(ids)
    }

    fn set_blocking(&self, user_id: &str, ids: &BTreeSet<EntryId>) -> Result<(), ServiceError> {
        let _guard = self
            .file_mutex
            .lock()
            .map_err(|_| ServiceError::Internal("selection store lock poisoned".to_string()))?;

        let mut records: Vec<SelectionRecord> = read_records(&self.csv_path)?
            .into_iter()
            .filter(|record| record.user_id != user_id)
            .collect();

        records.extend(ids.iter().map(|entry_id| SelectionRecord {
            user_id: user_id.to_string(),
            entry_id: entry_id.clone(),
        }));

        write_records(&self.csv_path, &records)?;
        debug!("Stored {} selected entries for user {}", ids.len(), user_id);
        Ok(())
    }

    fn handle(&self) -> Self {
        Self {
            csv_path: self.csv_path.clone(),
            file_mutex: Arc::clone(&self.file_mutex),
        }
    }
}

fn read_records(csv_path: &Path) -> Result<Vec<SelectionRecord>, ServiceError> {
    let mut reader = ReaderBuilder::new().has_headers(true).from_path(csv_path)?;
    let mut records = Vec::new();
    for row in reader.deserialize::<SelectionRecord>() {
        records.push(row?);
    }
    Ok(records)
}

fn write_records(csv_path: &Path, records: &[SelectionRecord]) -> Result<(), ServiceError> {
    let tmp_path = csv_path.with_extension("csv.tmp");

    let file = File::create(&tmp_path)?;
    let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
    writer.write_record(["user_id", "entry_id"])?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    drop(writer);

    fs::rename(&tmp_path, csv_path).map_err(|e| {
        error!("Failed to replace {}: {}", csv_path.display(), e);
        ServiceError::from(e)
    })
}

#[async_trait]
impl SelectionStore for CsvSelectionStore {
    async fn get_selection(&self, user_id: &str) -> Result<BTreeSet<EntryId>, ServiceError> {
        let store = self.handle();
        let user_id = user_id.to_string();
        tokio::task::spawn_blocking(move || store.get_blocking(&user_id))
            .await
            .map_err(|e| ServiceError::Internal(format!("selection read task failed: {}", e)))?
    }

    async fn set_selection(&self, user_id: &str, ids: BTreeSet<EntryId>) -> Result<(), ServiceError> {
        let store = self.handle();
        let user_id = user_id.to_string();
        // Runs to completion on the blocking pool even if the caller goes away
        tokio::task::spawn_blocking(move || store.set_blocking(&user_id, &ids))
            .await
            .map_err(|e| ServiceError::Internal(format!("selection write task failed: {}", e)))?
    }
}
