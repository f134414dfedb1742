use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

use crate::services::selection_store::{CsvSelectionStore, SelectionRecord, SelectionStore};

fn ids(values: &[&str]) -> BTreeSet<String> {
    values.iter().map(|v| v.to_string()).collect()
}

#[test]
fn test_store_creation() {
    let dir = tempdir().unwrap();
    let csv_path = dir.path().join("selections.csv");

    let store = CsvSelectionStore::new(&csv_path).unwrap();

    // The CSV file is created with only a header
    assert!(Path::new(&csv_path).exists());
    let content = std::fs::read_to_string(&csv_path).unwrap();
    assert_eq!(content.trim_end(), "user_id,entry_id");
    assert!(store.read_all().unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_user_has_empty_selection() {
    let dir = tempdir().unwrap();
    let store = CsvSelectionStore::new(dir.path().join("selections.csv")).unwrap();

    assert!(store.get_selection("nobody").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_set_selection_replaces_whole_set() {
    let dir = tempdir().unwrap();
    let store = CsvSelectionStore::new(dir.path().join("selections.csv")).unwrap();

    store.set_selection("u1", ids(&["E1", "E2"])).await.unwrap();
    store.set_selection("u1", ids(&["E3"])).await.unwrap();

    assert_eq!(store.get_selection("u1").await.unwrap(), ids(&["E3"]));
}

#[tokio::test]
async fn test_users_do_not_overwrite_each_other() {
    let dir = tempdir().unwrap();
    let store = CsvSelectionStore::new(dir.path().join("selections.csv")).unwrap();

    store.set_selection("u1", ids(&["E1"])).await.unwrap();
    store.set_selection("u2", ids(&["E2", "E3"])).await.unwrap();
    store.set_selection("u1", BTreeSet::new()).await.unwrap();

    assert!(store.get_selection("u1").await.unwrap().is_empty());
    assert_eq!(store.get_selection("u2").await.unwrap(), ids(&["E2", "E3"]));
    assert_eq!(
        store.read_all().unwrap(),
        vec![
            SelectionRecord {
                user_id: "u2".to_string(),
                entry_id: "E2".to_string(),
            },
            SelectionRecord {
                user_id: "u2".to_string(),
                entry_id: "E3".to_string(),
            },
        ]
    );
}

#[tokio::test]
async fn test_selection_survives_reopen() {
    let dir = tempdir().unwrap();
    let csv_path = dir.path().join("selections.csv");

    {
        let store = CsvSelectionStore::new(&csv_path).unwrap();
        store.set_selection("u1", ids(&["E1", "E9"])).await.unwrap();
    }

    let reopened = CsvSelectionStore::new(&csv_path).unwrap();
    assert_eq!(reopened.get_selection("u1").await.unwrap(), ids(&["E1", "E9"]));
}

#[tokio::test]
async fn test_save_leaves_no_temporary_file() {
    let dir = tempdir().unwrap();
    let csv_path = dir.path().join("selections.csv");
    let store = CsvSelectionStore::new(&csv_path).unwrap();

    store.set_selection("u1", ids(&["E1"])).await.unwrap();

    let files: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name())
        .collect();
    assert_eq!(files, vec![std::ffi::OsString::from("selections.csv")]);
}

#[tokio::test]
async fn test_concurrent_saves_keep_file_consistent() {
    let dir = tempdir().unwrap();
    let store = Arc::new(CsvSelectionStore::new(dir.path().join("selections.csv")).unwrap());

    let mut handles = Vec::new();
    for i in 0..8 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            let user = format!("user{}", i % 2);
            let own = format!("E{}", i);
            store
                .set_selection(&user, ids(&[own.as_str(), "SHARED"]))
                .await
                .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // Last write wins per user, but every user ends with one complete set
    for user in ["user0", "user1"] {
        let selection = store.get_selection(user).await.unwrap();
        assert_eq!(selection.len(), 2);
        assert!(selection.contains("SHARED"));
    }
}
