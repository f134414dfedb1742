use std::path::Path;
use tempfile::tempdir;

use crate::error::ServiceError;
use crate::fixtures::{user, TEST_HASH_COST};
use crate::models::user::{ProfileUpdate, RegisterRequest, Role};
use crate::services::users::UserDirectory;

fn registration(username: &str, password: &str) -> RegisterRequest {
    RegisterRequest {
        username: username.to_string(),
        password: password.to_string(),
        class_group: Some("L1-A".to_string()),
        gender: Some("Female".to_string()),
    }
}

fn open(path: &Path) -> UserDirectory {
    UserDirectory::load(path)
        .unwrap()
        .with_password_cost(TEST_HASH_COST)
}

#[test]
fn test_load_creates_missing_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("users.csv");

    let users = open(&path);

    assert!(path.exists());
    assert_eq!(
        std::fs::read_to_string(&path).unwrap().trim_end(),
        "id,username,password_hash,class_group,gender,role"
    );
    assert!(users.find_by_username("alice").unwrap().is_none());
}

#[test]
fn test_duplicate_usernames_keep_first() {
    let users = UserDirectory::from_records(vec![
        user("u1", "alice", "first-pw", None, Role::Student),
        user("u2", "alice", "second-pw", None, Role::Admin),
    ]);

    let found = users.find_by_username("alice").unwrap().unwrap();
    assert_eq!(found.id, "u1");
    assert!(users.find_by_id("u2").unwrap().is_none());
}

#[tokio::test]
async fn test_register_persists_account() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("users.csv");
    let users = open(&path);

    let created = users
        .register(registration("  alice ", "correct horse"))
        .await
        .unwrap();

    assert_eq!(created.id, "u1");
    assert_eq!(created.username, "alice");
    assert_eq!(created.gender.as_deref(), Some("female"));
    assert_eq!(created.role, Role::Student);
    assert_ne!(created.password_hash, "correct horse");

    // A fresh load sees the new account and its password
    let reloaded = open(&path);
    let found = reloaded.authenticate("alice", "correct horse").await.unwrap();
    assert_eq!(found.id, "u1");
    assert_eq!(found.class_group.as_deref(), Some("L1-A"));
}

#[tokio::test]
async fn test_register_rejects_invalid_requests() {
    let dir = tempdir().unwrap();
    let users = open(&dir.path().join("users.csv"));
    users
        .register(registration("alice", "correct horse"))
        .await
        .unwrap();

    assert!(matches!(
        users.register(registration("alice", "another pass")).await,
        Err(ServiceError::Conflict(_))
    ));
    assert!(matches!(
        users.register(registration("bob", "short")).await,
        Err(ServiceError::Validation(_))
    ));
    assert!(matches!(
        users.register(registration("   ", "correct horse")).await,
        Err(ServiceError::Validation(_))
    ));

    let mut odd_gender = registration("carol", "correct horse");
    odd_gender.gender = Some("robot".to_string());
    assert!(matches!(
        users.register(odd_gender).await,
        Err(ServiceError::Validation(_))
    ));
}

#[tokio::test]
async fn test_authenticate_rejects_bad_credentials() {
    let users = UserDirectory::from_records(vec![user("u1", "alice", "alice-pw", None, Role::Student)]);

    assert!(users.authenticate("alice", "alice-pw").await.is_ok());
    assert!(matches!(
        users.authenticate("alice", "wrong").await,
        Err(ServiceError::Unauthorized(_))
    ));
    assert!(matches!(
        users.authenticate("nobody", "alice-pw").await,
        Err(ServiceError::Unauthorized(_))
    ));
}

#[tokio::test]
async fn test_change_password() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("users.csv");
    let users = open(&path);
    let created = users
        .register(registration("alice", "correct horse"))
        .await
        .unwrap();

    assert_eq!(
        users
            .change_password(&created.id, "wrong password", "battery staple")
            .await,
        Err(ServiceError::Validation("current password is incorrect".to_string()))
    );
    assert!(matches!(
        users.change_password(&created.id, "correct horse", "tiny").await,
        Err(ServiceError::Validation(_))
    ));

    users
        .change_password(&created.id, "correct horse", "battery staple")
        .await
        .unwrap();

    let reloaded = open(&path);
    assert!(reloaded.authenticate("alice", "battery staple").await.is_ok());
    assert!(reloaded.authenticate("alice", "correct horse").await.is_err());
}

#[test]
fn test_update_profile_keeps_omitted_fields() {
    let users = UserDirectory::from_records(vec![user("u1", "alice", "pw", Some("L1-A"), Role::Student)]);

    let updated = users
        .update_profile(
            "u1",
            ProfileUpdate {
                class_group: None,
                gender: Some("male".to_string()),
            },
        )
        .unwrap();
    assert_eq!(updated.class_group.as_deref(), Some("L1-A"));
    assert_eq!(updated.gender.as_deref(), Some("male"));

    assert!(matches!(
        users.update_profile("ghost", ProfileUpdate::default()),
        Err(ServiceError::NotFound(_))
    ));
}

#[test]
fn test_set_role_reports_change() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("users.csv");
    let mut writer = csv::Writer::from_path(&path).unwrap();
    writer
        .serialize(user("u1", "alice", "pw", None, Role::Student))
        .unwrap();
    writer.flush().unwrap();
    drop(writer);

    let users = open(&path);

    let (record, changed) = users.set_role("u1", Role::Admin).unwrap();
    assert!(changed);
    assert_eq!(record.role, Role::Admin);

    let (_, changed) = users.set_role("u1", Role::Admin).unwrap();
    assert!(!changed);

    assert_eq!(
        open(&path).find_by_id("u1").unwrap().unwrap().role,
        Role::Admin
    );
    assert!(matches!(
        users.set_role("ghost", Role::Admin),
        Err(ServiceError::NotFound(_))
    ));
}

#[test]
fn test_members_of_sorted_by_id() {
    let users = UserDirectory::from_records(vec![
        user("u3", "carol", "pw", Some("L1-A"), Role::Student),
        user("u1", "alice", "pw", Some("L1-A"), Role::Student),
        user("u2", "bob", "pw", Some("L1-B"), Role::Student),
    ]);

    let ids: Vec<String> = users
        .members_of("L1-A")
        .unwrap()
        .into_iter()
        .map(|u| u.id)
        .collect();
    assert_eq!(ids, vec!["u1", "u3"]);
}
