use axum::{http::HeaderMap, http::StatusCode, routing::get, Json, Router};
use serde_json::{json, Value};
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

use crate::error::ServiceError;
use crate::fixtures::{entry, session, time};
use crate::models::entry::EntryKind;
use crate::models::user::Role;
use crate::services::catalog::{is_visible, CsvEntryCatalog, EntryCatalog, HttpEntryCatalog};

const CATALOG_CSV: &str = "\
id,kind,class_group,gender,label,day,start_time,end_time,location
C1,class,L1-A,,Algebra,Monday,08:00,10:00,Room 1
C2,class,L1-B,,Physics,Monday,08:00,10:00,Room 2
M1,meal,,,Lunch menu,Tuesday,12:00,13:00,
G1,gym,,female,Gym (women),Wednesday,17:00:00,18:00:00,Gym hall
G2,gym,,male,Gym (men),Wednesday,18:00,19:00,Gym hall
X1,class,L1-A,,Broken,Monday,8 o'clock,10:00,Room 3
";

fn catalog_file() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(CATALOG_CSV.as_bytes()).unwrap();
    file
}

fn ids(entries: &[crate::models::entry::ScheduleEntry]) -> Vec<&str> {
    entries.iter().map(|e| e.id.as_str()).collect()
}

#[test]
fn test_visibility_by_class_group() {
    let mut own = entry("A", "Monday", "08:00", "09:00");
    own.class_group = Some("L1-A".to_string());
    let mut other = entry("B", "Monday", "08:00", "09:00");
    other.class_group = Some("L1-B".to_string());
    let shared = entry("C", "Monday", "08:00", "09:00");

    let student = session("u1", Some("L1-A"));
    assert!(is_visible(&own, &student));
    assert!(!is_visible(&other, &student));
    assert!(is_visible(&shared, &student));

    let unassigned = session("u2", None);
    assert!(!is_visible(&own, &unassigned));
    assert!(is_visible(&shared, &unassigned));

    let mut admin = session("root", None);
    admin.role = Role::Admin;
    assert!(is_visible(&other, &admin));
}

#[test]
fn test_visibility_by_gender() {
    let mut women_only = entry("G", "Monday", "17:00", "18:00");
    women_only.gender = Some("Female".to_string());

    let mut student = session("u1", None);
    student.gender = Some("female".to_string());
    assert!(is_visible(&women_only, &student));

    student.gender = Some("male".to_string());
    assert!(!is_visible(&women_only, &student));

    // Without a gender no restricted schedule is visible
    student.gender = None;
    assert!(!is_visible(&women_only, &student));
    assert!(is_visible(&entry("C", "Monday", "08:00", "09:00"), &student));
}

#[test]
fn test_read_entries_skips_unreadable_rows() {
    let file = catalog_file();
    let entries = CsvEntryCatalog::read_entries(file.path()).unwrap();

    assert_eq!(ids(&entries), vec!["C1", "C2", "M1", "G1", "G2"]);

    let meal = &entries[2];
    assert_eq!(meal.kind, EntryKind::Meal);
    assert_eq!(meal.location, None);
    assert_eq!(meal.class_group, None);

    // Seconds are accepted and truncated to the minute
    assert_eq!(entries[3].start_time, time("17:00"));
}

#[test]
fn test_missing_catalog_file_is_dependency_error() {
    let result = CsvEntryCatalog::read_entries(std::path::Path::new("/nonexistent/catalog.csv"));
    assert!(matches!(
        result,
        Err(ServiceError::DependencyUnavailable { .. })
    ));
}

#[tokio::test]
async fn test_csv_catalog_filters_per_session() {
    let file = catalog_file();
    let catalog = CsvEntryCatalog::new(file.path());

    let mut student = session("u1", Some("L1-A"));
    student.gender = Some("male".to_string());

    let visible = catalog.list_entries(&student).await.unwrap();
    assert_eq!(ids(&visible), vec!["C1", "M1", "G2"]);
}

#[tokio::test]
async fn test_csv_catalog_hides_gym_without_gender() {
    let file = catalog_file();
    let catalog = CsvEntryCatalog::new(file.path());

    let visible = catalog
        .list_entries(&session("u1", Some("L1-A")))
        .await
        .unwrap();
    assert_eq!(ids(&visible), vec!["C1", "M1"]);
}

async fn remote_classes(headers: HeaderMap) -> Result<Json<Value>, StatusCode> {
    let authorized = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        == Some("Bearer test-token");
    if !authorized {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(Json(json!([
        {
            "id": 7,
            "course_name": "Databases",
            "day": "Thursday",
            "start_time": "10:00:00",
            "end_time": "12:00:00",
            "location": "Lab 2",
            "student_class": 3,
            "student_class_name": "L2-C"
        },
        {
            "id": "8",
            "label": "Networks",
            "day": "Friday",
            "start_time": "not a time",
            "end_time": "12:00"
        }
    ])))
}

// Serve a router on an ephemeral port and return its base URL
async fn spawn_remote(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_http_catalog_maps_remote_entries() {
    let base = spawn_remote(Router::new().route("/api/classes/", get(remote_classes))).await;
    let catalog = HttpEntryCatalog::new(&format!("{}/", base), Duration::from_secs(5)).unwrap();

    assert_eq!(catalog.classes_url(), format!("{}/api/classes/", base));

    let entries = catalog
        .list_entries(&session("u1", Some("L2-C")))
        .await
        .unwrap();

    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].id, "7");
    assert_eq!(entries[0].label, "Databases");
    assert_eq!(entries[0].class_group.as_deref(), Some("L2-C"));
    assert_eq!(entries[0].start_time, time("10:00"));
}

#[tokio::test]
async fn test_http_catalog_error_status_is_dependency_error() {
    let base = spawn_remote(Router::new().route(
        "/api/classes/",
        get(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
    ))
    .await;
    let catalog = HttpEntryCatalog::new(&base, Duration::from_secs(5)).unwrap();

    let err = catalog
        .list_entries(&session("u1", None))
        .await
        .unwrap_err();
    assert!(err.is_retryable());
}
