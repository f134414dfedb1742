//! UCA Timetable Service
//!
//! Backend for personal university timetables. Students pick entries from
//! the catalog visible to them, the service reports same-day overlaps,
//! stores the selection and exports it as an iCalendar file.
//!
//! # Modules
//!
//! - `services::timetable`: day grouping, conflict detection and the
//!   `TimetableEngine` that loads and saves selections
//! - `services::catalog` / `services::selection_store`: collaborator traits
//!   and their CSV and HTTP implementations
//! - `auth`: HMAC-signed access/refresh tokens and the request `Session`
//! - `handlers` / `routes`: the axum HTTP surface
//!
//! # Authentication
//!
//! Tokens are signed with HMAC-SHA256 using the configured secret. Every
//! handler receives an explicit `Session` built from the bearer token; no
//! global token state is kept.

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;

#[cfg(test)]
pub(crate) mod fixtures;


// Re-export the main API types for ease of use
pub use auth::{Session, TokenSigner};
pub use error::ServiceError;
pub use handlers::api::AppState;
pub use routes::create_router;
pub use services::timetable::{find_conflicts, group_by_day, TimetableEngine};
