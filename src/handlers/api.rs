use axum::{
    extract::{Json as ExtractJson, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::Local;
use std::sync::Arc;
use tracing::{info, warn};

use crate::auth::{Session, TokenKind, TokenSigner};
use crate::error::ServiceError;
use crate::models::entry::ScheduleEntry;
use crate::models::notification::{BroadcastRequest, BroadcastResponse, Notification, UnreadCount};
use crate::models::timetable::{SaveTimetableRequest, TimetableView};
use crate::models::user::{
    ChangePasswordRequest, LoginRequest, ProfileResponse, ProfileUpdate, RefreshRequest,
    RegisterRequest, RoleUpdateRequest, TokenPair,
};
use crate::services::calendar::render_ics;
use crate::services::notifications::NotificationService;
use crate::services::timetable::TimetableEngine;
use crate::services::users::UserDirectory;

// AppState struct containing shared resources
pub struct AppState {
    pub engine: TimetableEngine,
    pub signer: Arc<TokenSigner>,
    pub users: Arc<UserDirectory>,
    pub notifications: Arc<NotificationService>,
}

// Login endpoint
pub async fn login(
    State(state): State<Arc<AppState>>,
    ExtractJson(request): ExtractJson<LoginRequest>,
) -> Result<Json<TokenPair>, ServiceError> {
    info!("Received login request for user: {}", request.username);

    let user = state
        .users
        .authenticate(&request.username, &request.password)
        .await
        .map_err(|e| {
            warn!("Failed login attempt for user: {}", request.username);
            e
        })?;

    let pair = state.signer.issue_pair(&user)?;
    info!("User {} logged in", user.id);
    Ok(Json(pair))
}

// Token refresh endpoint
pub async fn refresh_token(
    State(state): State<Arc<AppState>>,
    ExtractJson(request): ExtractJson<RefreshRequest>,
) -> Result<Json<TokenPair>, ServiceError> {
    let claims = state.signer.verify(&request.refresh, TokenKind::Refresh)?;

    // Re-read the user so role and class group changes take effect
    let user = state
        .users
        .find_by_id(&claims.sub)?
        .ok_or_else(|| ServiceError::Unauthorized("user no longer exists".to_string()))?;

    info!("Refreshing tokens for user {}", user.id);
    Ok(Json(state.signer.issue_pair(&user)?))
}

// Registration endpoint
pub async fn register(
    State(state): State<Arc<AppState>>,
    ExtractJson(request): ExtractJson<RegisterRequest>,
) -> Result<(StatusCode, Json<ProfileResponse>), ServiceError> {
    info!("Received registration request for user: {}", request.username);

    let user = state.users.register(request).await?;
    Ok((StatusCode::CREATED, Json(ProfileResponse::from(&user))))
}

// Current session profile endpoint
pub async fn me(session: Session) -> Json<ProfileResponse> {
    Json(ProfileResponse {
        user_id: session.user_id,
        username: session.username,
        class_group: session.class_group,
        gender: session.gender,
        role: session.role,
    })
}

// Profile update endpoint; tokens pick up the change on the next refresh
pub async fn update_me(
    State(state): State<Arc<AppState>>,
    session: Session,
    ExtractJson(update): ExtractJson<ProfileUpdate>,
) -> Result<Json<ProfileResponse>, ServiceError> {
    let user = state.users.update_profile(&session.user_id, update)?;
    Ok(Json(ProfileResponse::from(&user)))
}

// Password change endpoint
pub async fn change_password(
    State(state): State<Arc<AppState>>,
    session: Session,
    ExtractJson(request): ExtractJson<ChangePasswordRequest>,
) -> Result<StatusCode, ServiceError> {
    state
        .users
        .change_password(&session.user_id, &request.current_password, &request.new_password)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// List catalog entries visible to the caller
pub async fn list_catalog(
    State(state): State<Arc<AppState>>,
    session: Session,
) -> Result<Json<Vec<ScheduleEntry>>, ServiceError> {
    info!("Received catalog request from user {}", session.user_id);

    let mut entries = state.engine.list_catalog(&session).await?;
    entries.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(Json(entries))
}

// Load personal timetable endpoint
pub async fn get_timetable(
    State(state): State<Arc<AppState>>,
    session: Session,
) -> Result<Json<TimetableView>, ServiceError> {
    info!("Received timetable request from user {}", session.user_id);
    Ok(Json(state.engine.load_timetable(&session).await?))
}

// Save personal timetable endpoint
pub async fn save_timetable(
    State(state): State<Arc<AppState>>,
    session: Session,
    ExtractJson(request): ExtractJson<SaveTimetableRequest>,
) -> Result<Json<TimetableView>, ServiceError> {
    info!(
        "Received timetable save from user {} with {} entries",
        session.user_id,
        request.entry_ids.len()
    );

    let view = state.engine.save_timetable(&session, request.entry_ids).await?;
    if !view.conflicts.is_empty() {
        info!(
            "Timetable of user {} saved with {} conflicts",
            session.user_id,
            view.conflicts.len()
        );
    }
    Ok(Json(view))
}

// Calendar export endpoint
pub async fn export_timetable_ics(
    State(state): State<Arc<AppState>>,
    session: Session,
) -> Result<Response, ServiceError> {
    info!("Received calendar export request from user {}", session.user_id);

    let view = state.engine.load_timetable(&session).await?;
    let body = render_ics(&view.entries, &session.user_id, Local::now().date_naive());

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/calendar; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=uca_timetable.ics",
            ),
        ],
        body,
    )
        .into_response())
}

// Notification feed endpoint
pub async fn list_notifications(
    State(state): State<Arc<AppState>>,
    session: Session,
) -> Result<Json<Vec<Notification>>, ServiceError> {
    Ok(Json(state.notifications.list_for(&session.user_id)?))
}

pub async fn unread_count(
    State(state): State<Arc<AppState>>,
    session: Session,
) -> Result<Json<UnreadCount>, ServiceError> {
    let unread = state.notifications.unread_count(&session.user_id)?;
    Ok(Json(UnreadCount { unread }))
}

pub async fn mark_notification_read(
    State(state): State<Arc<AppState>>,
    session: Session,
    Path(notification_id): Path<u64>,
) -> Result<StatusCode, ServiceError> {
    state.notifications.mark_read(&session.user_id, notification_id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn mark_all_notifications_read(
    State(state): State<Arc<AppState>>,
    session: Session,
) -> Result<StatusCode, ServiceError> {
    let changed = state.notifications.mark_all_read(&session.user_id)?;
    info!("Marked {} notifications read for user {}", changed, session.user_id);
    Ok(StatusCode::NO_CONTENT)
}

// Admin broadcast to a class group
pub async fn broadcast_notification(
    State(state): State<Arc<AppState>>,
    session: Session,
    ExtractJson(request): ExtractJson<BroadcastRequest>,
) -> Result<Json<BroadcastResponse>, ServiceError> {
    session.require_admin()?;

    if request.message.trim().is_empty() {
        return Err(ServiceError::Validation("message must not be empty".to_string()));
    }

    let notified = state.notifications.notify_class_group(
        &state.users,
        &session.user_id,
        &request.class_group,
        &request.kind,
        &request.message,
    )?;

    Ok(Json(BroadcastResponse { notified }))
}

// Admin role change, the user is notified when the role actually changes
pub async fn update_user_role(
    State(state): State<Arc<AppState>>,
    session: Session,
    Path(user_id): Path<String>,
    ExtractJson(request): ExtractJson<RoleUpdateRequest>,
) -> Result<Json<ProfileResponse>, ServiceError> {
    session.require_admin()?;

    let (user, changed) = state.users.set_role(&user_id, request.role)?;
    if changed {
        state.notifications.notify_user(
            &user.id,
            "role_updated",
            &format!("Your role has been updated to: {}", user.role),
        )?;
    }

    Ok(Json(ProfileResponse::from(&user)))
}
