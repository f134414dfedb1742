use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tracing::info;

use crate::handlers::api::{
    broadcast_notification, change_password, export_timetable_ics, get_timetable, list_catalog,
    list_notifications, login, mark_all_notifications_read, mark_notification_read, me,
    refresh_token, register, save_timetable, unread_count, update_me, update_user_role,
    AppState,
};
use crate::handlers::health::health_check;

pub fn create_router(app_state: Arc<AppState>) -> Router {
    // Health check is always available without a token
    let health_route = Router::new().route("/health", get(health_check));

    let auth_routes = Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/refresh", post(refresh_token))
        .route("/api/auth/register", post(register))
        .route("/api/auth/me", get(me).put(update_me))
        .route("/api/auth/change-password", post(change_password));

    let timetable_routes = Router::new()
        .route("/api/catalog", get(list_catalog))
        .route(
            "/api/timetable",
            get(get_timetable).put(save_timetable).post(save_timetable),
        )
        .route("/api/timetable/ics", get(export_timetable_ics));

    let notification_routes = Router::new()
        .route("/api/notifications", get(list_notifications))
        .route("/api/notifications/unread-count", get(unread_count))
        .route("/api/notifications/read-all", post(mark_all_notifications_read))
        .route("/api/notifications/:notification_id/read", post(mark_notification_read))
        .route("/api/admin/notifications", post(broadcast_notification));

    let admin_routes =
        Router::new().route("/api/admin/users/:user_id/role", put(update_user_role));

    info!("Registered auth, timetable, notification and admin routes");

    Router::new()
        .merge(health_route)
        .merge(auth_routes)
        .merge(timetable_routes)
        .merge(notification_routes)
        .merge(admin_routes)
        .with_state(app_state)
}
