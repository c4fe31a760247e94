use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{auth_action, handlers, state::AppState};

pub fn create_router(state: AppState) -> Router {
    // Configure CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/dashboard", get(handlers::dashboard_snapshot))
        .route("/api/users/count", get(handlers::user_count))
        .route("/api/articles/:id/views", post(handlers::record_view))
        .route("/api/articles/:id/shares", post(handlers::record_share))
        .route("/api/articles/:id/likes", post(handlers::record_like))
        .route("/auth/action", get(auth_action::auth_action))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
