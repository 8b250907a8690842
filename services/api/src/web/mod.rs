pub mod auth;
pub mod chat;
pub mod images;
pub mod middleware;
pub mod rest;
pub mod state;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::services::ServeDir;

pub use middleware::require_auth;
pub use state::AppState;

/// Builds the API router: public auth routes, cookie-protected routes and
/// the generated image files.
pub fn router(state: Arc<AppState>) -> Router {
    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/auth/signup", post(auth::signup_handler))
        .route("/auth/login", post(auth::login_handler))
        .route("/auth/logout", post(auth::logout_handler))
        .route("/auth/forgot", post(auth::forgot_handler));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route("/state", get(rest::get_state_handler))
        .route("/chat", post(chat::chat_handler))
        .route("/sessions/create", post(rest::create_session_handler))
        .route("/sessions/switch", post(rest::switch_session_handler))
        .route("/sessions/delete", post(rest::delete_session_handler))
        .route("/sessions/rename", post(rest::rename_session_handler))
        .route("/theme", post(rest::theme_handler))
        .route("/personality", post(rest::personality_handler))
        .route("/quota", get(rest::quota_handler))
        .route("/tiers", get(rest::tiers_handler))
        .route("/tiers/upgrade", post(rest::upgrade_handler))
        .route("/images/generate", post(images::generate_image_handler))
        .layer(axum_middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .nest_service("/images/files", ServeDir::new(state.config.images_dir.clone()))
        .with_state(state)
}
