pub mod clock;
pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod repositories;
pub mod services;
pub mod state;

use axum::{
    Router,
    routing::{get, post},
};
use http::{HeaderValue, Method, header::CONTENT_TYPE};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::state::AppState;

/// Router の構築
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors_origins());

    let router = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/auth/forgot-password", post(handlers::forgot_password))
        .route("/auth/reset-password", post(handlers::reset_password))
        .route(
            "/auth/reset-password/verify",
            get(handlers::verify_reset_token),
        )
        .with_state(state);

    match cors {
        Some(cors) => router.layer(cors),
        None => router,
    }
}

/// 許可オリジンが1つ以上ある場合のみ CORS レイヤーを作る
fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(error = ?e, origin = %origin, "無効なCORSオリジンを無視");
                None
            }
        })
        .collect();

    if origins.is_empty() {
        return None;
    }

    tracing::info!(origins = origins.len(), "CORS を有効化");

    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([CONTENT_TYPE]),
    )
}
