use axum::{Json, extract::State};
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    /// "log" の場合、リセットリンクはメールで届かずログにのみ出る
    pub mail_transport: &'static str,
}

/// GET /health
///
/// ストアはプロセス内のため外部依存の確認はしない。
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        mail_transport: state.password_reset_service.mail_transport(),
    })
}
