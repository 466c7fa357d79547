use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::repositories::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("バリデーションエラー: {0}")]
    Validation(String),

    #[error("リクエスト回数の上限を超過")]
    RateLimited,

    /// 不在・期限切れ・使用済みを区別しない
    #[error("無効または期限切れのトークンです")]
    InvalidOrExpiredToken,

    #[error("ストアエラー")]
    Store(#[from] StoreError),

    #[error("内部エラー")]
    Internal(#[from] anyhow::Error),
}

pub const INVALID_EMAIL_MESSAGE: &str = "Invalid email format";
pub const INVALID_OR_EXPIRED_TOKEN_MESSAGE: &str = "Invalid or expired reset token";
pub const RATE_LIMITED_MESSAGE: &str = "Too many password reset requests. Please try again later.";
const INTERNAL_ERROR_MESSAGE: &str = "An unexpected error occurred";

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Self::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                RATE_LIMITED_MESSAGE.to_string(),
            ),
            Self::InvalidOrExpiredToken => (
                StatusCode::BAD_REQUEST,
                INVALID_OR_EXPIRED_TOKEN_MESSAGE.to_string(), // 原因の漏洩防止
            ),
            Self::Store(e) => {
                tracing::error!(error = ?e, "ストアエラー");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    INTERNAL_ERROR_MESSAGE.to_string(),
                )
            }
            Self::Internal(e) => {
                tracing::error!(error = ?e, "内部エラー");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    INTERNAL_ERROR_MESSAGE.to_string(),
                )
            }
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}
