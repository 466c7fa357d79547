use axum::{
    Json,
    extract::{Query, State, rejection::JsonRejection},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, INVALID_EMAIL_MESSAGE};
use crate::handlers::client::ClientIp;
use crate::state::AppState;

pub const RESET_REQUESTED_MESSAGE: &str =
    "If an account with that email exists, a password reset link has been sent.";
pub const PASSWORD_RESET_MESSAGE: &str = "Password has been successfully reset";

// === リセットリクエスト ===

/// 欠落・null・文字列以外の値もここでは受け付け、形式チェックで 400 にする
#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    #[serde(default)]
    pub email: Value,
}

impl ForgotPasswordRequest {
    pub fn email(&self) -> &str {
        self.email.as_str().unwrap_or_default()
    }
}

#[derive(Debug, Serialize)]
pub struct ForgotPasswordResponse {
    pub success: bool,
    pub message: String,
}

/// POST /auth/forgot-password
///
/// # Security
/// 形式が正しいメールアドレスには常に同じ200を返す（ユーザー存在有無を漏洩しない）
pub async fn forgot_password(
    State(state): State<AppState>,
    ClientIp(client_ip): ClientIp,
    body: Result<Json<ForgotPasswordRequest>, JsonRejection>,
) -> Result<Json<ForgotPasswordResponse>, AppError> {
    let Json(request) = body.map_err(|e| {
        tracing::debug!(error = %e, "パスワードリセット: リクエストボディを解釈できない");
        AppError::Validation(INVALID_EMAIL_MESSAGE.to_string())
    })?;

    state
        .password_reset_service
        .request_reset(request.email(), client_ip)
        .await?;

    Ok(Json(ForgotPasswordResponse {
        success: true,
        message: RESET_REQUESTED_MESSAGE.to_string(),
    }))
}

// === パスワードリセット実行 ===

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    #[serde(default)]
    pub token: Value,
    #[serde(default)]
    pub password: Value, // SecretBox不要（検証後すぐハッシュ化）
}

impl ResetPasswordRequest {
    pub fn token(&self) -> &str {
        self.token.as_str().unwrap_or_default()
    }

    pub fn password(&self) -> &str {
        self.password.as_str().unwrap_or_default()
    }
}

#[derive(Debug, Serialize)]
pub struct ResetPasswordResponse {
    pub success: bool,
    pub message: String,
}

/// POST /auth/reset-password
///
/// # Security
/// - token, password はログに出力しない
pub async fn reset_password(
    State(state): State<AppState>,
    body: Result<Json<ResetPasswordRequest>, JsonRejection>,
) -> Result<Json<ResetPasswordResponse>, AppError> {
    // トークンを読めないボディは無効トークンと同じ扱い
    let Json(request) = body.map_err(|e| {
        tracing::debug!(error = %e, "パスワードリセット: リクエストボディを解釈できない");
        AppError::InvalidOrExpiredToken
    })?;

    state
        .password_reset_service
        .reset_password(request.token(), request.password())
        .await?;

    Ok(Json(ResetPasswordResponse {
        success: true,
        message: PASSWORD_RESET_MESSAGE.to_string(),
    }))
}

// === トークン事前確認 ===

#[derive(Debug, Deserialize)]
pub struct VerifyTokenQuery {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyTokenResponse {
    pub valid: bool,
}

/// GET /auth/reset-password/verify?token=...
///
/// リセット画面の表示前にリンクの有効性を確認する。メールアドレスは返さない。
pub async fn verify_reset_token(
    State(state): State<AppState>,
    Query(query): Query<VerifyTokenQuery>,
) -> Result<Json<VerifyTokenResponse>, AppError> {
    let verification = state
        .password_reset_service
        .verify_token(&query.token)
        .await?;

    Ok(Json(VerifyTokenResponse {
        valid: verification.valid,
    }))
}
