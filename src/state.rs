use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::AppError;
use crate::repositories::{MemoryCredentialStore, MemoryRateLimitStore, MemoryTokenStore};
use crate::services::{EmailService, PasswordResetOptions, PasswordResetService};

/// アプリケーション共有状態
///
/// axum の State として全ハンドラーで共有される。
/// Clone は必須（axum が内部で clone するため）。
#[derive(Clone)]
pub struct AppState {
    /// アプリケーション設定（Arc で共有）
    pub config: Arc<Config>,
    /// パスワードリセットサービス
    pub password_reset_service: PasswordResetService,
}

impl AppState {
    /// 新しい AppState を作成
    ///
    /// ストアはプロセス内メモリ（再起動で消える）。
    pub fn new(config: Config) -> Result<Self, AppError> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let token_store = MemoryTokenStore::new(config.token_ttl(), clock.clone());
        let rate_limiter = MemoryRateLimitStore::new(config.rate_limit_policy(), clock.clone());
        let credential_store = MemoryCredentialStore::new();

        let email_service = EmailService::from_config(&config).map_err(|e| {
            tracing::error!(error = %e, "メールサービスの初期化に失敗");
            AppError::Internal(anyhow::anyhow!("email service initialization error"))
        })?;

        tracing::info!(
            token_ttl_secs = config.password_reset_token_ttl_secs,
            rate_limit = config.password_reset_rate_limit,
            rate_limit_window_secs = config.password_reset_rate_limit_window_secs,
            rate_limit_key = ?config.rate_limit_key,
            "パスワードリセットサービスを初期化"
        );

        let password_reset_service = PasswordResetService::new(
            Arc::new(token_store),
            Arc::new(rate_limiter),
            Arc::new(credential_store),
            email_service,
            clock,
            PasswordResetOptions::from_config(&config),
        );

        Ok(Self::with_service(config, password_reset_service))
    }

    /// 構築済みのサービスから AppState を作成（テストでストアや時計を差し替える場合）
    pub fn with_service(config: Config, password_reset_service: PasswordResetService) -> Self {
        Self {
            config: Arc::new(config),
            password_reset_service,
        }
    }
}
