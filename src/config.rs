use secrecy::SecretBox;
use serde::Deserialize;
use time::Duration;

use crate::repositories::RateLimitPolicy;

/// レート制限キーの取り方
///
/// X-Forwarded-For は詐称可能なため、`trust_forwarded_for` が有効な場合のみ参照する。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitKey {
    /// クライアントIPアドレス
    #[default]
    ClientIp,
    /// リクエストされたメールアドレス
    Email,
    /// IPアドレスとメールアドレスの組
    ClientIpAndEmail,
}

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// リセットリンクのベースURL（フロントエンドのURL）
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    // パスワードリセット設定
    #[serde(default = "default_password_reset_token_ttl_secs")]
    pub password_reset_token_ttl_secs: i64,
    #[serde(default = "default_password_reset_rate_limit")]
    pub password_reset_rate_limit: u32,
    #[serde(default = "default_password_reset_rate_limit_window_secs")]
    pub password_reset_rate_limit_window_secs: i64,
    #[serde(default = "default_password_min_length")]
    pub password_min_length: usize,
    #[serde(default)]
    pub rate_limit_key: RateLimitKey,
    /// リバースプロキシ配下でのみ有効にすること
    #[serde(default)]
    pub trust_forwarded_for: bool,

    /// CORS許可オリジン（カンマ区切り、未設定ならCORSレイヤーなし）
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    // SMTP設定（オプション - email機能有効時のみ使用）
    #[serde(default)]
    pub smtp_host: Option<String>,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub smtp_username: Option<SecretBox<String>>,
    pub smtp_password: Option<SecretBox<String>>,
    #[serde(default)]
    pub smtp_from_address: Option<String>,
}

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_PUBLIC_BASE_URL: &str = "http://localhost:3000";
const DEFAULT_SMTP_PORT: u16 = 587;
const DEFAULT_PASSWORD_RESET_TOKEN_TTL_SECS: i64 = 3600;
const DEFAULT_PASSWORD_RESET_RATE_LIMIT: u32 = 3;
const DEFAULT_PASSWORD_RESET_RATE_LIMIT_WINDOW_SECS: i64 = 3600;
const DEFAULT_PASSWORD_MIN_LENGTH: usize = 8;

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_public_base_url() -> String {
    DEFAULT_PUBLIC_BASE_URL.to_string()
}

fn default_smtp_port() -> u16 {
    DEFAULT_SMTP_PORT
}

fn default_password_reset_token_ttl_secs() -> i64 {
    DEFAULT_PASSWORD_RESET_TOKEN_TTL_SECS
}

fn default_password_reset_rate_limit() -> u32 {
    DEFAULT_PASSWORD_RESET_RATE_LIMIT
}

fn default_password_reset_rate_limit_window_secs() -> i64 {
    DEFAULT_PASSWORD_RESET_RATE_LIMIT_WINDOW_SECS
}

fn default_password_min_length() -> usize {
    DEFAULT_PASSWORD_MIN_LENGTH
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_base_url: default_public_base_url(),
            password_reset_token_ttl_secs: default_password_reset_token_ttl_secs(),
            password_reset_rate_limit: default_password_reset_rate_limit(),
            password_reset_rate_limit_window_secs: default_password_reset_rate_limit_window_secs(
            ),
            password_min_length: default_password_min_length(),
            rate_limit_key: RateLimitKey::default(),
            trust_forwarded_for: false,
            cors_allowed_origins: None,
            smtp_host: None,
            smtp_port: default_smtp_port(),
            smtp_username: None,
            smtp_password: None,
            smtp_from_address: None,
        }
    }
}

/// 設定値の検証エラー
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("環境変数の読み込みに失敗: {0}")]
    Env(#[from] envy::Error),

    #[error("{0} は1以上を指定してください")]
    NotPositive(&'static str),
}

impl Config {
    /// 環境変数から読み込み、値を検証する
    pub fn load() -> Result<Self, ConfigError> {
        let config: Self = envy::from_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.password_reset_token_ttl_secs <= 0 {
            return Err(ConfigError::NotPositive("PASSWORD_RESET_TOKEN_TTL_SECS"));
        }
        if self.password_reset_rate_limit == 0 {
            return Err(ConfigError::NotPositive("PASSWORD_RESET_RATE_LIMIT"));
        }
        if self.password_reset_rate_limit_window_secs <= 0 {
            return Err(ConfigError::NotPositive(
                "PASSWORD_RESET_RATE_LIMIT_WINDOW_SECS",
            ));
        }
        if self.password_min_length == 0 {
            return Err(ConfigError::NotPositive("PASSWORD_MIN_LENGTH"));
        }
        Ok(())
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::seconds(self.password_reset_token_ttl_secs)
    }

    pub fn rate_limit_policy(&self) -> RateLimitPolicy {
        RateLimitPolicy {
            limit: self.password_reset_rate_limit,
            window: Duration::seconds(self.password_reset_rate_limit_window_secs),
        }
    }

    /// CORS許可オリジンの一覧（空要素は除く）
    pub fn cors_origins(&self) -> Vec<String> {
        self.cors_allowed_origins
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_string)
            .collect()
    }
}
