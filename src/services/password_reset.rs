use std::net::IpAddr;
use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use rand::rngs::OsRng;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::clock::Clock;
use crate::config::{Config, RateLimitKey};
use crate::error::{AppError, INVALID_EMAIL_MESSAGE};
use crate::models::{ResetToken, Verification};
use crate::repositories::{CredentialStore, RateLimitStore, TokenStore};
use crate::services::{EmailService, auth::hash_password};

const EMAIL_PATTERN: &str = r"^[^\s@]+@[^\s@]+\.[^\s@]+$";

/// 発行したトークン
///
/// `token` は平文。メール送信以外の用途に使わないこと。
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub record: ResetToken,
}

/// パスワードリセットの動作設定
#[derive(Debug, Clone, Copy)]
pub struct PasswordResetOptions {
    pub password_min_length: usize,
    pub rate_limit_key: RateLimitKey,
}

impl PasswordResetOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            password_min_length: config.password_min_length,
            rate_limit_key: config.rate_limit_key,
        }
    }
}

impl Default for PasswordResetOptions {
    fn default() -> Self {
        Self {
            password_min_length: 8,
            rate_limit_key: RateLimitKey::ClientIp,
        }
    }
}

/// パスワードリセットサービス
///
/// トークンの状態遷移: 発行 → 検証（何度でも、非破壊）→ 消費 または 期限切れ。
/// 消費・期限切れから発行済みに戻ることはない。
#[derive(Clone)]
pub struct PasswordResetService {
    token_store: Arc<dyn TokenStore>,
    rate_limiter: Arc<dyn RateLimitStore>,
    credential_store: Arc<dyn CredentialStore>,
    email_service: EmailService,
    clock: Arc<dyn Clock>,
    options: PasswordResetOptions,
}

impl PasswordResetService {
    /// 新しい PasswordResetService を作成
    pub fn new(
        token_store: Arc<dyn TokenStore>,
        rate_limiter: Arc<dyn RateLimitStore>,
        credential_store: Arc<dyn CredentialStore>,
        email_service: EmailService,
        clock: Arc<dyn Clock>,
        options: PasswordResetOptions,
    ) -> Self {
        Self {
            token_store,
            rate_limiter,
            credential_store,
            email_service,
            clock,
            options,
        }
    }

    /// パスワードリセットをリクエスト
    ///
    /// # Security
    /// - ユーザーの存在確認をしない（存在有無に関わらず同じ処理・同じ応答）
    /// - メール送信はバックグラウンドで行い、失敗しても成功を返す
    /// - トークン（平文）はログに出力しない
    pub async fn request_reset(
        &self,
        email: &str,
        client_ip: Option<IpAddr>,
    ) -> Result<(), AppError> {
        validate_email(email)?;

        let identifier = self.rate_limit_identifier(email, client_ip);
        if !self.rate_limiter.check_and_record(&identifier).await? {
            tracing::warn!(rate_limit_key = %identifier, "パスワードリセット: レート制限超過");
            return Err(AppError::RateLimited);
        }

        let issued = self.create_token(email).await?;
        let token_id = issued.record.id;

        self.email_service
            .dispatch_password_reset_email(email.to_string(), issued.token, token_id);

        tracing::info!(email = %email, %token_id, "パスワードリセットリクエスト受付");

        Ok(())
    }

    /// パスワードをリセット
    ///
    /// 不在・期限切れ・使用済みのトークンは全て `InvalidOrExpiredToken`。
    ///
    /// # Security
    /// - トークン・新パスワードはログに出力しない
    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<(), AppError> {
        let token_hash = hash_token(token);

        // トークン検証（非破壊）
        if self.token_store.find(&token_hash).await?.is_none() {
            tracing::warn!("パスワードリセット: 無効または期限切れのトークン");
            return Err(AppError::InvalidOrExpiredToken);
        }

        // パスワード強度チェック
        self.validate_password(new_password)?;

        // パスワードをargon2ハッシュ化（トークン消費前に済ませる）
        let password_hash = hash_password(new_password)?;

        // トークン消費（同時リクエストでは1件のみ成功）
        let record = self.token_store.take(&token_hash).await?.ok_or_else(|| {
            tracing::warn!("パスワードリセット: トークンは既に使用済み");
            AppError::InvalidOrExpiredToken
        })?;

        // 書き込みに失敗したらトークンを戻す（発行時刻は変わらないので有効期限も同じ）
        let updated = self
            .credential_store
            .update_password(&record.owner, password_hash)
            .await;
        if let Err(e) = updated {
            tracing::warn!(token_id = %record.id, "パスワード更新に失敗: トークンを復元");
            self.token_store.insert(token_hash, record).await?;
            return Err(e.into());
        }

        tracing::info!(token_id = %record.id, "パスワードリセット完了");

        Ok(())
    }

    /// トークンを発行して保存
    pub async fn create_token(&self, owner: &str) -> Result<IssuedToken, AppError> {
        let token = generate_token();
        let record = ResetToken::new(owner, self.clock.now());

        self.token_store
            .insert(hash_token(&token), record.clone())
            .await?;

        tracing::debug!(token_id = %record.id, "リセットトークン発行");

        Ok(IssuedToken { token, record })
    }

    /// トークンを検証（消費しない）
    pub async fn verify_token(&self, token: &str) -> Result<Verification, AppError> {
        let verification = match self.token_store.find(&hash_token(token)).await? {
            Some(record) => Verification::valid(record.owner),
            None => Verification::invalid(),
        };
        Ok(verification)
    }

    /// トークンを消費し、消費できたかを返す
    pub async fn consume_token(&self, token: &str) -> Result<bool, AppError> {
        Ok(self.token_store.take(&hash_token(token)).await?.is_some())
    }

    /// リセットメールの送信手段（"smtp" / "log"）
    pub fn mail_transport(&self) -> &'static str {
        self.email_service.transport()
    }

    /// レート制限のキーを組み立てる
    fn rate_limit_identifier(&self, email: &str, client_ip: Option<IpAddr>) -> String {
        let ip = client_ip
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let email = email.trim().to_lowercase();

        match self.options.rate_limit_key {
            RateLimitKey::ClientIp => format!("ip:{ip}"),
            RateLimitKey::Email => format!("email:{email}"),
            RateLimitKey::ClientIpAndEmail => format!("ip:{ip}|email:{email}"),
        }
    }

    fn validate_password(&self, password: &str) -> Result<(), AppError> {
        let min = self.options.password_min_length;
        if password.chars().count() < min {
            return Err(AppError::Validation(format!(
                "Password must be at least {min} characters long"
            )));
        }
        Ok(())
    }
}

/// メールアドレスの形式チェック
pub fn validate_email(email: &str) -> Result<(), AppError> {
    if Regex::new(EMAIL_PATTERN).is_ok_and(|re| re.is_match(email)) {
        Ok(())
    } else {
        Err(AppError::Validation(INVALID_EMAIL_MESSAGE.to_string()))
    }
}

/// 32バイトのランダムトークンを生成（OS乱数）
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// トークンをSHA256でハッシュ化
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use time::Duration;
    use time::macros::datetime;
    use tokio::sync::mpsc;

    use super::*;
    use crate::clock::ManualClock;
    use crate::repositories::{
        MemoryCredentialStore, MemoryRateLimitStore, MemoryTokenStore, RateLimitPolicy,
        StoreError, StoreFuture,
    };
    use crate::services::email::{DispatchError, DispatchFuture, Mailer};

    /// 送信したメール本文からトークンを取り出せるようにする
    struct ChannelMailer {
        sent: mpsc::UnboundedSender<(String, String)>,
    }

    impl Mailer for ChannelMailer {
        fn send<'a>(
            &'a self,
            to: &'a str,
            _subject: &'a str,
            body: &'a str,
        ) -> DispatchFuture<'a> {
            Box::pin(async move {
                let token = body
                    .split("token=")
                    .nth(1)
                    .and_then(|rest| rest.split_whitespace().next())
                    .unwrap_or_default()
                    .to_string();
                let _ = self.sent.send((to.to_string(), token));
                Ok(())
            })
        }
    }

    struct FailingMailer;

    impl Mailer for FailingMailer {
        fn send<'a>(
            &'a self,
            _to: &'a str,
            _subject: &'a str,
            _body: &'a str,
        ) -> DispatchFuture<'a> {
            Box::pin(async move { Err(DispatchError::Transport("smtp down".to_string())) })
        }
    }

    struct FailingCredentialStore;

    impl CredentialStore for FailingCredentialStore {
        fn update_password<'a>(
            &'a self,
            _email: &'a str,
            _password_hash: String,
        ) -> StoreFuture<'a, ()> {
            Box::pin(async move {
                Err(StoreError::Backend {
                    message: "connection refused".to_string(),
                })
            })
        }
    }

    struct Fixture {
        service: PasswordResetService,
        clock: ManualClock,
        credentials: MemoryCredentialStore,
        outbox: mpsc::UnboundedReceiver<(String, String)>,
    }

    fn create_fixture(options: PasswordResetOptions) -> Fixture {
        let (tx, rx) = mpsc::unbounded_channel();
        create_fixture_with_mailer(options, Arc::new(ChannelMailer { sent: tx }), rx)
    }

    fn create_fixture_with_mailer(
        options: PasswordResetOptions,
        mailer: Arc<dyn Mailer>,
        outbox: mpsc::UnboundedReceiver<(String, String)>,
    ) -> Fixture {
        let clock = ManualClock::new(datetime!(2025-06-01 09:00 UTC));
        let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());
        let credentials = MemoryCredentialStore::new();
        let service = PasswordResetService::new(
            Arc::new(MemoryTokenStore::new(
                Duration::hours(1),
                shared_clock.clone(),
            )),
            Arc::new(MemoryRateLimitStore::new(
                RateLimitPolicy::default(),
                shared_clock.clone(),
            )),
            Arc::new(credentials.clone()),
            EmailService::new(mailer, "https://organate.vercel.app", Duration::hours(1)),
            shared_clock,
            options,
        );
        Fixture {
            service,
            clock,
            credentials,
            outbox,
        }
    }

    fn client() -> Option<IpAddr> {
        Some(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7)))
    }

    #[test]
    fn test_generate_token() {
        let token = generate_token();
        // 32バイト → base64url（パディングなし）で43文字
        assert_eq!(token.len(), 43);
        assert!(
            token
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
        assert_ne!(token, generate_token());
    }

    #[test]
    fn test_hash_token_is_hex_sha256() {
        let hash = hash_token("token");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hash_token("token"));
        assert_ne!(hash, hash_token("other"));
    }

    #[test]
    fn test_validate_email() {
        assert!(validate_email("user@example.com").is_ok());
        assert!(validate_email("").is_err());
        assert!(validate_email("invalid-email").is_err());
        assert!(validate_email("user@example").is_err());
        assert!(validate_email("us er@example.com").is_err());
    }

    #[tokio::test]
    async fn test_request_reset_mails_usable_token() {
        let mut fixture = create_fixture(PasswordResetOptions::default());

        fixture
            .service
            .request_reset("user@example.com", client())
            .await
            .unwrap();

        let (to, token) = fixture.outbox.recv().await.unwrap();
        assert_eq!(to, "user@example.com");
        let verification = fixture.service.verify_token(&token).await.unwrap();
        assert_eq!(verification, Verification::valid("user@example.com"));
    }

    #[tokio::test]
    async fn test_request_reset_rejects_malformed_email_without_counting() {
        let fixture = create_fixture(PasswordResetOptions::default());

        for _ in 0..5 {
            let result = fixture.service.request_reset("not-an-email", client()).await;
            assert!(matches!(result, Err(AppError::Validation(_))));
        }
        assert!(
            fixture
                .service
                .request_reset("user@example.com", client())
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_request_reset_rate_limited_after_three() {
        let fixture = create_fixture(PasswordResetOptions::default());

        for _ in 0..3 {
            fixture
                .service
                .request_reset("user@example.com", client())
                .await
                .unwrap();
        }
        let result = fixture
            .service
            .request_reset("user@example.com", client())
            .await;
        assert!(matches!(result, Err(AppError::RateLimited)));

        // ウィンドウ経過後は再び許可
        fixture.clock.advance(Duration::hours(1));
        assert!(
            fixture
                .service
                .request_reset("user@example.com", client())
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_rate_limit_key_by_ip_and_email() {
        let fixture = create_fixture(PasswordResetOptions {
            rate_limit_key: RateLimitKey::ClientIpAndEmail,
            ..PasswordResetOptions::default()
        });

        for _ in 0..3 {
            fixture
                .service
                .request_reset("a@example.com", client())
                .await
                .unwrap();
        }
        assert!(
            fixture
                .service
                .request_reset("b@example.com", client())
                .await
                .is_ok()
        );
        // 大文字小文字は同一キー
        assert!(matches!(
            fixture
                .service
                .request_reset("A@Example.com", client())
                .await,
            Err(AppError::RateLimited)
        ));
    }

    #[tokio::test]
    async fn test_unknown_client_ip_shares_bucket() {
        let fixture = create_fixture(PasswordResetOptions::default());
        assert_eq!(
            fixture
                .service
                .rate_limit_identifier("user@example.com", None),
            "ip:unknown"
        );
    }

    #[tokio::test]
    async fn test_dispatch_failure_is_not_surfaced() {
        let (_tx, rx) = mpsc::unbounded_channel();
        let fixture = create_fixture_with_mailer(
            PasswordResetOptions::default(),
            Arc::new(FailingMailer),
            rx,
        );

        assert!(
            fixture
                .service
                .request_reset("user@example.com", client())
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_token_is_single_use() {
        let fixture = create_fixture(PasswordResetOptions::default());
        let issued = fixture.service.create_token("user@example.com").await.unwrap();

        assert!(fixture.service.verify_token(&issued.token).await.unwrap().valid);
        assert!(fixture.service.consume_token(&issued.token).await.unwrap());
        assert!(!fixture.service.verify_token(&issued.token).await.unwrap().valid);
        assert!(!fixture.service.consume_token(&issued.token).await.unwrap());
    }

    #[tokio::test]
    async fn test_token_expires_after_ttl() {
        let fixture = create_fixture(PasswordResetOptions::default());
        let issued = fixture.service.create_token("user@example.com").await.unwrap();

        fixture
            .clock
            .advance(Duration::hours(1) - Duration::seconds(1));
        assert!(fixture.service.verify_token(&issued.token).await.unwrap().valid);

        fixture.clock.advance(Duration::seconds(1));
        assert_eq!(
            fixture.service.verify_token(&issued.token).await.unwrap(),
            Verification::invalid()
        );
    }

    #[tokio::test]
    async fn test_reset_password_updates_credentials_once() {
        let fixture = create_fixture(PasswordResetOptions::default());
        let issued = fixture.service.create_token("user@example.com").await.unwrap();

        fixture
            .service
            .reset_password(&issued.token, "Str0ngPass!")
            .await
            .unwrap();
        let hash = fixture.credentials.password_hash("user@example.com").unwrap();
        assert!(hash.starts_with("$argon2id$"));

        let reused = fixture
            .service
            .reset_password(&issued.token, "An0therPass!")
            .await;
        assert!(matches!(reused, Err(AppError::InvalidOrExpiredToken)));
        assert_eq!(
            fixture.credentials.password_hash("user@example.com"),
            Some(hash)
        );
    }

    #[tokio::test]
    async fn test_reset_password_short_password_keeps_token() {
        let fixture = create_fixture(PasswordResetOptions::default());
        let issued = fixture.service.create_token("user@example.com").await.unwrap();

        let result = fixture.service.reset_password(&issued.token, "short").await;
        assert!(matches!(result, Err(AppError::Validation(_))));
        assert!(fixture.service.verify_token(&issued.token).await.unwrap().valid);
    }

    #[tokio::test]
    async fn test_failed_credential_write_keeps_token() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(datetime!(2025-06-01 09:00 UTC)));
        let (tx, _outbox) = mpsc::unbounded_channel();
        let service = PasswordResetService::new(
            Arc::new(MemoryTokenStore::new(Duration::hours(1), clock.clone())),
            Arc::new(MemoryRateLimitStore::new(
                RateLimitPolicy::default(),
                clock.clone(),
            )),
            Arc::new(FailingCredentialStore),
            EmailService::new(
                Arc::new(ChannelMailer { sent: tx }),
                "https://organate.vercel.app",
                Duration::hours(1),
            ),
            clock,
            PasswordResetOptions::default(),
        );
        let issued = service.create_token("user@example.com").await.unwrap();

        let result = service.reset_password(&issued.token, "Str0ngPass!").await;
        assert!(matches!(result, Err(AppError::Store(_))));

        // 失敗後もリンクは有効なまま
        let verification = service.verify_token(&issued.token).await.unwrap();
        assert_eq!(verification, Verification::valid("user@example.com"));
        assert!(service.consume_token(&issued.token).await.unwrap());
    }

    #[tokio::test]
    async fn test_reset_password_invalid_token_reported_first() {
        let fixture = create_fixture(PasswordResetOptions::default());
        let result = fixture.service.reset_password("bogus", "short").await;
        assert!(matches!(result, Err(AppError::InvalidOrExpiredToken)));
    }

    #[tokio::test]
    async fn test_reset_password_expired_token() {
        let fixture = create_fixture(PasswordResetOptions::default());
        let issued = fixture.service.create_token("user@example.com").await.unwrap();

        fixture.clock.advance(Duration::hours(2));
        let result = fixture
            .service
            .reset_password(&issued.token, "Str0ngPass!")
            .await;
        assert!(matches!(result, Err(AppError::InvalidOrExpiredToken)));
        assert!(fixture.credentials.password_hash("user@example.com").is_none());
    }
}
