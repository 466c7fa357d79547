use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use time::Duration;
use uuid::Uuid;

use crate::config::Config;

/// メール送信エラー
///
/// 呼び出し元には返さず、送信タスク内でログ出力のみ行う。
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("メールアドレスが不正: {0}")]
    Address(String),

    #[error("メッセージ組み立てエラー: {0}")]
    Message(String),

    #[error("送信エラー: {0}")]
    Transport(String),
}

pub type DispatchFuture<'a> = Pin<Box<dyn Future<Output = Result<(), DispatchError>> + Send + 'a>>;

/// メールの送信手段
pub trait Mailer: Send + Sync {
    fn send<'a>(&'a self, to: &'a str, subject: &'a str, body: &'a str) -> DispatchFuture<'a>;

    /// ヘルスチェックに出す送信手段の名前
    fn transport(&self) -> &'static str {
        "custom"
    }
}

/// 開発環境用: 送信せずログに出力する
#[derive(Clone, Copy, Debug, Default)]
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send<'a>(&'a self, to: &'a str, subject: &'a str, body: &'a str) -> DispatchFuture<'a> {
        Box::pin(async move {
            tracing::info!(to = %to, subject = %subject, "メール送信（開発モード）");
            // 本文にはリセットリンクが含まれるため debug レベルに限定
            tracing::debug!("{}", body);
            Ok(())
        })
    }

    fn transport(&self) -> &'static str {
        "log"
    }
}

#[cfg(feature = "email")]
pub use smtp::SmtpMailer;

#[cfg(feature = "email")]
mod smtp {
    use lettre::{
        AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
        message::{Mailbox, header::ContentType},
        transport::smtp::authentication::Credentials,
    };

    use super::{DispatchError, DispatchFuture, Mailer};

    /// SMTP (STARTTLS) でメールを送信する
    pub struct SmtpMailer {
        transport: AsyncSmtpTransport<Tokio1Executor>,
        from: Mailbox,
    }

    impl SmtpMailer {
        pub fn new(
            host: &str,
            port: u16,
            credentials: Option<(String, String)>,
            from_address: &str,
        ) -> Result<Self, DispatchError> {
            let from = from_address
                .parse::<Mailbox>()
                .map_err(|e| DispatchError::Address(e.to_string()))?;

            let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                .map_err(|e| DispatchError::Transport(e.to_string()))?
                .port(port);
            if let Some((username, password)) = credentials {
                builder = builder.credentials(Credentials::new(username, password));
            }

            Ok(Self {
                transport: builder.build(),
                from,
            })
        }
    }

    impl Mailer for SmtpMailer {
        fn send<'a>(
            &'a self,
            to: &'a str,
            subject: &'a str,
            body: &'a str,
        ) -> DispatchFuture<'a> {
            Box::pin(async move {
                let to = to
                    .parse::<Mailbox>()
                    .map_err(|e| DispatchError::Address(e.to_string()))?;

                let message = Message::builder()
                    .from(self.from.clone())
                    .to(to)
                    .subject(subject)
                    .header(ContentType::TEXT_PLAIN)
                    .body(body.to_string())
                    .map_err(|e| DispatchError::Message(e.to_string()))?;

                self.transport
                    .send(message)
                    .await
                    .map_err(|e| DispatchError::Transport(e.to_string()))?;

                Ok(())
            })
        }

        fn transport(&self) -> &'static str {
            "smtp"
        }
    }
}

const RESET_SUBJECT: &str = "Password Reset Request";

/// リセットメールの組み立てと送信
#[derive(Clone)]
pub struct EmailService {
    mailer: Arc<dyn Mailer>,
    public_base_url: String,
    token_ttl: Duration,
}

impl EmailService {
    /// 新しい EmailService を作成
    pub fn new(
        mailer: Arc<dyn Mailer>,
        public_base_url: impl Into<String>,
        token_ttl: Duration,
    ) -> Self {
        Self {
            mailer,
            public_base_url: public_base_url.into(),
            token_ttl,
        }
    }

    /// 設定から送信手段を選んで作成
    ///
    /// SMTP設定が揃っていて email 機能が有効な場合のみ SMTP を使い、それ以外はログ出力。
    pub fn from_config(config: &Config) -> Result<Self, DispatchError> {
        let mailer = Self::mailer_from_config(config)?;
        Ok(Self::new(
            mailer,
            config.public_base_url.clone(),
            config.token_ttl(),
        ))
    }

    #[cfg(feature = "email")]
    fn mailer_from_config(config: &Config) -> Result<Arc<dyn Mailer>, DispatchError> {
        use secrecy::ExposeSecret;

        match (&config.smtp_host, &config.smtp_from_address) {
            (Some(host), Some(from)) => {
                let credentials = match (&config.smtp_username, &config.smtp_password) {
                    (Some(username), Some(password)) => Some((
                        username.expose_secret().clone(),
                        password.expose_secret().clone(),
                    )),
                    _ => None,
                };
                tracing::info!(smtp_host = %host, smtp_port = config.smtp_port, "SMTP送信を使用");
                Ok(Arc::new(SmtpMailer::new(
                    host,
                    config.smtp_port,
                    credentials,
                    from,
                )?))
            }
            _ => {
                tracing::info!("SMTP 未設定（ログ出力のみ）");
                Ok(Arc::new(LogMailer))
            }
        }
    }

    #[cfg(not(feature = "email"))]
    fn mailer_from_config(config: &Config) -> Result<Arc<dyn Mailer>, DispatchError> {
        if config.smtp_host.is_some() {
            tracing::warn!("SMTP設定がありますが email 機能が無効です（ログ出力のみ）");
        }
        Ok(Arc::new(LogMailer))
    }

    pub fn transport(&self) -> &'static str {
        self.mailer.transport()
    }

    /// リセットURLを構築
    pub fn build_reset_url(&self, token: &str) -> String {
        format!(
            "{}/auth/reset-password?token={}",
            self.public_base_url.trim_end_matches('/'),
            token
        )
    }

    /// リセットメール本文
    pub fn reset_email_body(&self, reset_url: &str) -> String {
        format!(
            "Hello,\n\n\
             You recently requested to reset your password for your Organate account.\n\
             Click the link below to reset it:\n\n\
             {reset_url}\n\n\
             This link will expire in {}.\n\n\
             If you did not request a password reset, please ignore this email.\n\n\
             Best regards,\n\
             The Organate Team\n",
            describe_duration(self.token_ttl)
        )
    }

    /// リセットメールを送信し、結果を返す
    pub async fn send_password_reset_email(
        &self,
        to: &str,
        token: &str,
    ) -> Result<(), DispatchError> {
        let reset_url = self.build_reset_url(token);
        let body = self.reset_email_body(&reset_url);
        self.mailer.send(to, RESET_SUBJECT, &body).await
    }

    /// バックグラウンドでリセットメールを送信
    ///
    /// # Security
    /// 送信失敗はログのみ（応答内容・応答時間からユーザー存在を推測させない）
    pub fn dispatch_password_reset_email(&self, to: String, token: String, token_id: Uuid) {
        let service = self.clone();
        tokio::spawn(async move {
            match service.send_password_reset_email(&to, &token).await {
                Ok(()) => {
                    tracing::info!(%token_id, "パスワードリセットメール送信完了");
                }
                Err(e) => {
                    tracing::error!(error = %e, %token_id, "パスワードリセットメール送信に失敗");
                }
            }
        });
    }
}

/// "1 hour" / "1 minute 30 seconds" のような表記（0 の単位は省く）
fn describe_duration(duration: Duration) -> String {
    let total = duration.whole_seconds().max(0);
    let parts = [
        (total / 3600, "hour"),
        (total % 3600 / 60, "minute"),
        (total % 60, "second"),
    ];

    let words: Vec<String> = parts
        .iter()
        .filter(|(value, _)| *value > 0)
        .map(|&(value, unit)| match value {
            1 => format!("1 {unit}"),
            n => format!("{n} {unit}s"),
        })
        .collect();

    if words.is_empty() {
        "0 seconds".to_string()
    } else {
        words.join(" ")
    }
}
