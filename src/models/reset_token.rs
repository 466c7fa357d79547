use time::{Duration, OffsetDateTime};
use uuid::Uuid;

/// パスワードリセットトークンのレコード
///
/// トークン平文は保持しない。ストアは SHA-256 ハッシュをキーにして保存し、
/// 平文はリセットリンクとしてメールで送るのみ。
/// 発行後に変更されることはない（削除されるか期限切れになるかのどちらか）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetToken {
    /// ログ相関用ID（トークン平文の代わりにログへ出す）
    pub id: Uuid,
    /// リセット対象のメールアドレス
    pub owner: String,
    pub created_at: OffsetDateTime,
}

impl ResetToken {
    pub fn new(owner: impl Into<String>, created_at: OffsetDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner: owner.into(),
            created_at,
        }
    }

    /// 有効期限（この時刻以降は無効）
    pub fn expires_at(&self, ttl: Duration) -> OffsetDateTime {
        self.created_at + ttl
    }

    /// `now - created_at >= ttl` で期限切れ
    pub fn is_expired(&self, now: OffsetDateTime, ttl: Duration) -> bool {
        now >= self.expires_at(ttl)
    }
}

/// トークン検証結果
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Verification {
    pub valid: bool,
    pub owner: Option<String>,
}

impl Verification {
    pub fn invalid() -> Self {
        Self::default()
    }

    pub fn valid(owner: impl Into<String>) -> Self {
        Self {
            valid: true,
            owner: Some(owner.into()),
        }
    }
}
