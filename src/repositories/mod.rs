use std::future::Future;
use std::pin::Pin;

pub mod credential;
pub mod rate_limit;
pub mod reset_token;

pub use credential::{CredentialStore, MemoryCredentialStore};
pub use rate_limit::{MemoryRateLimitStore, RateLimitPolicy, RateLimitStore};
pub use reset_token::{MemoryTokenStore, TokenStore};

/// ストア操作が返す Future
///
/// trait object (`Arc<dyn TokenStore>`) として扱えるよう Box 化している。
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// ストアのバックエンドエラー
///
/// インメモリ実装では発生しない。外部KVS実装が接続失敗などを返すために使う。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("ストアバックエンドエラー: {message}")]
    Backend { message: String },
}
