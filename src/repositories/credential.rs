use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::repositories::StoreFuture;

/// パスワードハッシュの書き込み先
///
/// ユーザーの存在確認は行わない（リセット要求時にも問い合わせない）。
pub trait CredentialStore: Send + Sync {
    /// email のパスワードハッシュを置き換える
    ///
    /// # Note
    /// password_hash はログに出力しないこと
    fn update_password<'a>(&'a self, email: &'a str, password_hash: String)
    -> StoreFuture<'a, ()>;
}

/// プロセス内メモリのクレデンシャルストア（開発環境用）
#[derive(Clone, Default)]
pub struct MemoryCredentialStore {
    hashes: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn password_hash(&self, email: &str) -> Option<String> {
        self.hashes.read().get(email).cloned()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn update_password<'a>(
        &'a self,
        email: &'a str,
        password_hash: String,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.hashes.write().insert(email.to_string(), password_hash);
            Ok(())
        })
    }
}
