use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use time::{Duration, OffsetDateTime};

use crate::clock::Clock;
use crate::models::ResetToken;
use crate::repositories::StoreFuture;

/// パスワードリセットトークンの保存先
///
/// キーはトークン平文ではなく SHA-256 ハッシュ（呼び出し側で計算する）。
/// 期限切れのレコードは存在しないものとして扱うこと。
pub trait TokenStore: Send + Sync {
    /// レコードを保存
    fn insert(&self, token_hash: String, record: ResetToken) -> StoreFuture<'_, ()>;

    /// 有効なレコードを検索（レコード自体は変更しない）
    fn find<'a>(&'a self, token_hash: &'a str) -> StoreFuture<'a, Option<ResetToken>>;

    /// 有効なレコードを削除し、削除したレコードを返す
    ///
    /// 検索と削除は不可分。同じトークンで同時に呼ばれても `Some` を受け取るのは1回だけ。
    fn take<'a>(&'a self, token_hash: &'a str) -> StoreFuture<'a, Option<ResetToken>>;
}

#[derive(Debug, Default)]
struct TokenMap {
    records: HashMap<String, ResetToken>,
    /// 有効期限の min-heap（消費済みキーのエントリは pop 時に読み捨てる）
    expiries: BinaryHeap<Reverse<(OffsetDateTime, String)>>,
}

impl TokenMap {
    /// 期限切れレコードを削除し、削除件数を返す
    fn prune(&mut self, now: OffsetDateTime, ttl: Duration) -> usize {
        let mut pruned = 0;
        while self
            .expiries
            .peek()
            .is_some_and(|Reverse((expires_at, _))| *expires_at <= now)
        {
            let Some(Reverse((_, key))) = self.expiries.pop() else {
                break;
            };
            if self
                .records
                .get(&key)
                .is_some_and(|record| record.is_expired(now, ttl))
            {
                self.records.remove(&key);
                pruned += 1;
            }
        }
        pruned
    }
}

/// プロセス内メモリのトークンストア
///
/// 再起動で内容は失われる。期限切れは読み取り時に遅延評価で掃除する。
#[derive(Clone)]
pub struct MemoryTokenStore {
    inner: Arc<Mutex<TokenMap>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl MemoryTokenStore {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TokenMap::default())),
            ttl,
            clock,
        }
    }

    /// 保持中のレコード数（期限切れで未掃除のものを含む）
    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert_now(&self, token_hash: String, record: ResetToken) {
        let now = self.clock.now();
        let expires_at = record.expires_at(self.ttl);
        let mut map = self.inner.lock();
        map.prune(now, self.ttl);
        map.expiries.push(Reverse((expires_at, token_hash.clone())));
        map.records.insert(token_hash, record);
    }

    fn find_now(&self, token_hash: &str) -> Option<ResetToken> {
        let now = self.clock.now();
        let mut map = self.inner.lock();
        let pruned = map.prune(now, self.ttl);
        if pruned > 0 {
            tracing::debug!(pruned, "期限切れリセットトークンを削除");
        }
        map.records
            .get(token_hash)
            .filter(|record| !record.is_expired(now, self.ttl))
            .cloned()
    }

    fn take_now(&self, token_hash: &str) -> Option<ResetToken> {
        let now = self.clock.now();
        let mut map = self.inner.lock();
        map.prune(now, self.ttl);
        map.records
            .remove(token_hash)
            .filter(|record| !record.is_expired(now, self.ttl))
    }
}

impl TokenStore for MemoryTokenStore {
    fn insert(&self, token_hash: String, record: ResetToken) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.insert_now(token_hash, record);
            Ok(())
        })
    }

    fn find<'a>(&'a self, token_hash: &'a str) -> StoreFuture<'a, Option<ResetToken>> {
        Box::pin(async move { Ok(self.find_now(token_hash)) })
    }

    fn take<'a>(&'a self, token_hash: &'a str) -> StoreFuture<'a, Option<ResetToken>> {
        Box::pin(async move { Ok(self.take_now(token_hash)) })
    }
}
