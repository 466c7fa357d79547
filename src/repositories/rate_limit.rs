use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use time::{Duration, OffsetDateTime};

use crate::clock::Clock;
use crate::models::RateLimitRecord;
use crate::repositories::StoreFuture;

/// レート制限の上限とウィンドウ幅
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// ウィンドウ内で許可するリクエスト数
    pub limit: u32,
    pub window: Duration,
}

impl Default for RateLimitPolicy {
    /// 1時間あたり3回
    fn default() -> Self {
        Self {
            limit: 3,
            window: Duration::hours(1),
        }
    }
}

/// 識別子ごとのリクエスト回数の保存先
pub trait RateLimitStore: Send + Sync {
    /// リクエストを記録し、許可されたかを返す
    ///
    /// 判定とカウントは不可分。拒否されたリクエストはカウントしない。
    fn check_and_record<'a>(&'a self, identifier: &'a str) -> StoreFuture<'a, bool>;
}

#[derive(Debug, Default)]
struct RateLimitMap {
    records: HashMap<String, RateLimitRecord>,
    /// ウィンドウ終了時刻の min-heap（リセット済みウィンドウのエントリは pop 時に読み捨てる）
    window_ends: BinaryHeap<Reverse<(OffsetDateTime, String)>>,
}

impl RateLimitMap {
    fn prune(&mut self, now: OffsetDateTime, window: Duration) -> usize {
        let mut pruned = 0;
        while self
            .window_ends
            .peek()
            .is_some_and(|Reverse((window_end, _))| *window_end <= now)
        {
            let Some(Reverse((_, identifier))) = self.window_ends.pop() else {
                break;
            };
            if self
                .records
                .get(&identifier)
                .is_some_and(|record| record.window_elapsed(now, window))
            {
                self.records.remove(&identifier);
                pruned += 1;
            }
        }
        pruned
    }

    fn start_window(&mut self, identifier: &str, now: OffsetDateTime, window: Duration) {
        let record = RateLimitRecord::start(now);
        self.window_ends
            .push(Reverse((record.window_end(window), identifier.to_string())));
        self.records.insert(identifier.to_string(), record);
    }
}

/// プロセス内メモリのレート制限ストア（固定ウィンドウ方式）
#[derive(Clone)]
pub struct MemoryRateLimitStore {
    inner: Arc<Mutex<RateLimitMap>>,
    policy: RateLimitPolicy,
    clock: Arc<dyn Clock>,
}

impl MemoryRateLimitStore {
    pub fn new(policy: RateLimitPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RateLimitMap::default())),
            policy,
            clock,
        }
    }

    /// 識別子の現在のレコード（テスト・デバッグ用）
    pub fn record(&self, identifier: &str) -> Option<RateLimitRecord> {
        self.inner.lock().records.get(identifier).copied()
    }

    pub fn tracked(&self) -> usize {
        self.inner.lock().records.len()
    }

    fn check_and_record_now(&self, identifier: &str) -> bool {
        let now = self.clock.now();
        let RateLimitPolicy { limit, window } = self.policy;
        let mut map = self.inner.lock();
        map.prune(now, window);

        match map.records.get_mut(identifier) {
            Some(record) if !record.window_elapsed(now, window) => {
                if record.count < limit {
                    record.count += 1;
                    true
                } else {
                    false
                }
            }
            _ => {
                map.start_window(identifier, now, window);
                true
            }
        }
    }
}

impl RateLimitStore for MemoryRateLimitStore {
    fn check_and_record<'a>(&'a self, identifier: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move { Ok(self.check_and_record_now(identifier)) })
    }
}
