use std::sync::Arc;

use parking_lot::Mutex;
use time::{Duration, OffsetDateTime};

/// 現在時刻の取得元
///
/// ストアは時刻を直接読まず、この trait 経由で取得する。
/// テストでは `ManualClock` を渡して期限切れを決定的に再現する。
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

/// システム時刻（UTC）
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// 手動で進める時計（テスト用）
#[derive(Clone, Debug)]
pub struct ManualClock {
    now: Arc<Mutex<OffsetDateTime>>,
}

impl ManualClock {
    pub fn new(start: OffsetDateTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// 時計を `by` だけ進める
    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock()
    }
}
