use time::{Duration, OffsetDateTime};

/// 識別子ごとのレート制限状態
///
/// 1識別子につき常に1レコード。ウィンドウが開いている間 `count` は上限を超えない。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRecord {
    /// 現ウィンドウ内で受け付けたリクエスト数
    pub count: u32,
    /// 現ウィンドウの開始時刻
    pub window_start: OffsetDateTime,
}

impl RateLimitRecord {
    /// 新しいウィンドウを開始（count = 1）
    pub fn start(now: OffsetDateTime) -> Self {
        Self {
            count: 1,
            window_start: now,
        }
    }

    pub fn window_end(&self, window: Duration) -> OffsetDateTime {
        self.window_start + window
    }

    /// `now - window_start >= window` でウィンドウ終了
    pub fn window_elapsed(&self, now: OffsetDateTime, window: Duration) -> bool {
        now >= self.window_end(window)
    }
}
