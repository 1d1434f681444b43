//! 免打扰时段
//!
//! 以收件人本地时间判断；时段可以跨午夜（如 22:00-08:00）。
//! 起止相同表示不启用。

use chrono::{DateTime, Duration, FixedOffset, NaiveTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuietHours {
    start: NaiveTime,
    end: NaiveTime,
}

impl QuietHours {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// 本地时间是否落在免打扰时段内（含起点，不含终点）
    pub fn contains(&self, local: NaiveTime) -> bool {
        if self.start == self.end {
            return false;
        }
        if self.start < self.end {
            local >= self.start && local < self.end
        } else {
            local >= self.start || local < self.end
        }
    }

    /// 若 `now` 处于免打扰时段，返回时段结束的 UTC 时刻
    pub fn resume_at(&self, now: DateTime<Utc>, offset: FixedOffset) -> Option<DateTime<Utc>> {
        let local = now.with_timezone(&offset).naive_local();
        if !self.contains(local.time()) {
            return None;
        }

        let mut date = local.date();
        if local.time() >= self.end {
            date = date.succ_opt()?;
        }
        let resume_local = date.and_time(self.end);
        Some((resume_local - Duration::seconds(i64::from(offset.local_minus_utc()))).and_utc())
    }
}
