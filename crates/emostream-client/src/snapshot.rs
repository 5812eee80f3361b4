//! 会话快照
//!
//! 工作线程每处理完一批事件就发布一份不可变快照，
//! 读取方通过 `ArcSwap` 无锁获取。

use crate::aggregator::AggregatedResult;
use crate::state::SessionStatus;
use emostream_driver::MetricsSnapshot;
use std::time::{Duration, SystemTime};

#[derive(Debug, Clone, Default)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    /// 面向用户的状态提示
    pub message: Option<String>,
    /// 最近一次聚合结果（尚无响应时为 `None`）
    pub result: Option<AggregatedResult>,
    /// 当前连续失败次数
    pub reconnect_failures: u32,
    /// 首次进入 Streaming 的时间
    pub streaming_since: Option<SystemTime>,
    /// 进入终态的时间
    pub ended_at: Option<SystemTime>,
    pub metrics: MetricsSnapshot,
}

impl SessionSnapshot {
    /// 会话计时：从首次进入 Streaming 到现在（或到结束）
    pub fn elapsed(&self) -> Option<Duration> {
        let since = self.streaming_since?;
        let until = self.ended_at.unwrap_or_else(SystemTime::now);
        Some(until.duration_since(since).unwrap_or_default())
    }

    /// `mm:ss` 格式的会话计时；尚未开始时为 `00:00`
    pub fn timer_text(&self) -> String {
        format_elapsed(self.elapsed().unwrap_or_default())
    }
}

/// 格式化为 `mm:ss`（分钟数可以超过 59）
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::ZERO), "00:00");
        assert_eq!(format_elapsed(Duration::from_millis(59_999)), "00:59");
        assert_eq!(format_elapsed(Duration::from_secs(61)), "01:01");
        assert_eq!(format_elapsed(Duration::from_secs(3_725)), "62:05");
    }

    #[test]
    fn test_elapsed_uses_end_time() {
        let start = SystemTime::now();
        let snapshot = SessionSnapshot {
            streaming_since: Some(start),
            ended_at: Some(start + Duration::from_secs(90)),
            ..SessionSnapshot::default()
        };
        assert_eq!(snapshot.elapsed(), Some(Duration::from_secs(90)));
        assert_eq!(snapshot.timer_text(), "01:30");
    }

    #[test]
    fn test_never_streamed() {
        let snapshot = SessionSnapshot::default();
        assert_eq!(snapshot.elapsed(), None);
        assert_eq!(snapshot.timer_text(), "00:00");
    }
}
