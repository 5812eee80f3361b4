//! 会话性能指标
//!
//! 原子计数器，IO 线程写入，任意线程读取，不引入锁竞争。

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// 流式会话实时指标
///
/// # 使用示例
///
/// ```rust
/// use emostream_driver::StreamMetrics;
/// use std::sync::atomic::Ordering;
///
/// let metrics = StreamMetrics::default();
/// metrics.frames_sent.fetch_add(1, Ordering::Relaxed);
///
/// let snapshot = metrics.snapshot();
/// assert_eq!(snapshot.frames_sent, 1);
/// ```
#[derive(Debug, Default)]
pub struct StreamMetrics {
    /// 已发送的推理请求数
    pub frames_sent: AtomicU64,

    /// 收到的响应数（包括解码失败的）
    pub responses: AtomicU64,

    /// 跳过的采集周期（帧源不可用、连接未打开等）
    pub skipped_cycles: AtomicU64,

    /// 入站消息解码失败次数
    pub decode_errors: AtomicU64,

    /// 建立连接的尝试次数
    pub connect_attempts: AtomicU64,

    /// 调度的重连次数
    pub reconnect_attempts: AtomicU64,

    /// 响应超时次数
    pub response_timeouts: AtomicU64,

    /// 超时之后才到达、被丢弃的回复数
    pub late_replies: AtomicU64,

    /// 释放的 socket 数
    pub sockets_closed: AtomicU64,

    /// 帧源释放次数（正常情况下最多 1）
    pub device_releases: AtomicU64,

    /// 最近一次往返延迟（微秒）
    pub last_rtt_us: AtomicU64,

    /// 往返延迟累计（微秒）
    pub total_rtt_us: AtomicU64,

    /// 参与延迟统计的样本数
    pub rtt_samples: AtomicU64,
}

impl StreamMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一次往返延迟
    pub fn record_rtt(&self, rtt: Duration) {
        let us = rtt.as_micros().min(u64::MAX as u128) as u64;
        self.last_rtt_us.store(us, Ordering::Relaxed);
        self.total_rtt_us.fetch_add(us, Ordering::Relaxed);
        self.rtt_samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            responses: self.responses.load(Ordering::Relaxed),
            skipped_cycles: self.skipped_cycles.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            response_timeouts: self.response_timeouts.load(Ordering::Relaxed),
            late_replies: self.late_replies.load(Ordering::Relaxed),
            sockets_closed: self.sockets_closed.load(Ordering::Relaxed),
            device_releases: self.device_releases.load(Ordering::Relaxed),
            last_rtt_us: self.last_rtt_us.load(Ordering::Relaxed),
            total_rtt_us: self.total_rtt_us.load(Ordering::Relaxed),
            rtt_samples: self.rtt_samples.load(Ordering::Relaxed),
        }
    }
}

/// 指标快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub frames_sent: u64,
    pub responses: u64,
    pub skipped_cycles: u64,
    pub decode_errors: u64,
    pub connect_attempts: u64,
    pub reconnect_attempts: u64,
    pub response_timeouts: u64,
    pub late_replies: u64,
    pub sockets_closed: u64,
    pub device_releases: u64,
    pub last_rtt_us: u64,
    pub total_rtt_us: u64,
    pub rtt_samples: u64,
}

impl MetricsSnapshot {
    /// 平均往返延迟；没有样本时返回 `None`
    pub fn avg_rtt(&self) -> Option<Duration> {
        if self.rtt_samples == 0 {
            return None;
        }
        Some(Duration::from_micros(self.total_rtt_us / self.rtt_samples))
    }

    pub fn last_rtt(&self) -> Option<Duration> {
        (self.rtt_samples > 0).then(|| Duration::from_micros(self.last_rtt_us))
    }
}
