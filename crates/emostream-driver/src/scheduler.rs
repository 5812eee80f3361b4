//! 帧调度
//!
//! 严格的单请求在途流水线：只有在上一个请求的响应到达（或被超时取消）
//! 之后才会采集下一帧。吞吐量由往返延迟决定，而不是定时器。
//!
//! `FrameScheduler` 独占帧源，并保证帧源只释放一次。

use crate::{CaptureError, ConnectionManager, DriverError, FrameSource, StreamMetrics};
use emostream_protocol::{ModelSelector, ProtocolError, encode_request};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// 采集周期被跳过的原因
#[derive(Debug)]
pub enum SkipReason {
    /// 帧源已释放（会话正在结束）
    SourceReleased,
    /// 帧源报告不可用
    SourceUnavailable,
    /// 采集失败
    Capture(CaptureError),
    /// 连接未打开
    NotConnected,
    /// 编码失败
    Encode(ProtocolError),
}

impl SkipReason {
    /// 是否为帧源不可用（用于状态提示）
    pub fn source_unavailable(&self) -> bool {
        matches!(
            self,
            SkipReason::SourceUnavailable | SkipReason::Capture(CaptureError::Unavailable)
        )
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::SourceReleased => write!(f, "frame source released"),
            SkipReason::SourceUnavailable => write!(f, "frame source unavailable"),
            SkipReason::Capture(e) => write!(f, "capture failed: {}", e),
            SkipReason::NotConnected => write!(f, "socket not open"),
            SkipReason::Encode(e) => write!(f, "encode failed: {}", e),
        }
    }
}

/// 一次采集周期的结果
#[derive(Debug)]
pub enum CycleOutcome {
    /// 已发送，序号为 `seq`
    Sent { seq: u64 },
    /// 已有请求在途，未采集
    Busy,
    /// 周期被跳过，会话继续
    Skipped(SkipReason),
    /// 发送失败（连接已不可用）
    SendFailed(DriverError),
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    seq: u64,
    sent_at: Instant,
}

pub struct FrameScheduler {
    source: Option<Box<dyn FrameSource>>,
    models: ModelSelector,
    in_flight: Option<InFlight>,
    // 已超时但回复可能仍在路上的请求数（仅限当前连接）
    stale_replies: u32,
    // 当前在途请求期间已丢弃过一条回复
    discarded_in_flight: bool,
    next_seq: u64,
    retry_at: Option<Instant>,
    metrics: Arc<StreamMetrics>,
}

impl FrameScheduler {
    pub fn new(
        source: Box<dyn FrameSource>,
        models: ModelSelector,
        metrics: Arc<StreamMetrics>,
    ) -> Self {
        Self {
            source: Some(source),
            models,
            in_flight: None,
            stale_replies: 0,
            discarded_in_flight: false,
            next_seq: 0,
            retry_at: None,
            metrics,
        }
    }

    /// 采集一帧、编码并发送
    ///
    /// 已有请求在途时返回 `Busy`，不会采集。
    pub fn capture_and_send(&mut self, conn: &mut ConnectionManager) -> CycleOutcome {
        if self.in_flight.is_some() {
            trace!("Capture requested while a request is in flight");
            return CycleOutcome::Busy;
        }
        self.retry_at = None;

        let Some(source) = self.source.as_mut() else {
            return self.skip(SkipReason::SourceReleased);
        };
        if !conn.is_open() {
            return self.skip(SkipReason::NotConnected);
        }
        if !source.is_available() {
            return self.skip(SkipReason::SourceUnavailable);
        }

        let frame = match source.capture() {
            Ok(frame) => frame,
            Err(CaptureError::Unavailable) => return self.skip(SkipReason::SourceUnavailable),
            Err(e) => return self.skip(SkipReason::Capture(e)),
        };
        let text = match encode_request(&frame.data, &self.models) {
            Ok(text) => text,
            Err(e) => return self.skip(SkipReason::Encode(e)),
        };

        match conn.send(&text) {
            Ok(()) => {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.in_flight = Some(InFlight {
                    seq,
                    sent_at: Instant::now(),
                });
                self.discarded_in_flight = false;
                self.metrics.frames_sent.fetch_add(1, Ordering::Relaxed);
                debug!("Frame #{} sent ({} bytes)", seq, frame.data.len());
                CycleOutcome::Sent { seq }
            },
            Err(e) => {
                warn!("Failed to send frame: {}", e);
                CycleOutcome::SendFailed(e)
            },
        }
    }

    fn skip(&self, reason: SkipReason) -> CycleOutcome {
        self.metrics.skipped_cycles.fetch_add(1, Ordering::Relaxed);
        warn!("Capture cycle skipped: {}", reason);
        CycleOutcome::Skipped(reason)
    }

    /// 收到响应：结束在途请求，返回往返延迟
    ///
    /// 没有在途请求时（例如已被超时取消）返回 `None`。
    pub fn on_response(&mut self) -> Option<Duration> {
        self.metrics.responses.fetch_add(1, Ordering::Relaxed);
        let in_flight = self.in_flight.take()?;
        let rtt = in_flight.sent_at.elapsed();
        self.metrics.record_rtt(rtt);
        trace!("Frame #{} answered in {:?}", in_flight.seq, rtt);
        Some(rtt)
    }

    /// 连接断开：放弃在途请求，旧连接上的迟到回复不会再出现
    pub fn cancel_in_flight(&mut self) -> bool {
        self.stale_replies = 0;
        self.discarded_in_flight = false;
        self.in_flight.take().is_some()
    }

    /// 响应超时：放弃在途请求，并记下它的回复仍可能到达
    ///
    /// 服务按请求顺序应答，因此之后收到的第一条消息属于被放弃的请求，
    /// 由 [`discard_stale_reply`](Self::discard_stale_reply) 丢弃。
    /// 若在途期间已经丢弃过一条回复，说明被放弃请求的回复不会再来，不再计入。
    pub fn expire_in_flight(&mut self) -> bool {
        let Some(in_flight) = self.in_flight.take() else {
            return false;
        };
        if !self.discarded_in_flight {
            self.stale_replies += 1;
        }
        self.discarded_in_flight = false;
        debug!("Frame #{} expired without a reply", in_flight.seq);
        true
    }

    /// 入站消息若属于已超时的请求则消费它并返回 `true`
    pub fn discard_stale_reply(&mut self) -> bool {
        if self.stale_replies == 0 {
            return false;
        }
        self.stale_replies -= 1;
        if self.in_flight.is_some() {
            self.discarded_in_flight = true;
        }
        self.metrics.responses.fetch_add(1, Ordering::Relaxed);
        self.metrics.late_replies.fetch_add(1, Ordering::Relaxed);
        debug!("Discarding late reply to an expired frame");
        true
    }

    /// 在途请求是否已超过 `timeout`
    pub fn is_overdue(&self, now: Instant, timeout: Duration) -> bool {
        self.in_flight
            .is_some_and(|f| now.saturating_duration_since(f.sent_at) >= timeout)
    }

    /// 在途请求的超时时间点
    pub fn in_flight_deadline(&self, timeout: Duration) -> Option<Instant> {
        self.in_flight.map(|f| f.sent_at + timeout)
    }

    /// 当前在途请求数（0 或 1）
    pub fn outstanding(&self) -> usize {
        usize::from(self.in_flight.is_some())
    }

    /// 安排 `delay` 之后重试采集
    pub fn schedule_retry(&mut self, delay: Duration) {
        self.retry_at = Some(Instant::now() + delay);
    }

    /// 到期则消费重试计划并返回 `true`
    pub fn take_due_retry(&mut self, now: Instant) -> bool {
        match self.retry_at {
            Some(at) if at <= now => {
                self.retry_at = None;
                true
            },
            _ => false,
        }
    }

    pub fn cancel_retry(&mut self) {
        self.retry_at = None;
    }

    pub fn retry_at(&self) -> Option<Instant> {
        self.retry_at
    }

    /// 释放帧源（只生效一次）
    pub fn release(&mut self) -> bool {
        self.in_flight = None;
        self.stale_replies = 0;
        self.retry_at = None;
        match self.source.take() {
            Some(mut source) => {
                source.release();
                self.metrics.device_releases.fetch_add(1, Ordering::Relaxed);
                debug!("Frame source released");
                true
            },
            None => false,
        }
    }
}

impl Drop for FrameScheduler {
    fn drop(&mut self) {
        self.release();
    }
}
