//! 会话生命周期状态机
//!
//! ```text
//! Idle --start--> Connecting --open + first frame--> Streaming <--> Degraded
//!                     |                                  |
//!                     +------ connection lost -----> Reconnecting --reopen--> Streaming
//!
//! any --fatal--> Failed        any --stop--> Stopped
//! ```
//!
//! `Failed` 和 `Stopped` 是终态：之后的所有事件都被忽略。

use emostream_driver::{RetryDecision, RetryPolicy, RetryState};
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

pub const MSG_CONNECTING_SERVER: &str = "Connecting to server...";
pub const MSG_CONNECTING_SOURCE: &str = "Connecting to webcam...";
pub const MSG_RECONNECTING: &str = "Reconnecting";
pub const MSG_CONNECT_FAILED: &str = "Failed to connect to the inference service";
pub const MSG_SOURCE_FAILED: &str = "Failed to access camera";

// ==================== 状态 ====================

/// 会话状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SessionStatus {
    #[default]
    Idle,
    Connecting,
    Streaming,
    Degraded,
    Reconnecting,
    Failed,
    Stopped,
}

impl SessionStatus {
    /// 终态：不再重连、不再采集
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Failed | SessionStatus::Stopped)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Connecting => "connecting",
            SessionStatus::Streaming => "streaming",
            SessionStatus::Degraded => "degraded",
            SessionStatus::Reconnecting => "reconnecting",
            SessionStatus::Failed => "failed",
            SessionStatus::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

// ==================== 事件与副作用 ====================

/// 输入事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Start,
    /// socket 已打开
    Opened,
    ConnectFailed { error: String },
    CredentialFailed { error: String },
    /// 一帧已发送
    FrameSent,
    /// 采集周期被跳过
    CaptureSkipped { source_unavailable: bool },
    /// 响应含检测结果
    Detections,
    /// 响应不含检测结果
    NoDetections { warning: String },
    /// 服务端返回错误（致命）
    StreamError { message: String },
    /// 入站消息无法解析
    DecodeFailed,
    Closed { reason: Option<String> },
    TransportError { error: String },
    ReconnectDue,
    CaptureDue,
    ResponseTimeout,
    Stop,
}

/// 需要工作线程执行的副作用
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// 获取令牌并打开 socket
    Connect,
    /// 采集并发送一帧（已有在途请求时为空操作）
    CaptureFrame,
    /// 稍后重试采集
    ScheduleCapture,
    ScheduleReconnect(Duration),
    /// 释放当前 socket 并丢弃在途请求
    DropConnection,
    /// 放弃超时的在途请求，其迟到回复将被丢弃
    ExpireInFlight,
    /// 释放所有资源
    Shutdown,
}

// ==================== 状态机 ====================

#[derive(Debug, Clone)]
pub struct SessionMachine {
    status: SessionStatus,
    retry: RetryState,
    message: Option<String>,
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl SessionMachine {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            status: SessionStatus::Idle,
            retry: RetryState::new(policy),
            message: None,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// 最近一次非终态条件（或终态失败原因）的提示文本
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// 当前连续失败次数
    pub fn reconnect_failures(&self) -> u32 {
        self.retry.failures()
    }

    /// 处理一个事件，返回需要执行的副作用
    pub fn handle(&mut self, event: SessionEvent) -> Vec<Effect> {
        use SessionEvent as E;
        use SessionStatus as S;

        if self.status.is_terminal() {
            trace!("Ignoring {:?} in terminal state {}", event, self.status);
            return Vec::new();
        }

        let from = self.status;
        let effects = match (from, event) {
            (_, E::Stop) => {
                self.enter(S::Stopped, None);
                vec![Effect::Shutdown]
            },
            (S::Idle, E::Start) => {
                self.enter(S::Connecting, Some(MSG_CONNECTING_SERVER));
                vec![Effect::Connect]
            },
            (S::Idle, event) => {
                debug!("Ignoring {:?} before start", event);
                Vec::new()
            },
            (_, E::Start) => Vec::new(),

            (_, E::Opened) => {
                self.retry.on_open();
                self.message = Some(MSG_CONNECTING_SOURCE.to_string());
                vec![Effect::CaptureFrame]
            },
            (S::Connecting | S::Reconnecting, E::FrameSent) => {
                self.enter(S::Streaming, None);
                Vec::new()
            },
            (_, E::FrameSent) => Vec::new(),

            (_, E::Detections) => {
                self.enter(S::Streaming, None);
                vec![Effect::CaptureFrame]
            },
            (_, E::NoDetections { warning }) => {
                self.status = S::Degraded;
                self.message = Some(warning);
                vec![Effect::CaptureFrame]
            },
            (_, E::DecodeFailed) => vec![Effect::CaptureFrame],

            (_, E::CaptureSkipped { source_unavailable }) => {
                if source_unavailable {
                    self.message = Some(MSG_SOURCE_FAILED.to_string());
                }
                vec![Effect::ScheduleCapture]
            },
            (_, E::CaptureDue) => vec![Effect::CaptureFrame],
            (_, E::ResponseTimeout) => {
                warn!("Response timed out, forcing a fresh capture");
                vec![Effect::ExpireInFlight, Effect::CaptureFrame]
            },

            (_, E::StreamError { message }) => {
                error!("Stream error: {}", message);
                self.enter(S::Failed, None);
                self.message = Some(message);
                vec![Effect::Shutdown]
            },
            (_, E::CredentialFailed { error }) => {
                error!("Credential fetch failed: {}", error);
                self.enter(S::Failed, None);
                self.message = Some(format!("Failed to obtain access token: {}", error));
                vec![Effect::Shutdown]
            },

            (_, E::ConnectFailed { error }) => self.on_connection_lost(&error),
            (_, E::Closed { reason }) => {
                let reason = reason.unwrap_or_else(|| "connection closed".to_string());
                self.on_connection_lost(&reason)
            },
            (_, E::TransportError { error }) => self.on_connection_lost(&error),

            (S::Connecting | S::Reconnecting, E::ReconnectDue) => vec![Effect::Connect],
            (_, E::ReconnectDue) => Vec::new(),
        };

        if self.status != from {
            info!("Session {} -> {}", from, self.status);
        }
        effects
    }

    fn on_connection_lost(&mut self, cause: &str) -> Vec<Effect> {
        match self.retry.on_failure() {
            RetryDecision::Retry { attempt, delay } => {
                warn!(
                    "Connection lost ({}), reconnect attempt {} in {:?}",
                    cause, attempt, delay
                );
                if self.status == SessionStatus::Connecting {
                    // 尚未成功打开过：保持 Connecting
                    self.message = Some(MSG_CONNECTING_SERVER.to_string());
                } else {
                    self.enter(SessionStatus::Reconnecting, Some(MSG_RECONNECTING));
                }
                vec![Effect::DropConnection, Effect::ScheduleReconnect(delay)]
            },
            RetryDecision::GiveUp { failures } => {
                error!("Giving up after {} consecutive failures ({})", failures, cause);
                self.enter(SessionStatus::Failed, Some(MSG_CONNECT_FAILED));
                vec![Effect::Shutdown]
            },
        }
    }

    fn enter(&mut self, status: SessionStatus, message: Option<&str>) {
        self.status = status;
        self.message = message.map(str::to_string);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started() -> SessionMachine {
        let mut machine = SessionMachine::default();
        assert_eq!(machine.handle(SessionEvent::Start), vec![Effect::Connect]);
        machine
    }

    fn streaming() -> SessionMachine {
        let mut machine = started();
        assert_eq!(machine.handle(SessionEvent::Opened), vec![Effect::CaptureFrame]);
        machine.handle(SessionEvent::FrameSent);
        assert_eq!(machine.status(), SessionStatus::Streaming);
        machine
    }

    fn closed() -> SessionEvent {
        SessionEvent::Closed { reason: None }
    }

    #[test]
    fn test_start_connect_stream() {
        let mut machine = started();
        assert_eq!(machine.status(), SessionStatus::Connecting);
        assert_eq!(machine.message(), Some(MSG_CONNECTING_SERVER));

        machine.handle(SessionEvent::Opened);
        assert_eq!(machine.status(), SessionStatus::Connecting);
        assert_eq!(machine.message(), Some(MSG_CONNECTING_SOURCE));

        machine.handle(SessionEvent::FrameSent);
        assert_eq!(machine.status(), SessionStatus::Streaming);
        assert_eq!(machine.message(), None);
    }

    /// 每个响应都重新触发采集
    #[test]
    fn test_responses_rearm_capture() {
        let mut machine = streaming();
        assert_eq!(machine.handle(SessionEvent::Detections), vec![Effect::CaptureFrame]);
        assert_eq!(machine.handle(SessionEvent::DecodeFailed), vec![Effect::CaptureFrame]);
        assert_eq!(machine.status(), SessionStatus::Streaming);
    }

    #[test]
    fn test_degraded_and_back() {
        let mut machine = streaming();
        machine.handle(SessionEvent::NoDetections {
            warning: "No face detected".into(),
        });
        assert_eq!(machine.status(), SessionStatus::Degraded);
        assert_eq!(machine.message(), Some("No face detected"));

        machine.handle(SessionEvent::Detections);
        assert_eq!(machine.status(), SessionStatus::Streaming);
        assert_eq!(machine.message(), None);
    }

    #[test]
    fn test_close_while_streaming_reconnects() {
        let mut machine = streaming();
        let effects = machine.handle(closed());
        assert_eq!(machine.status(), SessionStatus::Reconnecting);
        assert_eq!(machine.message(), Some(MSG_RECONNECTING));
        assert_eq!(
            effects,
            vec![
                Effect::DropConnection,
                Effect::ScheduleReconnect(Duration::from_millis(500))
            ]
        );

        assert_eq!(machine.handle(SessionEvent::ReconnectDue), vec![Effect::Connect]);
        machine.handle(SessionEvent::Opened);
        assert_eq!(machine.reconnect_failures(), 0);
        machine.handle(SessionEvent::FrameSent);
        assert_eq!(machine.status(), SessionStatus::Streaming);
    }

    /// 连续失败达到上限后进入 Failed，不再发起连接
    #[test]
    fn test_bounded_reconnect() {
        let mut machine = started();
        let mut connects = 1;
        for _ in 0..10 {
            let effects = machine.handle(SessionEvent::ConnectFailed {
                error: "refused".into(),
            });
            if effects.contains(&Effect::Shutdown) {
                break;
            }
            assert_eq!(machine.status(), SessionStatus::Connecting);
            if machine.handle(SessionEvent::ReconnectDue).contains(&Effect::Connect) {
                connects += 1;
            }
        }
        assert_eq!(connects, 3);
        assert_eq!(machine.status(), SessionStatus::Failed);
        assert_eq!(machine.message(), Some(MSG_CONNECT_FAILED));
        assert!(machine.handle(SessionEvent::ReconnectDue).is_empty());
    }

    /// close 和 error 共用同一个计数器
    #[test]
    fn test_close_and_error_share_counter() {
        let mut machine = streaming();
        machine.handle(closed());
        machine.handle(SessionEvent::ReconnectDue);
        machine.handle(SessionEvent::ConnectFailed {
            error: "refused".into(),
        });
        assert_eq!(machine.reconnect_failures(), 2);
        let effects = machine.handle(SessionEvent::TransportError {
            error: "reset".into(),
        });
        assert_eq!(effects, vec![Effect::Shutdown]);
        assert_eq!(machine.status(), SessionStatus::Failed);
    }

    #[test]
    fn test_stream_error_is_fatal() {
        let mut machine = streaming();
        let effects = machine.handle(SessionEvent::StreamError {
            message: "Invalid API key".into(),
        });
        assert_eq!(effects, vec![Effect::Shutdown]);
        assert_eq!(machine.status(), SessionStatus::Failed);
        assert_eq!(machine.message(), Some("Invalid API key"));
    }

    /// 终态忽略所有事件
    #[test]
    fn test_terminal_states_absorb_events() {
        let mut machine = streaming();
        assert_eq!(machine.handle(SessionEvent::Stop), vec![Effect::Shutdown]);
        assert_eq!(machine.status(), SessionStatus::Stopped);

        for event in [
            SessionEvent::Stop,
            SessionEvent::Start,
            SessionEvent::Opened,
            closed(),
            SessionEvent::ReconnectDue,
            SessionEvent::CaptureDue,
            SessionEvent::Detections,
        ] {
            assert!(machine.handle(event).is_empty());
            assert_eq!(machine.status(), SessionStatus::Stopped);
        }
    }

    #[test]
    fn test_stop_before_start() {
        let mut machine = SessionMachine::default();
        assert_eq!(machine.handle(SessionEvent::Stop), vec![Effect::Shutdown]);
        assert_eq!(machine.status(), SessionStatus::Stopped);
    }

    #[test]
    fn test_events_before_start_are_ignored() {
        let mut machine = SessionMachine::default();
        assert!(machine.handle(SessionEvent::Detections).is_empty());
        assert!(machine.handle(closed()).is_empty());
        assert_eq!(machine.status(), SessionStatus::Idle);
    }

    #[test]
    fn test_capture_skip_schedules_retry() {
        let mut machine = streaming();
        let effects = machine.handle(SessionEvent::CaptureSkipped {
            source_unavailable: true,
        });
        assert_eq!(effects, vec![Effect::ScheduleCapture]);
        assert_eq!(machine.status(), SessionStatus::Streaming);
        assert_eq!(machine.message(), Some(MSG_SOURCE_FAILED));
        assert_eq!(machine.handle(SessionEvent::CaptureDue), vec![Effect::CaptureFrame]);
    }

    #[test]
    fn test_response_timeout_forces_fresh_capture() {
        let mut machine = streaming();
        assert_eq!(
            machine.handle(SessionEvent::ResponseTimeout),
            vec![Effect::ExpireInFlight, Effect::CaptureFrame]
        );
    }
}
