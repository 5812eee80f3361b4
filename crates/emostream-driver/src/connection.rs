//! 连接管理
//!
//! `ConnectionManager` 独占 socket：打开、关闭、发送、轮询入站事件，
//! 以及记录下一次重连的时间点。是否重连由上层状态机决定。
//!
//! 建连可能阻塞到连接超时；其他线程可通过 [`AbortSignal`] 提前中止。

use crate::{DriverError, StreamMetrics};
use emostream_transport::{
    AbortSignal, AccessToken, Connector, StreamEndpoint, Transport, TransportError,
};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// 连接上的入站事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// 一条文本消息
    Message(String),
    /// 对端关闭
    Closed { reason: Option<String> },
    /// 传输错误（连接已不可用）
    Error(String),
}

pub struct ConnectionManager {
    connector: Box<dyn Connector>,
    endpoint: StreamEndpoint,
    transport: Option<Box<dyn Transport>>,
    reopen_at: Option<Instant>,
    abort: AbortSignal,
    metrics: Arc<StreamMetrics>,
}

impl ConnectionManager {
    pub fn new(
        connector: Box<dyn Connector>,
        endpoint: StreamEndpoint,
        metrics: Arc<StreamMetrics>,
    ) -> Self {
        Self {
            connector,
            endpoint,
            transport: None,
            reopen_at: None,
            abort: AbortSignal::new(),
            metrics,
        }
    }

    /// 中止信号的共享句柄，触发后进行中的和之后的 `open` 都会失败
    pub fn abort_signal(&self) -> AbortSignal {
        self.abort.clone()
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_aborted()
    }

    /// 用新获取的令牌建立连接
    ///
    /// 已有连接会先被关闭。
    pub fn open(&mut self, token: &AccessToken) -> Result<(), DriverError> {
        self.close();
        self.reopen_at = None;
        self.metrics.connect_attempts.fetch_add(1, Ordering::Relaxed);

        let url = self
            .endpoint
            .url_for(token.as_str())
            .map_err(DriverError::ConnectFailed)?;
        match self.connector.connect(&url, &self.abort) {
            Ok(transport) => {
                info!("Connected to {}", self.endpoint.redacted());
                self.transport = Some(transport);
                Ok(())
            },
            Err(e) => {
                warn!("Failed to connect to {}: {}", self.endpoint.redacted(), e);
                Err(DriverError::ConnectFailed(e))
            },
        }
    }

    pub fn is_open(&self) -> bool {
        self.transport.as_ref().is_some_and(|t| t.is_open())
    }

    /// 是否持有 socket（可能已被对端关闭但尚未轮询到）
    pub fn has_socket(&self) -> bool {
        self.transport.is_some()
    }

    /// 关闭并释放 socket
    ///
    /// 幂等：没有 socket 时什么也不做，返回 `false`。
    pub fn close(&mut self) -> bool {
        match self.transport.take() {
            Some(mut transport) => {
                transport.close();
                self.metrics.sockets_closed.fetch_add(1, Ordering::Relaxed);
                debug!("Socket released");
                true
            },
            None => false,
        }
    }

    pub fn send(&mut self, text: &str) -> Result<(), DriverError> {
        let transport = self.transport.as_mut().ok_or(DriverError::NotConnected)?;
        transport.send_text(text)?;
        Ok(())
    }

    /// 在 `timeout` 内等待下一个入站事件
    ///
    /// 对端关闭或出错时 socket 会被释放，之后返回 `None` 直到下一次 `open`。
    pub fn poll(&mut self, timeout: Duration) -> Option<ConnectionEvent> {
        let transport = self.transport.as_mut()?;
        if !transport.is_open() {
            self.close();
            return Some(ConnectionEvent::Closed { reason: None });
        }

        match transport.receive_timeout(timeout) {
            Ok(text) => Some(ConnectionEvent::Message(text)),
            Err(TransportError::Timeout) => None,
            Err(TransportError::Closed { reason }) => {
                self.close();
                Some(ConnectionEvent::Closed { reason })
            },
            Err(e) => {
                self.close();
                Some(ConnectionEvent::Error(e.to_string()))
            },
        }
    }

    /// 安排 `delay` 之后重连
    pub fn schedule_reopen(&mut self, delay: Duration) {
        self.metrics.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
        self.reopen_at = Some(Instant::now() + delay);
    }

    /// 到期则消费重连计划并返回 `true`
    pub fn take_due_reopen(&mut self, now: Instant) -> bool {
        match self.reopen_at {
            Some(at) if at <= now => {
                self.reopen_at = None;
                true
            },
            _ => false,
        }
    }

    pub fn cancel_reopen(&mut self) {
        self.reopen_at = None;
    }

    pub fn reopen_at(&self) -> Option<Instant> {
        self.reopen_at
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.close();
    }
}
