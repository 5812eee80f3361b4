//! # emostream Transport Layer
//!
//! 网络传输抽象层：
//!
//! - [`Transport`]: 已建立的双向文本消息通道
//! - [`Connector`]: 按 URL 建立新的 [`Transport`]
//! - [`CredentialProvider`]: 获取短期访问令牌
//!
//! 默认实现基于 `tungstenite`（同步 WebSocket），`mock` feature 提供
//! 无网络依赖的内存实现，用于测试上层状态机。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;

pub mod credential;
pub mod endpoint;
pub mod websocket;

#[cfg(feature = "mock")]
pub mod mock;

pub use credential::{
    AccessToken, CredentialError, CredentialProvider, EnvCredential, HttpCredentialProvider,
    StaticCredential,
};
pub use endpoint::{DEFAULT_STREAM_URL, StreamEndpoint};
pub use websocket::{DEFAULT_CONNECT_TIMEOUT, WsConnector, WsTransport};

/// 传输层统一错误类型
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WebSocket Error: {0}")]
    WebSocket(String),
    #[error("Read timeout")]
    Timeout,
    #[error("Connection closed{}", close_suffix(.reason))]
    Closed { reason: Option<String> },
    #[error("Not connected")]
    NotConnected,
    #[error("Unsupported endpoint: {0}")]
    Unsupported(String),
    /// 握手期间收到中止信号
    #[error("Connect aborted")]
    Aborted,
}

fn close_suffix(reason: &Option<String>) -> String {
    reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default()
}

/// 已建立的消息通道
///
/// 所有方法都在会话工作线程中调用，不要求 `Sync`。
pub trait Transport: Send {
    /// 发送一条文本消息
    fn send_text(&mut self, text: &str) -> Result<(), TransportError>;

    /// 在 `timeout` 内等待下一条文本消息
    ///
    /// 超时返回 `TransportError::Timeout`，对端关闭返回 `TransportError::Closed`。
    fn receive_timeout(&mut self, timeout: Duration) -> Result<String, TransportError>;

    /// 通道是否仍然打开
    fn is_open(&self) -> bool;

    /// 关闭通道（幂等）
    fn close(&mut self);
}

/// 连接工厂
pub trait Connector: Send {
    /// 建立连接
    ///
    /// 实现应当在 `abort` 被触发后尽快返回 `TransportError::Aborted`，
    /// 不能无限期阻塞在握手上。
    fn connect(
        &mut self,
        url: &str,
        abort: &AbortSignal,
    ) -> Result<Box<dyn Transport>, TransportError>;
}

/// 跨线程的中止信号
///
/// `Session::stop()` 通过它打断正在进行的连接握手。触发后不可复位。
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        assert_eq!(format!("{}", TransportError::Timeout), "Read timeout");
        assert_eq!(
            format!("{}", TransportError::Closed { reason: None }),
            "Connection closed"
        );
        assert_eq!(
            format!(
                "{}",
                TransportError::Closed {
                    reason: Some("going away".into())
                }
            ),
            "Connection closed: going away"
        );
    }

    #[test]
    fn test_abort_signal_is_shared() {
        let signal = AbortSignal::new();
        let remote = signal.clone();
        assert!(!signal.is_aborted());

        std::thread::spawn(move || remote.abort()).join().unwrap();
        assert!(signal.is_aborted());
    }
}
