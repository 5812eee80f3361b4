//! 驱动层错误类型定义

use emostream_protocol::ProtocolError;
use emostream_transport::{CredentialError, TransportError};
use thiserror::Error;

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// 传输层错误（已建立的连接上）
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// 协议编解码错误
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 令牌获取失败
    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    /// 建立连接失败
    #[error("Connect failed: {0}")]
    ConnectFailed(#[source] TransportError),

    /// 当前没有打开的连接
    #[error("Not connected")]
    NotConnected,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 测试 DriverError 的 Display 实现
    #[test]
    fn test_driver_error_display() {
        let err = DriverError::Transport(TransportError::Timeout);
        assert_eq!(format!("{}", err), "Transport error: Read timeout");

        let err = DriverError::ConnectFailed(TransportError::NotConnected);
        assert_eq!(format!("{}", err), "Connect failed: Not connected");

        let err = DriverError::Protocol(ProtocolError::EmptyFrame);
        assert!(format!("{}", err).contains("Empty frame"));

        assert_eq!(format!("{}", DriverError::NotConnected), "Not connected");
    }

    /// 测试 From<CredentialError> 转换
    #[test]
    fn test_from_credential_error() {
        let err: DriverError = CredentialError::EmptyToken.into();
        assert!(matches!(err, DriverError::Credential(CredentialError::EmptyToken)));
    }
}
