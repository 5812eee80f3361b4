//! 基于 tungstenite 的同步 WebSocket 传输
//!
//! 读超时通过底层 `TcpStream::set_read_timeout` 实现，
//! 因此 `receive_timeout` 不会无限阻塞工作线程。
//!
//! 建连同样有上限：TCP 连接使用 `connect_timeout`，握手以短读超时分片推进，
//! 每片之间检查截止时间和中止信号。

use crate::{AbortSignal, Connector, Transport, TransportError};
use std::io::ErrorKind;
use std::net::TcpStream;
use std::sync::Once;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};
use tungstenite::handshake::HandshakeError;
use tungstenite::protocol::WebSocket;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Error as WsError, Message};
use url::Url;

static CRYPTO_PROVIDER: Once = Once::new();

fn ensure_crypto_provider() {
    CRYPTO_PROVIDER.call_once(|| {
        // 已被其他组件安装时忽略
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// 默认连接超时（TCP 建连 + TLS/WebSocket 握手）
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// 握手期间单次读等待，决定响应中止信号的延迟
const HANDSHAKE_SLICE: Duration = Duration::from_millis(50);

/// WebSocket 连接工厂
#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::with_connect_timeout(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl WsConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// 指定连接超时；超时后握手失败，交给上层重连策略处理
    pub fn with_connect_timeout(timeout: Duration) -> Self {
        Self {
            connect_timeout: timeout.max(Duration::from_millis(1)),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
}

impl Connector for WsConnector {
    fn connect(
        &mut self,
        url: &str,
        abort: &AbortSignal,
    ) -> Result<Box<dyn Transport>, TransportError> {
        let without_query = || url.split('?').next().unwrap_or_default().to_string();
        let parsed = Url::parse(url).map_err(|_| TransportError::Unsupported(without_query()))?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(TransportError::Unsupported(without_query()));
        }

        if abort.is_aborted() {
            return Err(TransportError::Aborted);
        }
        let deadline = Instant::now() + self.connect_timeout;
        let stream = connect_tcp(&parsed, self.connect_timeout)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(HANDSHAKE_SLICE))?;
        stream.set_write_timeout(Some(self.connect_timeout))?;

        ensure_crypto_provider();
        let mut attempt = tungstenite::client_tls_with_config(url, stream, None, None);
        let (socket, response) = loop {
            match attempt {
                Ok(done) => break done,
                Err(HandshakeError::Failure(e)) => return Err(map_ws_error(e)),
                Err(HandshakeError::Interrupted(mid)) => {
                    if abort.is_aborted() {
                        debug!("WebSocket handshake aborted");
                        return Err(TransportError::Aborted);
                    }
                    if Instant::now() >= deadline {
                        warn!("WebSocket handshake timed out after {:?}", self.connect_timeout);
                        return Err(TransportError::Timeout);
                    }
                    attempt = mid.handshake();
                },
            }
        };
        debug!("WebSocket handshake completed: HTTP {}", response.status());

        Ok(Box::new(WsTransport::new(socket)))
    }
}

fn connect_tcp(url: &Url, timeout: Duration) -> Result<TcpStream, TransportError> {
    let mut last_error = None;
    for addr in url.socket_addrs(|| None)? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                trace!("TCP connect to {} failed: {}", addr, e);
                last_error = Some(e);
            },
        }
    }
    Err(match last_error {
        Some(e) if e.kind() == ErrorKind::TimedOut => TransportError::Timeout,
        Some(e) => TransportError::Io(e),
        None => TransportError::Unsupported(format!(
            "{} resolved to no address",
            url.host_str().unwrap_or_default()
        )),
    })
}

/// 已建立的 WebSocket 连接
pub struct WsTransport {
    socket: WebSocket<MaybeTlsStream<TcpStream>>,
    open: bool,
    read_timeout: Option<Duration>,
}

impl WsTransport {
    pub fn new(socket: WebSocket<MaybeTlsStream<TcpStream>>) -> Self {
        Self {
            socket,
            open: true,
            read_timeout: None,
        }
    }

    fn apply_read_timeout(&mut self, timeout: Duration) -> Result<(), TransportError> {
        // set_read_timeout 不接受 0
        let timeout = timeout.max(Duration::from_millis(1));
        if self.read_timeout == Some(timeout) {
            return Ok(());
        }

        match self.socket.get_ref() {
            MaybeTlsStream::Plain(stream) => stream.set_read_timeout(Some(timeout))?,
            MaybeTlsStream::Rustls(stream) => stream.get_ref().set_read_timeout(Some(timeout))?,
            _ => {
                warn!("Unknown stream type, read timeout not applied");
            },
        }
        self.read_timeout = Some(timeout);
        Ok(())
    }
}

impl Transport for WsTransport {
    fn send_text(&mut self, text: &str) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::NotConnected);
        }
        self.socket.send(Message::Text(text.to_string())).map_err(|e| {
            self.open = false;
            map_ws_error(e)
        })
    }

    fn receive_timeout(&mut self, timeout: Duration) -> Result<String, TransportError> {
        if !self.open {
            return Err(TransportError::NotConnected);
        }
        self.apply_read_timeout(timeout)?;

        loop {
            match self.socket.read() {
                Ok(Message::Text(text)) => return Ok(text),
                Ok(Message::Binary(data)) => match String::from_utf8(data) {
                    Ok(text) => return Ok(text),
                    Err(_) => {
                        trace!("Dropping non-UTF-8 binary message");
                    },
                },
                Ok(Message::Close(frame)) => {
                    self.open = false;
                    let reason = frame
                        .map(|f| f.reason.to_string())
                        .filter(|r| !r.is_empty());
                    return Err(TransportError::Closed { reason });
                },
                Ok(_) => {
                    // Ping/Pong 由 tungstenite 自动应答
                },
                Err(WsError::Io(e))
                    if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
                {
                    return Err(TransportError::Timeout);
                },
                Err(e) => {
                    self.open = false;
                    return Err(map_ws_error(e));
                },
            }
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        if let Err(e) = self.socket.close(None) {
            trace!("Close frame not sent: {}", e);
        }
        let _ = self.socket.flush();
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.close();
    }
}

fn map_ws_error(err: WsError) -> TransportError {
    match err {
        WsError::Io(e) => TransportError::Io(e),
        WsError::ConnectionClosed | WsError::AlreadyClosed => {
            TransportError::Closed { reason: None }
        },
        WsError::Url(e) => TransportError::Unsupported(e.to_string()),
        other => TransportError::WebSocket(other.to_string()),
    }
}
