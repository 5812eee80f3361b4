//! 内存 Mock 网络（无网络依赖）
//!
//! 用于在测试中驱动会话状态机：可以拒绝连接、按帧回复、
//! 模拟服务端关闭、统计在途请求数。

use crate::{AbortSignal, Connector, Transport, TransportError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 服务端对一条入站消息的反应
#[derive(Debug, Clone, PartialEq)]
pub enum MockReply {
    /// 回复一条文本消息
    Text(String),
    /// 关闭连接
    Close(Option<String>),
    /// 传输错误
    Error(String),
    /// 在额外延迟之后回复一条文本消息
    Late(Duration, String),
    /// 不回复
    Silence,
}

/// `(connection_index, frame_index_on_connection, request_text) -> reply`
pub type Responder = Box<dyn FnMut(usize, usize, &str) -> MockReply + Send>;

#[derive(Debug)]
struct Pending {
    ready_at: Instant,
    reply: MockReply,
}

struct Link {
    queue: VecDeque<Pending>,
    open: bool,
    frames: usize,
}

struct Inner {
    responder: Responder,
    reply_delay: Duration,
    refuse_remaining: usize,
    refuse_all: bool,
    links: Vec<Link>,
    connect_attempts: usize,
    closes: usize,
    sent: Vec<String>,
    outstanding: usize,
    max_outstanding: usize,
    last_url: Option<String>,
}

/// 共享的 Mock 网络状态
#[derive(Clone)]
pub struct MockNetwork {
    inner: Arc<Mutex<Inner>>,
}

impl Default for MockNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MockNetwork {
    /// 默认对每帧回复空检测结果
    pub fn new() -> Self {
        Self::with_responder(|_, _, _| MockReply::Text(r#"{"face":{"predictions":[]}}"#.into()))
    }

    pub fn with_responder<F>(responder: F) -> Self
    where
        F: FnMut(usize, usize, &str) -> MockReply + Send + 'static,
    {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                responder: Box::new(responder),
                reply_delay: Duration::ZERO,
                refuse_remaining: 0,
                refuse_all: false,
                links: Vec::new(),
                connect_attempts: 0,
                closes: 0,
                sent: Vec::new(),
                outstanding: 0,
                max_outstanding: 0,
                last_url: None,
            })),
        }
    }

    pub fn connector(&self) -> MockConnector {
        MockConnector { net: self.clone() }
    }

    /// 回复可见之前的延迟
    pub fn set_reply_delay(&self, delay: Duration) {
        self.inner.lock().reply_delay = delay;
    }

    /// 拒绝接下来的 `n` 次连接
    pub fn refuse_next(&self, n: usize) {
        self.inner.lock().refuse_remaining = n;
    }

    pub fn refuse_all(&self, refuse: bool) {
        self.inner.lock().refuse_all = refuse;
    }

    pub fn connect_attempts(&self) -> usize {
        self.inner.lock().connect_attempts
    }

    /// 成功建立的连接数
    pub fn connections(&self) -> usize {
        self.inner.lock().links.len()
    }

    /// 客户端主动关闭的连接数
    pub fn closes(&self) -> usize {
        self.inner.lock().closes
    }

    pub fn sent_count(&self) -> usize {
        self.inner.lock().sent.len()
    }

    pub fn sent_messages(&self) -> Vec<String> {
        self.inner.lock().sent.clone()
    }

    /// 观测到的最大在途请求数
    pub fn max_outstanding(&self) -> usize {
        self.inner.lock().max_outstanding
    }

    pub fn last_url(&self) -> Option<String> {
        self.inner.lock().last_url.clone()
    }
}

/// Mock 连接工厂
pub struct MockConnector {
    net: MockNetwork,
}

impl Connector for MockConnector {
    fn connect(
        &mut self,
        url: &str,
        abort: &AbortSignal,
    ) -> Result<Box<dyn Transport>, TransportError> {
        let mut inner = self.net.inner.lock();
        inner.connect_attempts += 1;
        inner.last_url = Some(url.to_string());

        if abort.is_aborted() {
            return Err(TransportError::Aborted);
        }

        if inner.refuse_all || inner.refuse_remaining > 0 {
            inner.refuse_remaining = inner.refuse_remaining.saturating_sub(1);
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "mock connection refused",
            )));
        }

        inner.links.push(Link {
            queue: VecDeque::new(),
            open: true,
            frames: 0,
        });
        inner.outstanding = 0;
        let index = inner.links.len() - 1;

        Ok(Box::new(MockTransport {
            net: self.net.clone(),
            index,
            open: true,
        }))
    }
}

/// Mock 连接
pub struct MockTransport {
    net: MockNetwork,
    index: usize,
    open: bool,
}

impl Transport for MockTransport {
    fn send_text(&mut self, text: &str) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::NotConnected);
        }

        let mut guard = self.net.inner.lock();
        let inner = &mut *guard;
        if !inner.links[self.index].open {
            self.open = false;
            return Err(TransportError::Closed { reason: None });
        }

        inner.sent.push(text.to_string());
        inner.outstanding += 1;
        inner.max_outstanding = inner.max_outstanding.max(inner.outstanding);

        let frame = inner.links[self.index].frames;
        inner.links[self.index].frames += 1;
        let reply = (inner.responder)(self.index, frame, text);
        let ready_at = Instant::now() + inner.reply_delay;
        let pending = match reply {
            MockReply::Silence => None,
            MockReply::Late(extra, text) => Some(Pending {
                ready_at: ready_at + extra,
                reply: MockReply::Text(text),
            }),
            reply => Some(Pending { ready_at, reply }),
        };
        if let Some(pending) = pending {
            inner.links[self.index].queue.push_back(pending);
        }
        Ok(())
    }

    fn receive_timeout(&mut self, timeout: Duration) -> Result<String, TransportError> {
        if !self.open {
            return Err(TransportError::NotConnected);
        }

        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut guard = self.net.inner.lock();
                let inner = &mut *guard;
                let link = &mut inner.links[self.index];
                let now = Instant::now();

                if link.queue.front().is_some_and(|p| p.ready_at <= now)
                    && let Some(pending) = link.queue.pop_front()
                {
                    match pending.reply {
                        MockReply::Text(text) => {
                            inner.outstanding = inner.outstanding.saturating_sub(1);
                            return Ok(text);
                        },
                        MockReply::Close(reason) => {
                            link.open = false;
                            self.open = false;
                            return Err(TransportError::Closed { reason });
                        },
                        MockReply::Error(message) => {
                            link.open = false;
                            self.open = false;
                            return Err(TransportError::WebSocket(message));
                        },
                        MockReply::Late(..) | MockReply::Silence => {},
                    }
                } else if !link.open && link.queue.is_empty() {
                    self.open = false;
                    return Err(TransportError::Closed { reason: None });
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(TransportError::Timeout);
            }
            std::thread::sleep((deadline - now).min(Duration::from_millis(2)));
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
        let mut inner = self.net.inner.lock();
        inner.closes += 1;
        inner.links[self.index].open = false;
    }
}

impl Drop for MockTransport {
    fn drop(&mut self) {
        self.close();
    }
}
