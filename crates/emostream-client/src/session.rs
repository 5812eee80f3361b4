//! 会话运行时
//!
//! 所有 socket 事件、采集结果和定时器都在一个工作线程中按顺序处理：
//!
//! ```text
//! caller --Command--> worker: next_event -> SessionMachine::handle -> execute(Effect) -> publish
//! ```
//!
//! 读取方通过 `ArcSwap` 获取最新快照，或订阅有界通道接收更新。

use crate::aggregator::{AggregateOutcome, AggregatedResult, ResultAggregator};
use crate::error::SessionError;
use crate::snapshot::SessionSnapshot;
use crate::state::{Effect, SessionEvent, SessionMachine, SessionStatus};
use arc_swap::ArcSwap;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use emostream_driver::{
    ConnectionEvent, ConnectionManager, CycleOutcome, FrameScheduler, MetricsSnapshot,
    PipelineConfig, SkipReason, StreamMetrics,
};
use emostream_protocol::decode_response;
use emostream_transport::{AbortSignal, AccessToken, CredentialProvider};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, error, info, warn};

enum Command {
    Stop,
}

struct SharedState {
    snapshot: ArcSwap<SessionSnapshot>,
    metrics: Arc<StreamMetrics>,
    subscribers: Mutex<Vec<Sender<SessionSnapshot>>>,
}

impl SharedState {
    fn publish(&self, snapshot: SessionSnapshot) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| match tx.try_send(snapshot.clone()) {
            Ok(()) | Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Disconnected(_)) => false,
        });
        self.snapshot.store(Arc::new(snapshot));
    }
}

/// 流式推理会话
///
/// 由 [`SessionBuilder`](crate::SessionBuilder) 创建。`start()` 之后在后台线程运行，
/// `stop()`（或 Drop）时关闭 socket、释放帧源，各一次。
pub struct Session {
    shared: Arc<SharedState>,
    commands: Option<Sender<Command>>,
    worker: Option<JoinHandle<()>>,
    parked: Option<Worker>,
    abort: AbortSignal,
}

impl Session {
    pub(crate) fn new(
        connection: ConnectionManager,
        scheduler: FrameScheduler,
        aggregator: ResultAggregator,
        machine: SessionMachine,
        credentials: Box<dyn CredentialProvider>,
        pipeline: PipelineConfig,
        metrics: Arc<StreamMetrics>,
    ) -> Self {
        let shared = Arc::new(SharedState {
            snapshot: ArcSwap::from_pointee(SessionSnapshot::default()),
            metrics,
            subscribers: Mutex::new(Vec::new()),
        });
        let abort = connection.abort_signal();
        let worker = Worker {
            machine,
            connection,
            scheduler,
            aggregator,
            credentials,
            pending_token: None,
            pipeline,
            has_result: false,
            streaming_since: None,
            ended_at: None,
            shared: Arc::clone(&shared),
        };
        Self {
            shared,
            commands: None,
            worker: None,
            parked: Some(worker),
            abort,
        }
    }

    /// 启动会话
    ///
    /// 先同步获取令牌：失败时返回 `SessionError::Credential`，状态保持 `Idle`，
    /// 不会发起任何连接。
    pub fn start(&mut self) -> Result<(), SessionError> {
        self.start_with(|worker, rx, effects| {
            std::thread::Builder::new()
                .name("emostream-session".into())
                .spawn(move || worker.run(rx, effects))
        })
    }

    fn start_with<F>(&mut self, spawn: F) -> Result<(), SessionError>
    where
        F: FnOnce(Worker, Receiver<Command>, Vec<Effect>) -> io::Result<JoinHandle<()>>,
    {
        let Some(mut worker) = self.parked.take() else {
            return Err(if self.status().is_terminal() {
                SessionError::Terminated
            } else {
                SessionError::AlreadyStarted
            });
        };

        match worker.credentials.fetch() {
            Ok(token) => worker.pending_token = Some(token),
            Err(e) => {
                error!("Failed to obtain access token: {}", e);
                self.parked = Some(worker);
                return Err(SessionError::Credential(e));
            },
        }

        let effects = worker.machine.handle(SessionEvent::Start);
        worker.publish();

        let (tx, rx) = crossbeam_channel::unbounded();
        // 失败时 worker 随闭包一起被丢弃，socket 和帧源在 Drop 中释放
        let handle = match spawn(worker, rx, effects) {
            Ok(handle) => handle,
            Err(e) => {
                error!("Failed to spawn session worker: {}", e);
                let mut snapshot = (*self.snapshot()).clone();
                snapshot.status = SessionStatus::Failed;
                snapshot.message = Some(format!("Failed to start session worker: {e}"));
                snapshot.ended_at = Some(SystemTime::now());
                snapshot.metrics = self.shared.metrics.snapshot();
                self.shared.publish(snapshot);
                return Err(SessionError::Spawn(e));
            },
        };

        info!("Session started");
        self.commands = Some(tx);
        self.worker = Some(handle);
        Ok(())
    }

    /// 停止会话（幂等）
    ///
    /// 阻塞直到工作线程退出；进行中的建连握手会被中止。
    pub fn stop(&mut self) {
        if let Some(tx) = self.commands.take() {
            self.abort.abort();
            // 工作线程已自行退出时发送失败，忽略
            let _ = tx.send(Command::Stop);
        }
        if let Some(handle) = self.worker.take()
            && handle.join().is_err()
        {
            error!("Session worker panicked");
        }
        if let Some(mut worker) = self.parked.take() {
            worker.dispatch(SessionEvent::Stop);
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.shared.snapshot.load().status
    }

    /// 最新快照
    pub fn snapshot(&self) -> Arc<SessionSnapshot> {
        self.shared.snapshot.load_full()
    }

    pub fn latest_result(&self) -> Option<AggregatedResult> {
        self.shared.snapshot.load().result.clone()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// 订阅快照更新
    ///
    /// 通道有界；消费者跟不上时更新被丢弃，不会阻塞工作线程。
    /// 订阅时立即收到一份当前快照。
    pub fn subscribe(&self, capacity: usize) -> Receiver<SessionSnapshot> {
        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
        let _ = tx.try_send((*self.snapshot()).clone());
        self.shared.subscribers.lock().push(tx);
        rx
    }

    /// 等待快照满足条件，超时返回 `None`
    pub fn wait_until<F>(&self, timeout: Duration, predicate: F) -> Option<Arc<SessionSnapshot>>
    where
        F: Fn(&SessionSnapshot) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            let snapshot = self.snapshot();
            if predicate(&snapshot) {
                return Some(snapshot);
            }
            if Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}

// ==================== 工作线程 ====================

struct Worker {
    machine: SessionMachine,
    connection: ConnectionManager,
    scheduler: FrameScheduler,
    aggregator: ResultAggregator,
    credentials: Box<dyn CredentialProvider>,
    pending_token: Option<AccessToken>,
    pipeline: PipelineConfig,
    has_result: bool,
    streaming_since: Option<SystemTime>,
    ended_at: Option<SystemTime>,
    shared: Arc<SharedState>,
}

impl Worker {
    fn run(mut self, commands: Receiver<Command>, initial: Vec<Effect>) {
        self.process(VecDeque::new(), initial);

        while !self.machine.status().is_terminal() {
            if let Some(event) = self.next_event(&commands) {
                self.dispatch(event);
            }
        }

        self.shutdown();
        debug!("Session worker exited ({})", self.machine.status());
    }

    fn dispatch(&mut self, event: SessionEvent) {
        self.process(VecDeque::from([event]), Vec::new());
    }

    /// 执行副作用，副作用产生的事件按顺序再交给状态机
    fn process(&mut self, mut events: VecDeque<SessionEvent>, mut effects: Vec<Effect>) {
        loop {
            for effect in effects.drain(..) {
                if let Some(event) = self.execute(effect) {
                    events.push_back(event);
                }
            }
            let Some(event) = events.pop_front() else {
                break;
            };
            effects = self.machine.handle(event);
        }
        self.publish();
    }

    fn execute(&mut self, effect: Effect) -> Option<SessionEvent> {
        match effect {
            Effect::Connect => self.connect(),
            Effect::CaptureFrame => match self.scheduler.capture_and_send(&mut self.connection) {
                CycleOutcome::Sent { .. } => Some(SessionEvent::FrameSent),
                CycleOutcome::Busy => None,
                // 连接事件会驱动恢复
                CycleOutcome::Skipped(SkipReason::NotConnected) => None,
                CycleOutcome::Skipped(reason) => Some(SessionEvent::CaptureSkipped {
                    source_unavailable: reason.source_unavailable(),
                }),
                CycleOutcome::SendFailed(e) => Some(SessionEvent::TransportError {
                    error: e.to_string(),
                }),
            },
            Effect::ScheduleCapture => {
                self.scheduler.schedule_retry(self.pipeline.capture_retry());
                None
            },
            Effect::ScheduleReconnect(delay) => {
                self.connection.schedule_reopen(delay);
                None
            },
            Effect::DropConnection => {
                self.connection.close();
                self.scheduler.cancel_in_flight();
                self.scheduler.cancel_retry();
                None
            },
            Effect::ExpireInFlight => {
                self.scheduler.expire_in_flight();
                None
            },
            Effect::Shutdown => {
                self.shutdown();
                None
            },
        }
    }

    fn connect(&mut self) -> Option<SessionEvent> {
        if self.connection.is_aborted() {
            return Some(SessionEvent::Stop);
        }
        let token = match self.pending_token.take() {
            Some(token) => token,
            None => match self.credentials.fetch() {
                Ok(token) => token,
                Err(e) => {
                    return Some(SessionEvent::CredentialFailed {
                        error: e.to_string(),
                    });
                },
            },
        };
        // 令牌获取期间可能已被 stop
        if self.connection.is_aborted() {
            return Some(SessionEvent::Stop);
        }

        match self.connection.open(&token) {
            Ok(()) => Some(SessionEvent::Opened),
            Err(_) if self.connection.is_aborted() => Some(SessionEvent::Stop),
            Err(e) => Some(SessionEvent::ConnectFailed {
                error: e.to_string(),
            }),
        }
    }

    fn next_event(&mut self, commands: &Receiver<Command>) -> Option<SessionEvent> {
        match commands.try_recv() {
            Ok(Command::Stop) | Err(TryRecvError::Disconnected) => {
                return Some(SessionEvent::Stop);
            },
            Err(TryRecvError::Empty) => {},
        }

        let now = Instant::now();
        if self.connection.take_due_reopen(now) {
            return Some(SessionEvent::ReconnectDue);
        }
        if self.scheduler.take_due_retry(now) {
            return Some(SessionEvent::CaptureDue);
        }
        if let Some(timeout) = self.pipeline.response_timeout()
            && self.scheduler.is_overdue(now, timeout)
        {
            self.shared
                .metrics
                .response_timeouts
                .fetch_add(1, Ordering::Relaxed);
            return Some(SessionEvent::ResponseTimeout);
        }

        let wait = self.wait_budget(now);
        if self.connection.has_socket() {
            return match self.connection.poll(wait)? {
                ConnectionEvent::Message(text) => self.on_message(&text),
                ConnectionEvent::Closed { reason } => Some(SessionEvent::Closed { reason }),
                ConnectionEvent::Error(error) => Some(SessionEvent::TransportError { error }),
            };
        }

        match commands.recv_timeout(wait) {
            Ok(Command::Stop) | Err(RecvTimeoutError::Disconnected) => Some(SessionEvent::Stop),
            Err(RecvTimeoutError::Timeout) => None,
        }
    }

    /// 到下一个定时器的等待时间，上限为轮询间隔
    fn wait_budget(&self, now: Instant) -> Duration {
        let deadlines = [
            self.connection.reopen_at(),
            self.scheduler.retry_at(),
            self.pipeline
                .response_timeout()
                .and_then(|t| self.scheduler.in_flight_deadline(t)),
        ];
        deadlines
            .into_iter()
            .flatten()
            .map(|at| at.saturating_duration_since(now))
            .fold(self.pipeline.poll_interval(), Duration::min)
    }

    fn on_message(&mut self, text: &str) -> Option<SessionEvent> {
        if self.scheduler.discard_stale_reply() {
            return None;
        }
        self.scheduler.on_response();

        let response = match decode_response(text) {
            Ok(response) => response,
            Err(e) => {
                self.shared
                    .metrics
                    .decode_errors
                    .fetch_add(1, Ordering::Relaxed);
                warn!("Dropping malformed payload: {}", e);
                return Some(SessionEvent::DecodeFailed);
            },
        };

        let event = match self.aggregator.ingest(&response) {
            AggregateOutcome::Detections => {
                self.has_result = true;
                SessionEvent::Detections
            },
            AggregateOutcome::NoDetections { warning } => {
                self.has_result = true;
                SessionEvent::NoDetections { warning }
            },
            AggregateOutcome::Fatal { message, code } => {
                if let Some(code) = code {
                    error!("Inference service error {}: {}", code, message);
                }
                SessionEvent::StreamError { message }
            },
        };
        Some(event)
    }

    /// 释放 socket 和帧源（幂等）
    fn shutdown(&mut self) {
        self.connection.cancel_reopen();
        self.scheduler.cancel_retry();
        self.connection.close();
        self.scheduler.release();
        if self.ended_at.is_none() {
            self.ended_at = Some(SystemTime::now());
        }
    }

    fn publish(&mut self) {
        let status = self.machine.status();
        if matches!(status, SessionStatus::Streaming | SessionStatus::Degraded)
            && self.streaming_since.is_none()
        {
            self.streaming_since = Some(SystemTime::now());
        }

        let snapshot = SessionSnapshot {
            status,
            message: self.machine.message().map(str::to_string),
            result: self.has_result.then(|| self.aggregator.latest().clone()),
            reconnect_failures: self.machine.reconnect_failures(),
            streaming_since: self.streaming_since,
            ended_at: if status.is_terminal() { self.ended_at } else { None },
            metrics: self.shared.metrics.snapshot(),
        };
        self.shared.publish(snapshot);
    }
}
