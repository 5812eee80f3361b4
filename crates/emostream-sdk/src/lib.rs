//! emostream SDK - 流式表情推理客户端
//!
//! 把摄像头帧通过 WebSocket 推送到推理服务，一次只有一个请求在途，
//! 并把每帧的检测结果汇总为 Top-N 信号和综合置信度。
//!
//! # 架构设计
//!
//! - **协议层** (`protocol`): 出站请求编码、入站结果解析
//! - **传输层** (`transport`): WebSocket 连接、令牌获取
//! - **驱动层** (`driver`): 连接管理、帧调度、重连策略、指标
//! - **客户端层** (`client`): 会话状态机、结果聚合、会话运行时
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use emostream_sdk::prelude::*;
//!
//! emostream_sdk::init_logger();
//!
//! let mut session = SessionBuilder::new()
//!     .credentials(EnvCredential::default())
//!     .frame_source(ImageSequenceSource::from_dir("frames").unwrap())
//!     .build()
//!     .unwrap();
//! session.start().unwrap();
//!
//! if let Some(result) = session.latest_result() {
//!     println!("confidence: {}%", result.confidence);
//! }
//! session.stop();
//! ```

pub use emostream_client as client;
pub use emostream_driver as driver;
pub use emostream_protocol as protocol;
pub use emostream_transport as transport;

pub mod prelude;

// --- 用户以此为界 ---

pub use client::{Session, SessionBuilder, SessionError, SessionStatus};
pub use driver::DriverError;
pub use protocol::ProtocolError;
pub use transport::TransportError;

use std::sync::Once;

static LOGGER: Once = Once::new();

/// 初始化日志
///
/// 默认级别 `info`，可以通过 `RUST_LOG` 覆盖；同时把 `log` crate 的记录
/// 转发到 `tracing`。多次调用只有第一次生效，已有全局 subscriber 时静默跳过。
pub fn init_logger() {
    LOGGER.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_thread_names(true)
            .finish();

        if tracing::subscriber::set_global_default(subscriber).is_ok() {
            let _ = tracing_log::LogTracer::init();
        }
    });
}
