//! 驱动层模块
//!
//! 本模块负责会话的 IO 部分，包括：
//! - 连接管理（打开/关闭/事件轮询/重连调度）
//! - 帧调度（严格的单请求在途流水线）
//! - 帧源抽象（摄像头/图像序列）
//! - 统一的有界重连策略
//! - 原子计数器指标
//!
//! 状态机和结果聚合在 `emostream-client` 中实现，本层不做生命周期决策。

pub mod connection;
mod error;
pub mod metrics;
pub mod pipeline;
pub mod retry;
pub mod scheduler;
pub mod source;

pub use connection::{ConnectionEvent, ConnectionManager};
pub use error::DriverError;
pub use metrics::{MetricsSnapshot, StreamMetrics};
pub use pipeline::PipelineConfig;
pub use retry::{RetryDecision, RetryPolicy, RetryState};
pub use scheduler::{CycleOutcome, FrameScheduler, SkipReason};
pub use source::{
    CaptureError, Frame, FrameFormat, FrameSource, ImageSequenceSource, StillFrameSource,
};
