//! 客户端接口模块
//!
//! 本模块提供流式表情推理会话的用户接口，包括：
//! - 会话生命周期状态机（纯函数，可脱离 IO 测试）
//! - 单请求在途的流式会话运行时
//! - 结果聚合（得分表、Top-N 信号、综合置信度）
//! - 快照读取与更新订阅
//!
//! # 使用场景
//!
//! 这是大多数用户应该使用的模块。需要自定义连接或帧调度时，
//! 可以直接使用 `emostream-driver`。

pub mod aggregator;
pub mod builder;
pub mod config;
mod error;
pub mod session;
pub mod snapshot;
pub mod state;

// 重新导出常用类型
pub use aggregator::{
    AggregateOutcome, AggregatedResult, AggregatorConfig, EmotionScores, ResultAggregator, Signal,
    SubjectSelection,
};
pub use builder::SessionBuilder;
pub use config::SessionConfig;
pub use error::SessionError;
pub use session::Session;
pub use snapshot::{SessionSnapshot, format_elapsed};
pub use state::{Effect, SessionEvent, SessionMachine, SessionStatus};
