//! Prelude - 常用类型的便捷导入
//!
//! ```rust
//! use emostream_sdk::prelude::*;
//! ```

// 客户端层（推荐使用）
pub use crate::client::{
    AggregatedResult, Session, SessionBuilder, SessionConfig, SessionSnapshot, SessionStatus,
    Signal, SubjectSelection,
};

// 帧源与配置
pub use crate::driver::{
    Frame, FrameFormat, FrameSource, ImageSequenceSource, PipelineConfig, RetryPolicy,
    StillFrameSource,
};

// 令牌与端点
pub use crate::transport::{
    CredentialProvider, EnvCredential, HttpCredentialProvider, StaticCredential, StreamEndpoint,
};

// 错误类型
pub use crate::client::SessionError;
pub use crate::driver::{CaptureError, DriverError};
pub use crate::protocol::ProtocolError;
pub use crate::transport::{CredentialError, TransportError};
