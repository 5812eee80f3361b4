//! # emostream Protocol
//!
//! 流式表情推理服务的线协议定义（无 IO 依赖）
//!
//! ## 模块
//!
//! - `request`: 出站推理请求（帧数据 base64 编码 + 模型选择）
//! - `response`: 入站推理结果解析与归一化
//!
//! ## 消息格式
//!
//! 出站：
//!
//! ```text
//! { "data": "<base64-encoded-frame>", "models": { "face": {} } }
//! ```
//!
//! 入站：
//!
//! ```text
//! { "face": { "predictions": [ { "bbox": {..}, "emotions": [..] } ], "warning"?: ".." }, "error"?: ".." }
//! ```
//!
//! 缺少 `face` 且没有 `error` 的消息视为零个检测结果。

pub mod request;
pub mod response;

// 重新导出常用类型
pub use request::{FaceModelConfig, InferenceRequest, ModelSelector, encode_request};
pub use response::{BoundingBox, Detection, EmotionScore, InferenceResponse, decode_response};

use thiserror::Error;

/// 协议编解码错误类型
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// 帧数据为空，不允许发送
    #[error("Empty frame payload")]
    EmptyFrame,

    /// 请求序列化失败
    #[error("Failed to encode request: {0}")]
    Encode(#[source] serde_json::Error),

    /// 入站消息不是合法的 JSON 或结构不匹配
    #[error("Malformed inbound payload: {0}")]
    Malformed(#[source] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::EmptyFrame;
        assert_eq!(format!("{}", err), "Empty frame payload");

        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = ProtocolError::Malformed(json_err);
        assert!(format!("{}", err).starts_with("Malformed inbound payload"));
    }
}
