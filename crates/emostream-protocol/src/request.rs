//! 出站推理请求
//!
//! 每个请求携带一帧 base64 编码的图像，以及要运行的模型集合。

use crate::ProtocolError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

/// 人脸表情模型配置
///
/// 所有字段均为可选；未设置时不会出现在线上消息中，
/// 因此默认配置序列化为 `{}`。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaceModelConfig {
    /// 是否在多帧之间为同一张脸分配稳定 ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identify_faces: Option<bool>,

    /// 人脸检测概率阈值（0.0-1.0）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prob_threshold: Option<f64>,

    /// 最小人脸尺寸（像素）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_face_size: Option<u32>,
}

/// 模型选择器
///
/// 默认只启用 `face` 模型。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSelector {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub face: Option<FaceModelConfig>,
}

impl ModelSelector {
    /// 仅启用人脸模型（默认配置）
    pub fn face() -> Self {
        Self {
            face: Some(FaceModelConfig::default()),
        }
    }

    /// 使用自定义人脸模型配置
    pub fn with_face(config: FaceModelConfig) -> Self {
        Self { face: Some(config) }
    }
}

impl Default for ModelSelector {
    fn default() -> Self {
        Self::face()
    }
}

/// 推理请求
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InferenceRequest {
    /// base64 编码的帧数据
    pub data: String,
    /// 模型选择
    pub models: ModelSelector,
}

impl InferenceRequest {
    /// 从原始编码帧构造请求
    ///
    /// # 错误
    /// - `ProtocolError::EmptyFrame`: 帧数据为空
    pub fn from_frame(payload: &[u8], models: &ModelSelector) -> Result<Self, ProtocolError> {
        if payload.is_empty() {
            return Err(ProtocolError::EmptyFrame);
        }

        Ok(Self {
            data: STANDARD.encode(payload),
            models: models.clone(),
        })
    }

    /// 序列化为线上 JSON 文本
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }
}

/// 将一帧编码为可直接发送的 JSON 文本
///
/// # Example
///
/// ```
/// use emostream_protocol::{ModelSelector, encode_request};
///
/// let text = encode_request(b"\xff\xd8\xff", &ModelSelector::default()).unwrap();
/// assert_eq!(text, r#"{"data":"/9j/","models":{"face":{}}}"#);
/// ```
pub fn encode_request(payload: &[u8], models: &ModelSelector) -> Result<String, ProtocolError> {
    InferenceRequest::from_frame(payload, models)?.to_json()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_request_matches_wire_format() {
        let text = encode_request(b"hello", &ModelSelector::default()).unwrap();
        assert_eq!(text, r#"{"data":"aGVsbG8=","models":{"face":{}}}"#);
    }

    #[test]
    fn test_face_options_are_serialized_when_set() {
        let models = ModelSelector::with_face(FaceModelConfig {
            identify_faces: Some(true),
            prob_threshold: None,
            min_face_size: Some(60),
        });
        let text = encode_request(b"x", &models).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();

        assert_eq!(value["models"]["face"]["identify_faces"], true);
        assert_eq!(value["models"]["face"]["min_face_size"], 60);
        assert!(value["models"]["face"].get("prob_threshold").is_none());
    }

    #[test]
    fn test_empty_frame_is_rejected() {
        let result = encode_request(&[], &ModelSelector::default());
        assert!(matches!(result, Err(ProtocolError::EmptyFrame)));
    }

    #[test]
    fn test_model_selector_from_partial_config() {
        let models: ModelSelector = serde_json::from_str(r#"{"face":{"prob_threshold":0.8}}"#).unwrap();
        let face = models.face.unwrap();
        assert_eq!(face.prob_threshold, Some(0.8));
        assert_eq!(face.identify_faces, None);
    }
}
