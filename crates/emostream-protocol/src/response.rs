//! 入站推理结果
//!
//! 线上格式与归一化模型分离：`Wire*` 结构体只负责反序列化，
//! 上层只看到 [`InferenceResponse`]。

use crate::ProtocolError;
use serde::{Deserialize, Serialize};

/// 人脸边界框（像素坐标）
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl BoundingBox {
    /// 面积（宽或高为负时视为 0）
    pub fn area(&self) -> f64 {
        self.w.max(0.0) * self.h.max(0.0)
    }
}

/// 单个表情得分
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionScore {
    pub name: String,
    pub score: f64,
}

/// 一个被识别的主体：边界框 + 有序的表情得分列表
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Detection {
    pub bounding_box: BoundingBox,
    /// 保持服务端返回的顺序
    pub emotions: Vec<EmotionScore>,
    /// 人脸检测概率
    pub probability: Option<f64>,
    /// 服务端分配的人脸 ID（仅在启用 `identify_faces` 时存在）
    pub face_id: Option<String>,
}

/// 归一化后的推理响应
///
/// `detections` 为空是合法状态，不是错误。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InferenceResponse {
    pub detections: Vec<Detection>,
    pub warning: Option<String>,
    pub error: Option<String>,
    /// 服务端错误码（如 `E0300`），仅在 `error` 存在时有意义
    pub error_code: Option<String>,
}

impl InferenceResponse {
    /// 是否携带致命错误
    pub fn is_fatal(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    face: Option<WireFace>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireFace {
    #[serde(default)]
    predictions: Vec<WirePrediction>,
    #[serde(default)]
    warning: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WirePrediction {
    #[serde(default)]
    bbox: Option<BoundingBox>,
    #[serde(default)]
    prob: Option<f64>,
    #[serde(default)]
    face_id: Option<String>,
    #[serde(default)]
    emotions: Vec<EmotionScore>,
}

impl From<WirePrediction> for Detection {
    fn from(pred: WirePrediction) -> Self {
        Self {
            bounding_box: pred.bbox.unwrap_or_default(),
            emotions: pred.emotions,
            probability: pred.prob,
            face_id: pred.face_id,
        }
    }
}

/// 解析一条入站文本消息
///
/// # 错误
/// - `ProtocolError::Malformed`: 不是 JSON 对象，或字段类型不匹配
pub fn decode_response(text: &str) -> Result<InferenceResponse, ProtocolError> {
    let wire: WireMessage = serde_json::from_str(text).map_err(ProtocolError::Malformed)?;

    let (detections, warning) = match wire.face {
        Some(face) => (
            face.predictions.into_iter().map(Detection::from).collect(),
            face.warning,
        ),
        None => (Vec::new(), None),
    };

    Ok(InferenceResponse {
        detections,
        warning,
        error: wire.error,
        error_code: wire.code,
    })
}
