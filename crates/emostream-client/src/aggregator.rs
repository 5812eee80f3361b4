//! 结果聚合
//!
//! 把归一化的推理响应转换为：
//! - 主体的表情得分表（[`EmotionScores`]）
//! - 得分最高的 N 个信号
//! - 综合置信度（固定正向信号子集的平均分 x100）
//! - 所有检测到的人脸边界框

use emostream_protocol::{BoundingBox, Detection, InferenceResponse};
use tracing::{debug, trace};

/// 默认的正向信号子集
pub const DEFAULT_POSITIVE_SIGNALS: [&str; 3] = ["Joy", "Calmness", "Confidence"];

/// 没有检测结果且服务端未给出提示时的状态文本
pub const NO_DETECTION_MESSAGE: &str = "No face detected";

// ==================== 得分表 ====================

/// 表情名称 -> 得分
///
/// 键唯一，保持插入顺序；值总在 [0, 1] 内。
/// 不存在的名称表示“未打分”，不等同于 0。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmotionScores {
    entries: Vec<(String, f64)>,
}

/// 单个信号（名称 + 得分）
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Signal {
    pub name: String,
    pub score: f64,
}

impl EmotionScores {
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入一个得分
    ///
    /// 超出 [0, 1] 的值被截断；NaN/无穷大被拒绝并返回 `false`。
    /// 同名键会被覆盖。
    pub fn insert(&mut self, name: impl Into<String>, score: f64) -> bool {
        if !score.is_finite() {
            return false;
        }
        let name = name.into();
        let score = score.clamp(0.0, 1.0);
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = score,
            None => self.entries.push((name, score)),
        }
        true
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, s)| *s)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(n, s)| (n.as_str(), *s))
    }

    /// 按得分降序取前 `n` 个；得分相同保持原有顺序
    pub fn top_n(&self, n: usize) -> Vec<Signal> {
        let mut sorted: Vec<&(String, f64)> = self.entries.iter().collect();
        sorted.sort_by(|a, b| b.1.total_cmp(&a.1));
        sorted
            .into_iter()
            .take(n)
            .map(|(name, score)| Signal {
                name: name.clone(),
                score: *score,
            })
            .collect()
    }

    /// 综合置信度：`names` 的平均分 x100 后四舍五入，缺失的名称计 0
    pub fn composite<S: AsRef<str>>(&self, names: &[S]) -> u32 {
        if names.is_empty() {
            return 0;
        }
        let sum: f64 = names
            .iter()
            .map(|n| self.get(n.as_ref()).unwrap_or(0.0))
            .sum();
        let mean = sum / names.len() as f64;
        (mean * 100.0).round().clamp(0.0, 100.0) as u32
    }
}

impl<N: Into<String>> FromIterator<(N, f64)> for EmotionScores {
    fn from_iter<I: IntoIterator<Item = (N, f64)>>(iter: I) -> Self {
        let mut scores = EmotionScores::new();
        for (name, score) in iter {
            scores.insert(name, score);
        }
        scores
    }
}

// ==================== 配置 ====================

/// 主体选择策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum SubjectSelection {
    /// 第一个检测结果
    #[default]
    First,
    /// 边界框面积最大的检测结果
    LargestFace,
}

impl SubjectSelection {
    pub fn select<'a>(&self, detections: &'a [Detection]) -> Option<&'a Detection> {
        match self {
            SubjectSelection::First => detections.first(),
            SubjectSelection::LargestFace => detections
                .iter()
                .rev()
                .max_by(|a, b| a.bounding_box.area().total_cmp(&b.bounding_box.area())),
        }
    }
}

/// 聚合配置
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct AggregatorConfig {
    /// 取前几个信号（默认 3）
    pub top_n: usize,
    /// 参与综合置信度的信号
    pub positive_signals: Vec<String>,
    pub subject: SubjectSelection,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            top_n: 3,
            positive_signals: DEFAULT_POSITIVE_SIGNALS.iter().map(|s| s.to_string()).collect(),
            subject: SubjectSelection::First,
        }
    }
}

// ==================== 聚合器 ====================

/// 最近一次的聚合结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregatedResult {
    pub emotions: EmotionScores,
    pub top_signals: Vec<Signal>,
    /// 综合置信度（0-100）
    pub confidence: u32,
    /// 所有检测到的人脸
    pub tracked_faces: Vec<BoundingBox>,
    /// 第几次聚合（从 1 开始）
    pub sequence: u64,
}

/// 一次聚合的结论
#[derive(Debug, Clone, PartialEq)]
pub enum AggregateOutcome {
    /// 至少一个检测结果
    Detections,
    /// 零个检测结果，`warning` 已去掉末尾句号
    NoDetections { warning: String },
    /// 服务端返回错误
    Fatal {
        message: String,
        code: Option<String>,
    },
}

pub struct ResultAggregator {
    config: AggregatorConfig,
    latest: AggregatedResult,
    sequence: u64,
}

impl ResultAggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Self {
            config,
            latest: AggregatedResult::default(),
            sequence: 0,
        }
    }

    pub fn latest(&self) -> &AggregatedResult {
        &self.latest
    }

    /// 处理一条响应
    ///
    /// 错误响应不会修改最近结果。
    pub fn ingest(&mut self, response: &InferenceResponse) -> AggregateOutcome {
        if let Some(message) = &response.error {
            return AggregateOutcome::Fatal {
                message: message.clone(),
                code: response.error_code.clone(),
            };
        }

        self.sequence += 1;
        self.latest.sequence = self.sequence;
        self.latest.tracked_faces = response.detections.iter().map(|d| d.bounding_box).collect();

        let Some(subject) = self.config.subject.select(&response.detections) else {
            self.latest.emotions.clear();
            self.latest.top_signals.clear();
            self.latest.confidence = 0;

            let warning = response
                .warning
                .as_deref()
                .map(strip_warning)
                .filter(|w| !w.is_empty())
                .unwrap_or_else(|| NO_DETECTION_MESSAGE.to_string());
            debug!("No detections: {}", warning);
            return AggregateOutcome::NoDetections { warning };
        };

        let mut emotions = EmotionScores::new();
        for emotion in &subject.emotions {
            if !emotions.insert(emotion.name.as_str(), emotion.score) {
                trace!("Ignoring non-finite score for {}", emotion.name);
            }
        }
        self.latest.top_signals = emotions.top_n(self.config.top_n);
        self.latest.confidence = emotions.composite(&self.config.positive_signals);
        self.latest.emotions = emotions;

        AggregateOutcome::Detections
    }
}

fn strip_warning(warning: &str) -> String {
    warning.trim().trim_end_matches('.').trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use emostream_protocol::{EmotionScore, decode_response};

    fn detection(bbox: (f64, f64), emotions: &[(&str, f64)]) -> Detection {
        Detection {
            bounding_box: BoundingBox {
                x: 0.0,
                y: 0.0,
                w: bbox.0,
                h: bbox.1,
            },
            emotions: emotions
                .iter()
                .map(|(n, s)| EmotionScore {
                    name: n.to_string(),
                    score: *s,
                })
                .collect(),
            ..Detection::default()
        }
    }

    fn names(signals: &[Signal]) -> Vec<&str> {
        signals.iter().map(|s| s.name.as_str()).collect()
    }

    /// Joy 0.6 / Calmness 0.3 / Confidence 0.9 / Anger 0.5 -> 60
    #[test]
    fn test_composite_confidence() {
        let scores: EmotionScores =
            [("Joy", 0.6), ("Calmness", 0.3), ("Confidence", 0.9), ("Anger", 0.5)]
                .into_iter()
                .collect();
        assert_eq!(scores.composite(&DEFAULT_POSITIVE_SIGNALS), 60);
    }

    #[test]
    fn test_composite_missing_counts_as_zero() {
        let scores: EmotionScores = [("Joy", 0.9)].into_iter().collect();
        assert_eq!(scores.composite(&DEFAULT_POSITIVE_SIGNALS), 30);
        assert_eq!(EmotionScores::new().composite(&DEFAULT_POSITIVE_SIGNALS), 0);
        assert_eq!(scores.composite::<&str>(&[]), 0);
    }

    /// 同分保持原有顺序
    #[test]
    fn test_top_n_is_stable_on_ties() {
        let scores: EmotionScores = [("A", 0.9), ("B", 0.9), ("C", 0.5), ("D", 0.3), ("E", 0.1)]
            .into_iter()
            .collect();
        assert_eq!(names(&scores.top_n(3)), vec!["A", "B", "C"]);

        let reversed: EmotionScores = [("E", 0.1), ("B", 0.9), ("A", 0.9)].into_iter().collect();
        assert_eq!(names(&reversed.top_n(3)), vec!["B", "A", "E"]);
    }

    #[test]
    fn test_scores_are_clamped_and_unique() {
        let mut scores = EmotionScores::new();
        assert!(scores.insert("Joy", 1.7));
        assert!(scores.insert("Anger", -0.2));
        assert!(!scores.insert("Fear", f64::NAN));
        assert!(scores.insert("Joy", 0.4));

        assert_eq!(scores.len(), 2);
        assert_eq!(scores.get("Joy"), Some(0.4));
        assert_eq!(scores.get("Anger"), Some(0.0));
        assert_eq!(scores.get("Fear"), None);
    }

    /// 空检测：清空得分表，提示文本去掉末尾句号
    #[test]
    fn test_empty_detections_clear_scores() {
        let mut aggregator = ResultAggregator::new(AggregatorConfig::default());
        let hit = InferenceResponse {
            detections: vec![detection((10.0, 10.0), &[("Joy", 0.8)])],
            ..InferenceResponse::default()
        };
        assert_eq!(aggregator.ingest(&hit), AggregateOutcome::Detections);
        assert!(!aggregator.latest().emotions.is_empty());

        let miss =
            decode_response(r#"{"face":{"predictions":[],"warning":"No face detected."}}"#).unwrap();
        assert_eq!(
            aggregator.ingest(&miss),
            AggregateOutcome::NoDetections {
                warning: "No face detected".to_string()
            }
        );
        let latest = aggregator.latest();
        assert!(latest.emotions.is_empty());
        assert!(latest.top_signals.is_empty());
        assert!(latest.tracked_faces.is_empty());
        assert_eq!(latest.confidence, 0);
    }

    #[test]
    fn test_missing_warning_uses_default_message() {
        let mut aggregator = ResultAggregator::new(AggregatorConfig::default());
        let outcome = aggregator.ingest(&InferenceResponse::default());
        assert_eq!(
            outcome,
            AggregateOutcome::NoDetections {
                warning: NO_DETECTION_MESSAGE.to_string()
            }
        );
    }

    /// 只有第一个检测结果参与打分，但所有人脸都被跟踪
    #[test]
    fn test_first_subject_policy_tracks_all_faces() {
        let mut aggregator = ResultAggregator::new(AggregatorConfig::default());
        let response = InferenceResponse {
            detections: vec![
                detection((10.0, 10.0), &[("Joy", 0.2)]),
                detection((50.0, 50.0), &[("Joy", 0.9)]),
            ],
            ..InferenceResponse::default()
        };
        aggregator.ingest(&response);

        let latest = aggregator.latest();
        assert_eq!(latest.emotions.get("Joy"), Some(0.2));
        assert_eq!(latest.tracked_faces.len(), 2);
        assert_eq!(latest.sequence, 1);
    }

    #[test]
    fn test_largest_face_policy() {
        let mut aggregator = ResultAggregator::new(AggregatorConfig {
            subject: SubjectSelection::LargestFace,
            ..AggregatorConfig::default()
        });
        let response = InferenceResponse {
            detections: vec![
                detection((10.0, 10.0), &[("Joy", 0.2)]),
                detection((50.0, 50.0), &[("Joy", 0.9)]),
                detection((50.0, 50.0), &[("Joy", 0.5)]),
            ],
            ..InferenceResponse::default()
        };
        aggregator.ingest(&response);
        // 面积相同取靠前的
        assert_eq!(aggregator.latest().emotions.get("Joy"), Some(0.9));
    }

    #[test]
    fn test_error_response_is_fatal_and_keeps_latest() {
        let mut aggregator = ResultAggregator::new(AggregatorConfig::default());
        aggregator.ingest(&InferenceResponse {
            detections: vec![detection((1.0, 1.0), &[("Joy", 0.7)])],
            ..InferenceResponse::default()
        });

        let outcome = aggregator.ingest(&InferenceResponse {
            error: Some("Invalid API key".into()),
            error_code: Some("E0300".into()),
            ..InferenceResponse::default()
        });
        assert_eq!(
            outcome,
            AggregateOutcome::Fatal {
                message: "Invalid API key".into(),
                code: Some("E0300".into())
            }
        );
        assert_eq!(aggregator.latest().emotions.get("Joy"), Some(0.7));
    }

    #[test]
    fn test_strip_warning() {
        assert_eq!(strip_warning("No face detected."), "No face detected");
        assert_eq!(strip_warning("  Too dark...  "), "Too dark");
        assert_eq!(strip_warning("Plain"), "Plain");
    }
}
