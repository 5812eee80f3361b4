//! 会话配置

use crate::aggregator::AggregatorConfig;
use emostream_driver::{PipelineConfig, RetryPolicy};
use emostream_protocol::ModelSelector;
use emostream_transport::StreamEndpoint;

/// 会话的全部可调参数
///
/// 启用 `serde` feature 后可以从配置文件反序列化，缺失的字段取默认值。
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SessionConfig {
    pub endpoint: StreamEndpoint,
    pub retry: RetryPolicy,
    pub pipeline: PipelineConfig,
    pub aggregator: AggregatorConfig,
    pub models: ModelSelector,
}
