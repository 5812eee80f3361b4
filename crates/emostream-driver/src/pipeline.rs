//! 会话工作线程的节奏参数

use std::time::Duration;

/// Pipeline 配置
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PipelineConfig {
    /// 单次 socket 读等待时间（毫秒）
    ///
    /// 也是工作线程响应 `stop()` 的最大延迟。
    pub poll_interval_ms: u64,
    /// 采集周期被跳过后的重试间隔（毫秒）
    pub capture_retry_ms: u64,
    /// 单个请求的响应超时（毫秒）；`None` 表示不超时
    pub response_timeout_ms: Option<u64>,
    /// 建连超时（TCP + 握手，毫秒）
    pub connect_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 20,
            capture_retry_ms: 250,
            response_timeout_ms: None,
            connect_timeout_ms: 10_000,
        }
    }
}

impl PipelineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn capture_retry(&self) -> Duration {
        Duration::from_millis(self.capture_retry_ms)
    }

    pub fn response_timeout(&self) -> Option<Duration> {
        self.response_timeout_ms.map(Duration::from_millis)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms.max(1))
    }
}
