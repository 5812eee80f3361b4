//! 推理服务端点

use crate::TransportError;
use std::fmt;
use url::Url;

/// 默认流式推理端点
pub const DEFAULT_STREAM_URL: &str = "wss://api.hume.ai/v0/stream/models";

/// 流式推理端点：基础 URL + 令牌查询参数名
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct StreamEndpoint {
    pub url: String,
    pub token_param: String,
}

impl Default for StreamEndpoint {
    fn default() -> Self {
        Self {
            url: DEFAULT_STREAM_URL.to_string(),
            token_param: "apikey".to_string(),
        }
    }
}

impl StreamEndpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// 拼接带令牌的完整连接 URL
    ///
    /// # 错误
    /// - `TransportError::Unsupported`: 基础 URL 无法解析
    pub fn url_for(&self, token: &str) -> Result<String, TransportError> {
        Ok(self.with_query_token(token)?.into())
    }

    /// 用于日志的 URL（令牌打码）
    pub fn redacted(&self) -> Redacted<'_> {
        Redacted(self)
    }

    fn with_query_token(&self, value: &str) -> Result<Url, TransportError> {
        let mut url = Url::parse(&self.url)
            .map_err(|e| TransportError::Unsupported(format!("{} ({})", self.url, e)))?;
        url.query_pairs_mut().append_pair(&self.token_param, value);
        Ok(url)
    }
}

pub struct Redacted<'a>(&'a StreamEndpoint);

impl fmt::Display for Redacted<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.with_query_token("***") {
            Ok(url) => write!(f, "{}", url),
            Err(_) => write!(f, "{}", self.0.url),
        }
    }
}
