//! Session Builder
//!
//! 链式组装会话所需的组件和配置。

use crate::aggregator::{AggregatorConfig, ResultAggregator};
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::session::Session;
use crate::state::SessionMachine;
use emostream_driver::{
    ConnectionManager, FrameScheduler, FrameSource, PipelineConfig, RetryPolicy, StreamMetrics,
};
use emostream_protocol::ModelSelector;
use emostream_transport::{Connector, CredentialProvider, StreamEndpoint, WsConnector};
use std::sync::Arc;

/// 会话 Builder
///
/// # 示例
///
/// ```rust,no_run
/// use emostream_client::SessionBuilder;
/// use emostream_driver::{FrameFormat, StillFrameSource};
/// use emostream_transport::EnvCredential;
///
/// let mut session = SessionBuilder::new()
///     .credentials(EnvCredential::default())
///     .frame_source(StillFrameSource::new(&b"\xff\xd8\xff"[..], FrameFormat::Jpeg))
///     .build()
///     .unwrap();
/// session.start().unwrap();
/// ```
#[derive(Default)]
pub struct SessionBuilder {
    connector: Option<Box<dyn Connector>>,
    credentials: Option<Box<dyn CredentialProvider>>,
    frame_source: Option<Box<dyn FrameSource>>,
    config: SessionConfig,
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 连接工厂（默认 [`WsConnector`]，超时取自 `PipelineConfig::connect_timeout_ms`）
    pub fn connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Some(Box::new(connector));
        self
    }

    pub fn credentials(self, credentials: impl CredentialProvider + 'static) -> Self {
        self.boxed_credentials(Box::new(credentials))
    }

    pub fn boxed_credentials(mut self, credentials: Box<dyn CredentialProvider>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn frame_source(self, source: impl FrameSource + 'static) -> Self {
        self.boxed_frame_source(Box::new(source))
    }

    pub fn boxed_frame_source(mut self, source: Box<dyn FrameSource>) -> Self {
        self.frame_source = Some(source);
        self
    }

    /// 整体替换配置
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn endpoint(mut self, endpoint: StreamEndpoint) -> Self {
        self.config.endpoint = endpoint;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    pub fn pipeline_config(mut self, pipeline: PipelineConfig) -> Self {
        self.config.pipeline = pipeline;
        self
    }

    pub fn aggregator_config(mut self, aggregator: AggregatorConfig) -> Self {
        self.config.aggregator = aggregator;
        self
    }

    pub fn models(mut self, models: ModelSelector) -> Self {
        self.config.models = models;
        self
    }

    /// 组装会话（不会发起任何连接）
    ///
    /// # 错误
    /// - `SessionError::MissingComponent`: 未设置令牌提供者或帧源
    pub fn build(self) -> Result<Session, SessionError> {
        let credentials = self
            .credentials
            .ok_or(SessionError::MissingComponent("credentials"))?;
        let frame_source = self
            .frame_source
            .ok_or(SessionError::MissingComponent("frame_source"))?;
        let SessionConfig {
            endpoint,
            retry,
            pipeline,
            aggregator,
            models,
        } = self.config;

        let connector = self.connector.unwrap_or_else(|| {
            Box::new(WsConnector::with_connect_timeout(pipeline.connect_timeout()))
        });

        let metrics = Arc::new(StreamMetrics::new());
        let connection = ConnectionManager::new(connector, endpoint, Arc::clone(&metrics));
        let scheduler = FrameScheduler::new(frame_source, models, Arc::clone(&metrics));

        Ok(Session::new(
            connection,
            scheduler,
            ResultAggregator::new(aggregator),
            SessionMachine::new(retry),
            credentials,
            pipeline,
            metrics,
        ))
    }
}
