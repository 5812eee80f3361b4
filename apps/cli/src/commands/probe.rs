//! 单帧探测命令
//!
//! 打开一条连接，发送一张图像，等待一次响应并打印检测结果。
//! 不经过会话状态机，便于排查端点和令牌问题。

use super::CredentialArgs;
use super::config::CliConfig;
use anyhow::{Context, Result};
use clap::Args;
use emostream_sdk::driver::{
    ConnectionEvent, ConnectionManager, CycleOutcome, FrameScheduler, StillFrameSource,
    StreamMetrics,
};
use emostream_sdk::protocol::{InferenceResponse, decode_response};
use emostream_sdk::transport::WsConnector;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

#[derive(Args, Debug)]
pub struct ProbeCommand {
    /// 要发送的图像
    pub image: PathBuf,

    #[command(flatten)]
    pub credentials: CredentialArgs,

    /// 推理服务 WebSocket URL
    #[arg(long)]
    pub url: Option<String>,

    /// 等待响应的时长（毫秒）
    #[arg(long, default_value_t = 10_000)]
    pub timeout_ms: u64,
}

impl ProbeCommand {
    pub fn execute(self) -> Result<()> {
        let config = CliConfig::load()?;
        let mut endpoint = config.session.endpoint.clone();
        if let Some(url) = &self.url {
            endpoint.url = url.clone();
        }

        let token = self
            .credentials
            .provider(&config.credentials)?
            .fetch()
            .context("Failed to obtain access token")?;
        let source = StillFrameSource::from_file(&self.image)
            .with_context(|| format!("Cannot read {}", self.image.display()))?;

        let metrics = Arc::new(StreamMetrics::new());
        info!("Connecting to {}", endpoint.redacted());
        let connector = WsConnector::with_connect_timeout(config.session.pipeline.connect_timeout());
        let mut conn = ConnectionManager::new(Box::new(connector), endpoint, Arc::clone(&metrics));
        conn.open(&token).context("Failed to connect")?;

        let mut scheduler =
            FrameScheduler::new(Box::new(source), config.session.models.clone(), metrics);
        match scheduler.capture_and_send(&mut conn) {
            CycleOutcome::Sent { .. } => {},
            CycleOutcome::Skipped(reason) => anyhow::bail!("Frame not sent: {reason}"),
            CycleOutcome::SendFailed(e) => return Err(e).context("Failed to send frame"),
            CycleOutcome::Busy => anyhow::bail!("A request is already in flight"),
        }

        let deadline = Instant::now() + Duration::from_millis(self.timeout_ms);
        let text = loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                anyhow::bail!("No response within {} ms", self.timeout_ms);
            }
            match conn.poll(remaining.min(Duration::from_millis(200))) {
                Some(ConnectionEvent::Message(text)) => break text,
                Some(ConnectionEvent::Closed { reason }) => anyhow::bail!(
                    "Connection closed: {}",
                    reason.as_deref().unwrap_or("no reason given")
                ),
                Some(ConnectionEvent::Error(message)) => {
                    anyhow::bail!("Connection error: {message}")
                },
                None => {},
            }
        };

        if let Some(rtt) = scheduler.on_response() {
            info!("Round trip: {:?}", rtt);
        }
        let response = decode_response(&text).context("Failed to decode response")?;
        println!("{}", describe(&response));

        scheduler.release();
        conn.close();
        Ok(())
    }
}

fn describe(response: &InferenceResponse) -> String {
    if let Some(error) = &response.error {
        return match &response.error_code {
            Some(code) => format!("error [{code}]: {error}"),
            None => format!("error: {error}"),
        };
    }
    if response.detections.is_empty() {
        return match &response.warning {
            Some(warning) => format!("no detections ({warning})"),
            None => "no detections".to_string(),
        };
    }

    let mut lines = Vec::with_capacity(response.detections.len());
    for (i, detection) in response.detections.iter().enumerate() {
        let mut emotions: Vec<_> = detection.emotions.iter().collect();
        emotions.sort_by(|a, b| b.score.total_cmp(&a.score));
        let top: Vec<String> = emotions
            .iter()
            .take(3)
            .map(|e| format!("{} {:.2}", e.name, e.score))
            .collect();
        let b = &detection.bounding_box;
        lines.push(format!(
            "face {i} @ ({:.0},{:.0} {:.0}x{:.0}): {}",
            b.x,
            b.y,
            b.w,
            b.h,
            top.join(", ")
        ));
    }
    lines.join("\n")
}
