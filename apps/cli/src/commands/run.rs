//! 流式会话命令

use super::config::CliConfig;
use super::{CredentialArgs, SourceArgs};
use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use crossbeam_channel::RecvTimeoutError;
use emostream_sdk::client::{SessionSnapshot, SubjectSelection};
use emostream_sdk::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::info;

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum SubjectArg {
    First,
    Largest,
}

impl From<SubjectArg> for SubjectSelection {
    fn from(arg: SubjectArg) -> Self {
        match arg {
            SubjectArg::First => SubjectSelection::First,
            SubjectArg::Largest => SubjectSelection::LargestFace,
        }
    }
}

/// 运行流式会话
#[derive(Args, Debug)]
pub struct RunCommand {
    #[command(flatten)]
    pub source: SourceArgs,

    #[command(flatten)]
    pub credentials: CredentialArgs,

    /// 推理服务 WebSocket URL
    #[arg(long)]
    pub url: Option<String>,

    /// 连续失败上限
    #[arg(long)]
    pub max_reconnects: Option<u32>,

    /// 单个请求的响应超时（毫秒）
    #[arg(long)]
    pub response_timeout_ms: Option<u64>,

    /// 建连超时（毫秒）
    #[arg(long)]
    pub connect_timeout_ms: Option<u64>,

    /// 主体选择策略
    #[arg(long, value_enum)]
    pub subject: Option<SubjectArg>,

    /// 运行时长（秒），不指定则运行到 Ctrl-C
    #[arg(long)]
    pub duration: Option<u64>,
}

impl RunCommand {
    pub fn execute(self) -> Result<()> {
        let config = CliConfig::load()?;
        let mut session_config = config.session.clone();
        if let Some(url) = &self.url {
            session_config.endpoint.url = url.clone();
        }
        if let Some(max) = self.max_reconnects {
            session_config.retry.max_reconnects = max;
        }
        if let Some(timeout) = self.response_timeout_ms {
            session_config.pipeline.response_timeout_ms = Some(timeout);
        }
        if let Some(timeout) = self.connect_timeout_ms {
            session_config.pipeline.connect_timeout_ms = timeout;
        }
        if let Some(subject) = self.subject {
            session_config.aggregator.subject = subject.into();
        }

        let mut session = SessionBuilder::new()
            .config(session_config)
            .boxed_credentials(self.credentials.provider(&config.credentials)?)
            .boxed_frame_source(self.source.open()?)
            .build()?;

        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst))
            .context("Failed to install Ctrl-C handler")?;

        let updates = session.subscribe(64);
        session.start().context("Failed to start session")?;

        let deadline = self.duration.map(|s| Instant::now() + Duration::from_secs(s));
        let mut last_line = String::new();
        while running.load(Ordering::SeqCst) && deadline.is_none_or(|d| Instant::now() < d) {
            match updates.recv_timeout(Duration::from_millis(200)) {
                Ok(snapshot) => {
                    let line = render(&snapshot);
                    if line != last_line {
                        println!("{line}");
                        last_line = line;
                    }
                    if snapshot.status.is_terminal() {
                        break;
                    }
                },
                Err(RecvTimeoutError::Timeout) => {},
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        session.stop();
        let snapshot = session.snapshot();
        let metrics = snapshot.metrics;
        info!(
            "Session ended: {} after {} ({} frames, {} responses, {} reconnects)",
            snapshot.status,
            snapshot.timer_text(),
            metrics.frames_sent,
            metrics.responses,
            metrics.reconnect_attempts
        );
        if let Some(rtt) = metrics.avg_rtt() {
            info!("Average round trip: {:?}", rtt);
        }

        if snapshot.status == SessionStatus::Failed {
            anyhow::bail!(
                "Session failed: {}",
                snapshot.message.as_deref().unwrap_or("unknown error")
            );
        }
        Ok(())
    }
}

fn render(snapshot: &SessionSnapshot) -> String {
    let mut line = format!("[{}] {}", snapshot.timer_text(), snapshot.status);
    if let Some(message) = &snapshot.message {
        line.push_str(&format!(" | {message}"));
    }
    if let Some(result) = &snapshot.result
        && !result.top_signals.is_empty()
    {
        let top: Vec<String> = result
            .top_signals
            .iter()
            .map(|s| format!("{} {:.0}%", s.name, s.score * 100.0))
            .collect();
        line.push_str(&format!(
            " | {} | confidence {}% | faces {}",
            top.join(", "),
            result.confidence,
            result.tracked_faces.len()
        ));
    }
    line
}
