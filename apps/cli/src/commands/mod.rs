//! 命令定义和实现

pub mod config;
pub mod probe;
pub mod run;

pub use config::ConfigCommand;
pub use probe::ProbeCommand;
pub use run::RunCommand;

use anyhow::{Context, Result};
use clap::Args;
use config::CredentialSettings;
use emostream_sdk::driver::{FrameSource, ImageSequenceSource, StillFrameSource};
use emostream_sdk::transport::{
    CredentialProvider, EnvCredential, HttpCredentialProvider, StaticCredential,
};
use std::path::PathBuf;

/// 令牌参数（优先级：--token > --token-url > 配置文件 > 环境变量）
#[derive(Args, Debug, Clone, Default)]
pub struct CredentialArgs {
    /// 直接指定 API key / 访问令牌
    #[arg(long, conflicts_with = "token_url")]
    pub token: Option<String>,

    /// 令牌端点 URL
    #[arg(long)]
    pub token_url: Option<String>,
}

impl CredentialArgs {
    pub fn provider(&self, settings: &CredentialSettings) -> Result<Box<dyn CredentialProvider>> {
        if let Some(token) = &self.token {
            return Ok(Box::new(StaticCredential::new(token.clone())));
        }
        if let Some(url) = self.token_url.as_ref().or(settings.token_url.as_ref()) {
            let provider = HttpCredentialProvider::new(url.clone())
                .context("Failed to create token endpoint client")?;
            return Ok(Box::new(provider));
        }
        Ok(Box::new(match &settings.api_key_env {
            Some(var) => EnvCredential::new(var.clone()),
            None => EnvCredential::default(),
        }))
    }
}

/// 帧源参数
#[derive(Args, Debug, Clone)]
#[group(required = true, multiple = false)]
pub struct SourceArgs {
    /// 循环播放目录中的 JPEG/PNG 图像
    #[arg(long)]
    pub frames: Option<PathBuf>,

    /// 反复发送同一张图像
    #[arg(long)]
    pub image: Option<PathBuf>,
}

impl SourceArgs {
    pub fn open(&self) -> Result<Box<dyn FrameSource>> {
        if let Some(dir) = &self.frames {
            let source = ImageSequenceSource::from_dir(dir)
                .with_context(|| format!("Cannot use {} as frame source", dir.display()))?;
            return Ok(Box::new(source));
        }
        if let Some(file) = &self.image {
            let source = StillFrameSource::from_file(file)
                .with_context(|| format!("Cannot read {}", file.display()))?;
            return Ok(Box::new(source));
        }
        anyhow::bail!("No frame source given (use --frames or --image)")
    }
}
