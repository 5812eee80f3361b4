//! 配置管理命令
//!
//! 配置文件位于 `<config_dir>/emostream/config.toml`，缺失的字段取默认值。

use anyhow::{Context, Result};
use clap::Subcommand;
use emostream_sdk::client::SessionConfig;
use std::fs;
use std::path::{Path, PathBuf};

/// 配置文件路径
pub fn config_file() -> Result<PathBuf> {
    let mut path =
        dirs::config_dir().ok_or_else(|| anyhow::anyhow!("Cannot determine config directory"))?;
    path.push("emostream");
    path.push("config.toml");
    Ok(path)
}

/// 令牌来源
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CredentialSettings {
    /// 令牌端点（GET -> {"accessToken": ".."}）
    pub token_url: Option<String>,
    /// 存放 API key 的环境变量（默认 HUME_API_KEY）
    pub api_key_env: Option<String>,
}

/// CLI 配置
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub credentials: CredentialSettings,
    pub session: SessionConfig,
}

impl CliConfig {
    /// 从默认位置加载；文件不存在时返回默认配置
    pub fn load() -> Result<Self> {
        Self::load_from(&config_file()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("Failed to create config directory")?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, format!("# emostream CLI configuration\n\n{content}"))
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }
}

/// 配置命令
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// 写入默认配置文件
    Init {
        /// 覆盖已有文件
        #[arg(long)]
        force: bool,
    },

    /// 显示生效的配置
    Show,

    /// 显示配置文件路径
    Path,
}

impl ConfigCommand {
    pub fn execute(self) -> Result<()> {
        match self {
            ConfigCommand::Init { force } => Self::init_(force),
            ConfigCommand::Show => Self::show_(),
            ConfigCommand::Path => {
                println!("{}", config_file()?.display());
                Ok(())
            },
        }
    }

    fn init_(force: bool) -> Result<()> {
        let path = config_file()?;
        if path.exists() && !force {
            anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
        }
        CliConfig::default().save_to(&path)?;
        println!("✅ Wrote {}", path.display());
        Ok(())
    }

    fn show_() -> Result<()> {
        let path = config_file()?;
        let config = CliConfig::load_from(&path)?;
        println!("# {}", path.display());
        print!("{}", toml::to_string_pretty(&config)?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emostream_sdk::client::SubjectSelection;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = CliConfig::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, CliConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = CliConfig::default();
        config.credentials.token_url = Some("http://localhost:3000/api/token".into());
        config.session.retry.max_reconnects = 5;
        config.session.aggregator.subject = SubjectSelection::LargestFace;
        config.save_to(&path).unwrap();

        assert_eq!(CliConfig::load_from(&path).unwrap(), config);
    }

    /// 部分配置：其余字段取默认值
    #[test]
    fn test_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
[session.retry]
max_reconnects = 7

[session.pipeline]
response_timeout_ms = 2000
connect_timeout_ms = 3000
"#,
        )
        .unwrap();

        let config = CliConfig::load_from(&path).unwrap();
        assert_eq!(config.session.retry.max_reconnects, 7);
        assert_eq!(config.session.retry.base_delay_ms, 500);
        assert_eq!(config.session.pipeline.response_timeout_ms, Some(2000));
        assert_eq!(config.session.pipeline.connect_timeout_ms, 3000);
        assert_eq!(config.session.pipeline.poll_interval_ms, 20);
        assert_eq!(config.session.aggregator.top_n, 3);
        assert!(config.session.models.face.is_some());
    }
}
