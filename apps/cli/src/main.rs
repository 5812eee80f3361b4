//! # emostream CLI
//!
//! 流式表情推理客户端的命令行工具。
//!
//! ```bash
//! # 写入默认配置
//! emostream config init
//!
//! # 循环推送目录中的图像，直到 Ctrl-C
//! HUME_API_KEY=... emostream run --frames ./frames
//!
//! # 单帧探测（排查端点和令牌）
//! emostream probe face.jpg --token-url http://localhost:3000/api/token
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

use commands::{ConfigCommand, ProbeCommand, RunCommand};

/// emostream - 流式表情推理命令行工具
#[derive(Parser, Debug)]
#[command(name = "emostream")]
#[command(about = "Stream frames to an emotion inference service", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 配置管理
    #[command(subcommand)]
    Config(ConfigCommand),

    /// 运行流式会话
    Run {
        #[command(flatten)]
        args: RunCommand,
    },

    /// 发送单帧并打印检测结果
    Probe {
        #[command(flatten)]
        args: ProbeCommand,
    },
}

fn main() -> Result<()> {
    emostream_sdk::init_logger();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config(cmd) => cmd.execute(),
        Commands::Run { args } => args.execute(),
        Commands::Probe { args } => args.execute(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_requires_one_source() {
        assert!(Cli::try_parse_from(["emostream", "run"]).is_err());
        assert!(
            Cli::try_parse_from(["emostream", "run", "--frames", "a", "--image", "b"]).is_err()
        );
        assert!(Cli::try_parse_from(["emostream", "run", "--image", "b.jpg"]).is_ok());
    }

    #[test]
    fn test_token_conflicts_with_token_url() {
        let result = Cli::try_parse_from([
            "emostream", "probe", "a.jpg", "--token", "t", "--token-url", "http://x",
        ]);
        assert!(result.is_err());
    }
}
