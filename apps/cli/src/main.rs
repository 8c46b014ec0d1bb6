//! # SLS CLI
//!
//! 多模块探测器的命令行工具。
//!
//! ```bash
//! # 记住默认安装文件
//! sls-cli config set-default --setup eiger-500k.toml
//!
//! # 查看状态
//! sls-cli status
//!
//! # 加载参数文件
//! sls-cli config load eiger.config
//!
//! # 采集（Ctrl-C 中止）
//! sls-cli acquire --frames 100 --exposure 1ms --summary run.json
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod context;

use commands::{AcquireCommand, ConfigCommand, StatusCommand, StopCommand, TempsCommand};

/// SLS CLI - 探测器命令行工具
#[derive(Parser, Debug)]
#[command(name = "sls-cli")]
#[command(about = "Command-line interface for SLS detector acquisition", long_about = None)]
#[command(version)]
struct Cli {
    /// 探测器安装文件（覆盖默认配置）
    #[arg(short, long, global = true)]
    setup: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 配置管理
    #[command(subcommand)]
    Config(ConfigCommand),

    /// 查看每个模块和接收器的状态
    Status {
        #[command(flatten)]
        args: StatusCommand,
    },

    /// 执行一次采集
    Acquire {
        #[command(flatten)]
        args: AcquireCommand,
    },

    /// 读取温度
    Temps {
        #[command(flatten)]
        args: TempsCommand,
    },

    /// 停止所有模块和接收器
    Stop {
        #[command(flatten)]
        args: StopCommand,
    },
}

fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("sls_cli=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let setup = cli.setup.as_deref();

    match cli.command {
        Commands::Config(cmd) => cmd.execute(setup),
        Commands::Status { args } => args.execute(setup),
        Commands::Acquire { args } => args.execute(setup),
        Commands::Temps { args } => args.execute(setup),
        Commands::Stop { args } => args.execute(setup),
    }
}
