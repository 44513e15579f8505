//! # Flywheel CLI
//!
//! Command-line interface for reaction-wheel control over a serial link.
//!
//! 每个命令独立执行：读取配置 → 连接 → 执行 → 断开。
//!
//! ```bash
//! # 监控遥测（Ctrl-C 退出）
//! flywheel-cli --port /dev/ttyUSB0 monitor
//!
//! # 下发一次设定值
//! flywheel-cli --port COM5 set speed 1500
//!
//! # 录制 10 秒遥测到 JSON
//! flywheel-cli --config flywheel.toml record --output run.json --duration 10
//!
//! # 按转速曲线运行，遥测经 UDP 转发
//! flywheel-cli --port COM5 profile speeds.txt --rate 100 --udp 127.0.0.1:5005
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod session;

use commands::{ConfigCommand, MonitorCommand, ProfileCommand, RecordCommand, SetCommand};
use session::GlobalArgs;

/// Flywheel CLI - 反作用飞轮命令行工具
#[derive(Parser, Debug)]
#[command(name = "flywheel-cli")]
#[command(about = "Command-line interface for flywheel control", long_about = None)]
#[command(version)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 配置文件管理
    #[command(subcommand)]
    Config(ConfigCommand),

    /// 列出可用串口
    Ports,

    /// 自动轮询并打印遥测
    Monitor {
        #[command(flatten)]
        args: MonitorCommand,
    },

    /// 下发一次设定值并读取一帧遥测
    Set {
        #[command(flatten)]
        args: SetCommand,
    },

    /// 录制遥测到 JSON 文件
    Record {
        #[command(flatten)]
        args: RecordCommand,
    },

    /// 按转速曲线运行，同时通过 UDP 转发遥测
    Profile {
        #[command(flatten)]
        args: ProfileCommand,
    },
}

fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("flywheel_cli=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config(cmd) => cmd.execute(&cli.global),

        Commands::Ports => commands::list_ports(),

        Commands::Monitor { args } => args.execute(&cli.global),

        Commands::Set { args } => args.execute(&cli.global),

        Commands::Record { args } => args.execute(&cli.global),

        Commands::Profile { args } => args.execute(&cli.global),
    }
}
