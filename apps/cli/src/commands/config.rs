//! 配置管理命令
//!
//! 检查、查看、生成 `FlywheelConfig` TOML 文件

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use flywheel_sdk::prelude::FlywheelConfig;
use std::fs;
use std::path::{Path, PathBuf};

use crate::session::GlobalArgs;

/// 配置命令
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// 校验配置文件
    Check {
        /// 配置文件路径
        file: PathBuf,
    },

    /// 打印生效的配置（配置文件 + 命令行覆盖）
    Show,

    /// 写出一份默认配置
    Init {
        /// 输出文件路径
        #[arg(short, long, default_value = "flywheel.toml")]
        output: PathBuf,

        /// 覆盖已存在的文件
        #[arg(long)]
        force: bool,
    },
}

impl ConfigCommand {
    pub fn execute(self, global: &GlobalArgs) -> Result<()> {
        match self {
            ConfigCommand::Check { file } => Self::check_(&file),

            ConfigCommand::Show => Self::show_(global),

            ConfigCommand::Init { output, force } => Self::init_(&output, force, global),
        }
    }

    fn check_(file: &Path) -> Result<()> {
        let config = FlywheelConfig::from_toml_file(file)
            .with_context(|| format!("配置无效: {}", file.display()))?;
        println!("✅ 配置有效: {}", file.display());
        if config.port.is_empty() {
            println!("⚠️  未设置 port，运行时需要 --port");
        }
        Ok(())
    }

    fn show_(global: &GlobalArgs) -> Result<()> {
        let config = global.effective_config()?;
        print!("{}", config.to_toml_string()?);
        Ok(())
    }

    fn init_(output: &Path, force: bool, global: &GlobalArgs) -> Result<()> {
        if output.exists() && !force {
            bail!("{} 已存在（使用 --force 覆盖）", output.display());
        }
        let config = global.effective_config()?;
        fs::write(output, config.to_toml_string()?)
            .with_context(|| format!("写入配置文件失败: {}", output.display()))?;
        println!("✅ 已写入 {}", output.display());
        Ok(())
    }
}
