//! 会话管理
//!
//! 解析全局参数得到 [`FlywheelConfig`]，连接并启动飞轮，处理 Ctrl-C。

use anyhow::{Context, Result, bail};
use clap::Args;
use flywheel_sdk::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// 全局参数（命令行优先于配置文件）
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// TOML 配置文件
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// 串口名称（覆盖配置）
    #[arg(short, long, global = true)]
    pub port: Option<String>,

    /// 波特率（覆盖配置）
    #[arg(short, long, global = true)]
    pub baud: Option<u32>,
}

impl GlobalArgs {
    /// 合并配置文件与命令行参数，不要求串口已指定
    pub fn effective_config(&self) -> Result<FlywheelConfig> {
        let mut config = match &self.config {
            Some(path) => FlywheelConfig::from_toml_file(path)
                .with_context(|| format!("加载配置文件失败: {}", path.display()))?,
            None => FlywheelConfig::default(),
        };
        if let Some(port) = &self.port {
            config.port = port.clone();
        }
        if let Some(baud) = self.baud {
            config.baud_rate = baud;
        }
        config.validate()?;
        Ok(config)
    }

    /// 用于连接设备的配置（必须指定串口）
    pub fn resolve(&self) -> Result<FlywheelConfig> {
        let config = self.effective_config()?;
        if config.port.is_empty() {
            bail!("未指定串口：使用 --port 或在配置文件中设置 `port`");
        }
        Ok(config)
    }
}

/// 安装 Ctrl-C 处理器，返回 "仍在运行" 标志
pub fn interrupt_flag() -> Result<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();
    ctrlc::set_handler(move || {
        flag.store(false, Ordering::SeqCst);
    })
    .context("安装 Ctrl-C 处理器失败")?;
    Ok(running)
}

/// 构建、连接并启动飞轮
pub fn open(builder: FlywheelBuilder) -> Result<Flywheel> {
    let flywheel = builder.build()?;
    println!("⏳ 连接到 {} ({} baud)...", flywheel.port(), flywheel.baud_rate());
    flywheel.connect()?;
    flywheel.start()?;
    println!("✅ 已连接");
    Ok(flywheel)
}

/// 停止并断开；失败只记录警告
pub fn close(flywheel: &Flywheel) {
    if let Err(e) = flywheel.stop() {
        warn!("Failed to stop flywheel: {}", e);
    }
    if let Err(e) = flywheel.disconnect() {
        warn!("Failed to disconnect flywheel: {}", e);
    }
    let metrics = flywheel.metrics();
    info!(
        "Session summary: sent={} telemetry={} acks={} timeouts={} decode_errors={} evictions={}",
        metrics.commands_sent,
        metrics.telemetry_frames,
        metrics.acks_received,
        metrics.response_timeouts,
        metrics.decode_errors,
        metrics.queue_evictions
    );
}

/// 时长参数：0 表示直到 Ctrl-C
pub fn duration_limit(seconds: f64) -> Option<Duration> {
    (seconds > 0.0).then(|| Duration::from_secs_f64(seconds))
}

/// 以固定频率执行 `tick`，直到 Ctrl-C、超出时长或 `tick` 返回 `Ok(false)`
pub fn run_for(
    running: &AtomicBool,
    limit: Option<Duration>,
    rate_hz: f64,
    mut tick: impl FnMut() -> Result<bool>,
) -> Result<()> {
    if !rate_hz.is_finite() || rate_hz <= 0.0 {
        bail!("频率必须为正数，当前为 {}", rate_hz);
    }
    let period = Duration::from_secs_f64(1.0 / rate_hz);
    let start = Instant::now();
    let mut next = start + period;

    while running.load(Ordering::SeqCst) {
        if limit.is_some_and(|limit| start.elapsed() >= limit) {
            println!("\n⏱️  达到时长限制");
            break;
        }
        if !tick()? {
            break;
        }
        let now = Instant::now();
        if next > now {
            thread::sleep(next - now);
        }
        next += period;
        if next < Instant::now() {
            next = Instant::now() + period;
        }
    }
    Ok(())
}

/// 单行遥测摘要
pub fn format_telemetry(t: &Telemetry) -> String {
    format!(
        "speed={:>9.2} rpm  current={:>8.2} mA  accel={:>8.2}  temp={:>3} °C  status=0x{:02X}  cmd=0x{:02X}",
        t.speed_rpm, t.current_ma, t.acceleration, t.temperature_c, t.motor_status, t.last_command
    )
}
