//! 转速曲线命令
//!
//! 按固定频率依次下发转速曲线中的值，曲线用完后保持最后一个值；
//! 同时把每帧遥测序列化为一行 JSON，经 UDP 转发给故障检测等外部程序。
//!
//! 曲线文件为纯文本，每行一个转速（rpm），空行和 `#` 开头的行被忽略。

use anyhow::{Context, Result, bail};
use clap::Args;
use crossbeam_channel::Receiver;
use flywheel_sdk::prelude::*;
use std::fs;
use std::net::{SocketAddr, UdpSocket};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

use crate::session::{self, GlobalArgs};

/// 转速曲线命令参数
#[derive(Args, Debug)]
pub struct ProfileCommand {
    /// 曲线文件路径
    pub file: PathBuf,

    /// 下发频率（Hz）
    #[arg(short, long, default_value_t = 100.0)]
    pub rate: f64,

    /// 遥测转发地址
    #[arg(short, long, default_value = "127.0.0.1:5005")]
    pub udp: SocketAddr,

    /// 不转发遥测
    #[arg(long)]
    pub no_udp: bool,

    /// 运行时长（秒），0 表示直到 Ctrl-C
    #[arg(short, long, default_value_t = 0.0)]
    pub duration: f64,
}

/// 读取转速曲线，非有限值被跳过
pub fn load_profile(path: &Path) -> Result<Vec<f32>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("读取曲线文件失败: {}", path.display()))?;

    let mut speeds = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let value: f32 = line
            .parse()
            .with_context(|| format!("{}:{}: 无效的转速 `{}`", path.display(), index + 1, line))?;
        if value.is_finite() {
            speeds.push(value);
        } else {
            debug!("Skipping non-finite speed on line {}", index + 1);
        }
    }

    if speeds.is_empty() {
        bail!("{} 中没有有效的转速数据", path.display());
    }
    Ok(speeds)
}

/// 遥测 → UDP 转发线程；发送端（录制钩子）被释放后退出
fn spawn_forwarder(rx: Receiver<Telemetry>, target: SocketAddr) -> Result<JoinHandle<u64>> {
    let bind = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let socket = UdpSocket::bind(bind).context("绑定 UDP 套接字失败")?;

    let handle = thread::Builder::new()
        .name("flywheel-udp".to_string())
        .spawn(move || {
            let mut sent = 0u64;
            while let Ok(telemetry) = rx.recv() {
                let line = match serde_json::to_string(&telemetry) {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("Failed to serialize telemetry: {}", e);
                        continue;
                    },
                };
                match socket.send_to(line.as_bytes(), target) {
                    Ok(_) => sent += 1,
                    Err(e) => warn!("UDP send to {} failed: {}", target, e),
                }
            }
            sent
        })
        .context("启动 UDP 转发线程失败")?;
    Ok(handle)
}

impl ProfileCommand {
    pub fn execute(&self, global: &GlobalArgs) -> Result<()> {
        let speeds = load_profile(&self.file)?;
        let config = global.resolve()?;
        for speed in &speeds {
            config.limits.check(ControlMode::Speed, *speed)?;
        }
        info!(
            "Loaded {} speed points, last speed: {} rpm",
            speeds.len(),
            speeds[speeds.len() - 1]
        );

        let mut builder = FlywheelBuilder::new().config(config).auto_polling(true);
        let mut forwarder = None;
        if !self.no_udp {
            let (recorder, rx) = TelemetryRecorder::new(10_000);
            builder = builder.callback(recorder);
            forwarder = Some(spawn_forwarder(rx, self.udp)?);
            println!("📡 遥测转发到 udp://{}", self.udp);
        }

        let running = session::interrupt_flag()?;
        let flywheel = session::open(builder)?;

        let mut points = speeds.iter().copied();
        let mut holding = false;
        let mut current = speeds[0];
        let result = session::run_for(
            &running,
            session::duration_limit(self.duration),
            self.rate,
            || {
                if !holding {
                    match points.next() {
                        Some(speed) => current = speed,
                        None => {
                            holding = true;
                            println!("⏸️  曲线结束，保持 {} rpm", current);
                        },
                    }
                }
                flywheel.set_speed(current)?;
                Ok(true)
            },
        );

        session::close(&flywheel);
        // 释放录制钩子，转发线程随之退出
        drop(flywheel);
        if let Some(handle) = forwarder {
            match handle.join() {
                Ok(sent) => println!("📡 已转发 {} 帧遥测", sent),
                Err(_) => warn!("UDP forwarder thread panicked"),
            }
        }
        result
    }
}
