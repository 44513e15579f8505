//! 录制命令
//!
//! 开启自动轮询，把每一帧遥测经录制钩子收集后写成 JSON 数组

use anyhow::Result;
use clap::Args;
use flywheel_sdk::driver::recording::{DEFAULT_RECORDING_CAPACITY, drain, save_telemetry_json};
use flywheel_sdk::prelude::*;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::Ordering;

use crate::session::{self, GlobalArgs};

/// 录制命令参数
#[derive(Args, Debug)]
pub struct RecordCommand {
    /// 输出文件路径（JSON）
    #[arg(short, long)]
    pub output: PathBuf,

    /// 录制时长（秒），0 表示直到 Ctrl-C
    #[arg(short, long, default_value_t = 0.0)]
    pub duration: f64,

    /// 设备轮询频率（Hz，缺省取配置）
    #[arg(long)]
    pub poll_rate: Option<f64>,

    /// 录制缓冲容量（帧），满时丢帧
    #[arg(long, default_value_t = DEFAULT_RECORDING_CAPACITY)]
    pub capacity: usize,
}

impl RecordCommand {
    /// 执行录制
    pub fn execute(&self, global: &GlobalArgs) -> Result<()> {
        let mut config = global.resolve()?;
        config.auto_polling = true;
        if let Some(rate) = self.poll_rate {
            config.polling_frequency_hz = rate;
        }

        let (recorder, rx) = TelemetryRecorder::new(self.capacity);
        let dropped = recorder.dropped_frames().clone();
        let recorded = recorder.frame_counter().clone();

        let running = session::interrupt_flag()?;
        let flywheel = session::open(FlywheelBuilder::new().config(config).callback(recorder))?;
        println!("🔴 录制中（Ctrl-C 结束）");

        let result = session::run_for(&running, session::duration_limit(self.duration), 2.0, || {
            print!("\r录制中: {} 帧", recorded.load(Ordering::Relaxed));
            std::io::stdout().flush().ok();
            Ok(true)
        });
        session::close(&flywheel);
        result?;

        let frames = drain(&rx);
        println!("\n✅ 录制完成: {} 帧", frames.len());
        let dropped = dropped.load(Ordering::Relaxed);
        if dropped > 0 {
            println!("⚠️  缓冲区满，丢弃 {} 帧", dropped);
        }

        println!("💾 保存到: {}", self.output.display());
        save_telemetry_json(&self.output, &frames)?;
        println!("✅ 保存完成");
        Ok(())
    }
}
