//! 设定值命令
//!
//! 下发一次设定值（隐式切换模式），随后轮询一帧遥测确认

use anyhow::{Result, bail};
use clap::{Args, ValueEnum};
use flywheel_sdk::prelude::*;
use std::thread;
use std::time::{Duration, Instant};

use crate::session::{self, GlobalArgs};

/// 设定值类型
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetpointKind {
    /// 转速（rpm）
    Speed,
    /// 力矩（mNm）
    Torque,
    /// 电流（mA）
    Current,
}

impl From<SetpointKind> for ControlMode {
    fn from(kind: SetpointKind) -> Self {
        match kind {
            SetpointKind::Speed => ControlMode::Speed,
            SetpointKind::Torque => ControlMode::Torque,
            SetpointKind::Current => ControlMode::Current,
        }
    }
}

/// 设定值命令参数
#[derive(Args, Debug)]
pub struct SetCommand {
    /// 设定值类型
    #[arg(value_enum)]
    pub kind: SetpointKind,

    /// 设定值
    #[arg(allow_negative_numbers = true)]
    pub value: f32,

    /// 等待遥测确认的时间（毫秒）
    #[arg(long, default_value_t = 500)]
    pub wait_ms: u64,
}

impl SetCommand {
    pub fn execute(&self, global: &GlobalArgs) -> Result<()> {
        let mut config = global.resolve()?;
        config.auto_polling = false;
        // 先在本地校验，避免无谓地打开串口
        config.limits.check(self.kind.into(), self.value)?;

        let flywheel = session::open(FlywheelBuilder::new().config(config))?;
        let result = self.apply(&flywheel);
        session::close(&flywheel);
        result
    }

    fn apply(&self, flywheel: &Flywheel) -> Result<()> {
        match self.kind {
            SetpointKind::Speed => flywheel.set_speed(self.value)?,
            SetpointKind::Torque => flywheel.set_torque(self.value)?,
            SetpointKind::Current => flywheel.set_current(self.value)?,
        }
        flywheel.poll_telemetry()?;
        let mode = ControlMode::from(self.kind);
        println!("📤 已下发 {} = {} {}", mode, self.value, mode.unit());

        let deadline = Instant::now() + Duration::from_millis(self.wait_ms);
        while Instant::now() < deadline {
            if let Some(t) = flywheel.latest_telemetry() {
                println!("📥 {}", session::format_telemetry(&t));
                if flywheel.control_mode() != Some(mode) {
                    println!("⚠️  设备尚未确认 {} 模式", mode);
                }
                return Ok(());
            }
            thread::sleep(Duration::from_millis(5));
        }

        match flywheel.last_communication_error() {
            Some(e) => bail!("未收到遥测: {}", e),
            None => bail!("{} ms 内未收到遥测", self.wait_ms),
        }
    }
}
