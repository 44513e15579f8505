//! 监控命令
//!
//! 开启自动轮询，按显示频率打印最新遥测

use anyhow::Result;
use clap::Args;
use flywheel_sdk::prelude::*;
use std::sync::Arc;

use crate::session::{self, GlobalArgs};

/// 监控命令参数
#[derive(Args, Debug)]
pub struct MonitorCommand {
    /// 设备轮询频率（Hz，缺省取配置）
    #[arg(long)]
    pub poll_rate: Option<f64>,

    /// 显示刷新频率（Hz）
    #[arg(short, long, default_value_t = 5.0)]
    pub frequency: f64,

    /// 监控时长（秒），0 表示直到 Ctrl-C
    #[arg(short, long, default_value_t = 0.0)]
    pub duration: f64,
}

impl MonitorCommand {
    pub fn execute(&self, global: &GlobalArgs) -> Result<()> {
        let mut config = global.resolve()?;
        config.auto_polling = true;
        if let Some(rate) = self.poll_rate {
            config.polling_frequency_hz = rate;
        }

        let running = session::interrupt_flag()?;
        let flywheel = session::open(FlywheelBuilder::new().config(config))?;
        println!("📈 监控中（Ctrl-C 退出）");

        let mut last: Option<Arc<Telemetry>> = None;
        let result = session::run_for(
            &running,
            session::duration_limit(self.duration),
            self.frequency,
            || {
                let latest = flywheel.latest_telemetry();
                let fresh = match (&latest, &last) {
                    (Some(now), Some(prev)) => !Arc::ptr_eq(now, prev),
                    (Some(_), None) => true,
                    _ => false,
                };
                if let Some(t) = latest.as_deref().filter(|_| fresh) {
                    let mode = flywheel
                        .control_mode()
                        .map_or_else(|| "-".to_string(), |m| m.to_string());
                    println!("[{:>7}] {}", mode, session::format_telemetry(t));
                } else if !flywheel.is_healthy()
                    && let Some(e) = flywheel.last_communication_error()
                {
                    println!("⚠️  {}", e);
                }
                last = latest;
                Ok(true)
            },
        );

        session::close(&flywheel);
        result
    }
}
