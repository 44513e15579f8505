//! 命令定义和实现

pub mod config;
pub mod monitor;
pub mod profile;
pub mod record;
pub mod set;

pub use config::ConfigCommand;
pub use monitor::MonitorCommand;
pub use profile::ProfileCommand;
pub use record::RecordCommand;
pub use set::SetCommand;

use anyhow::Result;
use flywheel_sdk::serial::SerialPortAdapter;

/// 列出系统中可用的串口
pub fn list_ports() -> Result<()> {
    let ports = SerialPortAdapter::available_ports()?;
    if ports.is_empty() {
        println!("(未发现串口)");
    }
    for port in ports {
        println!("{}", port);
    }
    Ok(())
}
