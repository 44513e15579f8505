//! Flywheel SDK - 反作用飞轮串口控制 Rust SDK
//!
//! # 架构设计
//!
//! 本 SDK 采用分层架构，从底层到高层：
//!
//! - **协议层** (`protocol`): 命令 / 遥测类型与帧编解码
//! - **串口层** (`serial`): 传输抽象，内置 `serialport` 后端与 Mock 后端
//! - **驱动层** (`driver`): 命令队列、轮询 / 通信线程、遥测同步、控制 API
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use flywheel_sdk::prelude::*;
//!
//! # fn main() -> Result<(), DriverError> {
//! flywheel_sdk::init_logger();
//!
//! let flywheel = FlywheelBuilder::new()
//!     .port("/dev/ttyUSB0")
//!     .baud_rate(115_200)
//!     .auto_polling(true)
//!     .build()?;
//! flywheel.connect()?;
//! flywheel.start()?;
//! flywheel.set_speed(1500.0)?;
//! # Ok(())
//! # }
//! ```

pub mod prelude;

/// 协议层
pub mod protocol {
    pub use flywheel_protocol::*;
}

/// 串口层
pub mod serial {
    pub use flywheel_serial::*;
}

/// 驱动层
pub mod driver {
    pub use flywheel_driver::*;
}

pub use flywheel_driver::{
    ConnectionState, DriverError, Flywheel, FlywheelBuilder, FlywheelConfig, MetricsSnapshot,
    TelemetryCallback,
};
pub use flywheel_protocol::{Command, ControlMode, ProtocolError, Telemetry};
pub use flywheel_serial::{SerialAdapter, SerialError};

use tracing_subscriber::EnvFilter;

/// 初始化日志
///
/// 安装 `tracing-subscriber`（读取 `RUST_LOG`，缺省 `info`），并把 `log` crate 的记录
/// 转发到 tracing。重复调用是安全的，只有第一次生效。
pub fn init_logger() {
    init_logger_with_default("info");
}

/// 同 [`init_logger`]，但指定 `RUST_LOG` 未设置时的默认过滤规则
pub fn init_logger_with_default(default_filter: &str) {
    // 已有全局 logger 时忽略
    let _ = tracing_log::LogTracer::init();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
