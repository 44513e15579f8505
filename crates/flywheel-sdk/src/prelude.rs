//! Prelude - 常用类型的便捷导入
//!
//! ```rust
//! use flywheel_sdk::prelude::*;
//! ```

// 控制 API
pub use flywheel_driver::{Flywheel, FlywheelBuilder, FlywheelConfig, SetpointLimits};
// 状态与观测
pub use flywheel_driver::{ConnectionState, MetricsSnapshot, TelemetryCallback, TelemetryRecorder};
// 协议类型
pub use flywheel_protocol::{ControlMode, Telemetry};

// 错误类型
pub use flywheel_driver::{CallbackError, CommunicationError, DriverError};
pub use flywheel_protocol::ProtocolError;
pub use flywheel_serial::SerialError;
