//! 驱动层
//!
//! 在串口传输与帧编解码之上提供飞轮的运行时：
//! - 有界命令队列（满时丢弃最旧命令）
//! - 轮询线程与通信线程（固定频率节拍，可在一个周期内停止）
//! - 遥测同步（ArcSwap 无锁读取当前帧与上一帧，有界历史窗口）
//! - 回调与钩子（同步调用，错误与 panic 被隔离）
//! - 连接生命周期：Disconnected → Connected → Running → Stopped
//!
//! 大多数用户通过 [`FlywheelBuilder`] 构造 [`Flywheel`] 即可。

mod builder;
pub mod config;
mod error;
mod flywheel;
pub mod hooks;
pub mod metrics;
pub mod pipeline;
pub mod queue;
pub mod recording;
pub mod shutdown;
pub mod state;
pub mod telemetry_store;

pub use builder::FlywheelBuilder;
pub use config::{FlywheelConfig, SetpointLimits};
pub use error::{
    CallbackError, CommunicationError, ConnectionError, DriverError, ValidationError,
};
pub use flywheel::Flywheel;
pub use hooks::{CallbackDispatcher, TelemetryCallback};
pub use metrics::{DriverMetrics, MetricsSnapshot};
pub use pipeline::{Link, PipelineConfig, comm_loop, poll_loop};
pub use queue::{CommandQueue, PushOutcome};
pub use recording::{TelemetryRecorder, load_telemetry_json, save_telemetry_json};
pub use shutdown::{ShutdownSignal, Ticker};
pub use state::{ConnectionState, FlywheelContext};
pub use telemetry_store::{TelemetryPair, TelemetryStore};
