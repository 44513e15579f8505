//! 共享状态
//!
//! - `ConnectionState` 只由生命周期控制器（[`crate::Flywheel`]）写入
//! - 当前 `ControlMode` 只由通信线程在设备应答后写入
//! - [`FlywheelContext`] 汇集两个工作线程与控制 API 共享的全部状态

use crate::error::CommunicationError;
use crate::hooks::CallbackDispatcher;
use crate::metrics::DriverMetrics;
use crate::queue::{CommandQueue, PushOutcome};
use crate::telemetry_store::TelemetryStore;
use arc_swap::ArcSwapOption;
use flywheel_protocol::timestamp::monotonic_micros;
use flywheel_protocol::{Command, ControlMode};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use tracing::{debug, trace};

/// 连接状态
///
/// ```text
/// Disconnected --connect--> Connected --start--> Running --stop--> Stopped
///      ^                                            |                 |
///      +----------------- disconnect ---------------+-----------------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ConnectionState {
    #[default]
    Disconnected = 0,
    Connected = 1,
    Running = 2,
    Stopped = 3,
}

impl ConnectionState {
    /// 从 u8 转换，无效值视为 Disconnected
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connected,
            2 => Self::Running,
            3 => Self::Stopped,
            _ => Self::Disconnected,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// 传输是否处于打开状态
    pub fn is_connected(self) -> bool {
        self != Self::Disconnected
    }

    pub fn is_running(self) -> bool {
        self == Self::Running
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "Disconnected",
            Self::Connected => "Connected",
            Self::Running => "Running",
            Self::Stopped => "Stopped",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Default)]
pub struct AtomicConnectionState {
    inner: AtomicU8,
}

impl AtomicConnectionState {
    pub fn new(state: ConnectionState) -> Self {
        Self {
            inner: AtomicU8::new(state.as_u8()),
        }
    }

    pub fn get(&self, ordering: Ordering) -> ConnectionState {
        ConnectionState::from_u8(self.inner.load(ordering))
    }

    pub fn set(&self, state: ConnectionState, ordering: Ordering) {
        self.inner.store(state.as_u8(), ordering);
    }
}

/// 当前控制模式（0 表示尚未收到任何应答）
#[derive(Debug, Default)]
pub struct AtomicControlMode {
    inner: AtomicU8,
}

impl AtomicControlMode {
    const NONE: u8 = 0;

    pub fn new(mode: Option<ControlMode>) -> Self {
        Self {
            inner: AtomicU8::new(mode.map_or(Self::NONE, ControlMode::as_u8)),
        }
    }

    pub fn get(&self, ordering: Ordering) -> Option<ControlMode> {
        ControlMode::from_u8(self.inner.load(ordering))
    }

    pub fn set(&self, mode: Option<ControlMode>, ordering: Ordering) {
        self.inner
            .store(mode.map_or(Self::NONE, ControlMode::as_u8), ordering);
    }

    /// 写入新模式，返回之前的值
    pub fn swap(&self, mode: ControlMode, ordering: Ordering) -> Option<ControlMode> {
        ControlMode::from_u8(self.inner.swap(mode.as_u8(), ordering))
    }
}

/// 工作线程与控制 API 共享的上下文
pub struct FlywheelContext {
    pub queue: CommandQueue,
    pub store: TelemetryStore,
    pub dispatcher: CallbackDispatcher,
    pub metrics: DriverMetrics,
    pub connection: AtomicConnectionState,
    pub control_mode: AtomicControlMode,
    /// 最近一次通信错误
    pub last_error: ArcSwapOption<CommunicationError>,
    /// 最近一次有效响应的单调时间戳（微秒，0 表示从未收到）
    pub last_response_us: AtomicU64,
    /// 最近一次通信错误的单调时间戳（微秒，0 表示从未出错）
    pub last_error_us: AtomicU64,
    /// 通信线程是否仍持有可用的传输（致命错误后为 false）
    pub link_alive: AtomicBool,
}

impl FlywheelContext {
    pub fn new(
        queue_size: usize,
        max_telemetry_size: usize,
        dispatcher: CallbackDispatcher,
    ) -> Self {
        Self {
            queue: CommandQueue::new(queue_size),
            store: TelemetryStore::new(max_telemetry_size),
            dispatcher,
            metrics: DriverMetrics::new(),
            connection: AtomicConnectionState::default(),
            control_mode: AtomicControlMode::default(),
            last_error: ArcSwapOption::empty(),
            last_response_us: AtomicU64::new(0),
            last_error_us: AtomicU64::new(0),
            link_alive: AtomicBool::new(false),
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.get(Ordering::Acquire)
    }

    /// 入队并记录指标
    pub fn enqueue(&self, command: Command) -> PushOutcome {
        let outcome = self.queue.push(command);
        if command.is_poll() {
            self.metrics.polls_enqueued.fetch_add(1, Ordering::Relaxed);
        } else {
            self.metrics.commands_enqueued.fetch_add(1, Ordering::Relaxed);
        }
        if let PushOutcome::Evicted(old) = &outcome {
            self.metrics.queue_evictions.fetch_add(1, Ordering::Relaxed);
            if old.is_poll() {
                trace!("Command queue full, evicted oldest: {}", old);
            } else {
                debug!("Command queue full, evicted oldest: {}", old);
            }
        }
        outcome
    }

    pub fn record_response(&self) {
        self.last_response_us
            .store(monotonic_micros().max(1), Ordering::Relaxed);
    }

    pub fn record_error(&self, error: CommunicationError) {
        self.last_error_us
            .store(monotonic_micros().max(1), Ordering::Relaxed);
        self.last_error.store(Some(Arc::new(error)));
    }

    /// 最近一次有效响应晚于最近一次通信错误
    pub fn responses_outpace_errors(&self) -> bool {
        self.last_response_us.load(Ordering::Relaxed)
            >= self.last_error_us.load(Ordering::Relaxed)
    }
}
