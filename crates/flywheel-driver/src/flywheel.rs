//! 控制 API
//!
//! 对外的 [`Flywheel`] 结构体：管理连接生命周期、两个工作线程，并提供设定值与遥测读取接口。

use crate::config::FlywheelConfig;
use crate::error::{ConnectionError, CommunicationError, DriverError};
use crate::hooks::{CallbackDispatcher, TelemetryCallback};
use crate::metrics::MetricsSnapshot;
use crate::pipeline::{Link, PipelineConfig, comm_loop, poll_loop};
use crate::recording::save_telemetry_json;
use crate::shutdown::ShutdownSignal;
use crate::state::{ConnectionState, FlywheelContext};
use flywheel_protocol::{Command, ControlMode, FrameCodec, Telemetry};
use flywheel_serial::SerialAdapter;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

const COMM_THREAD_NAME: &str = "flywheel-comm";
const POLL_THREAD_NAME: &str = "flywheel-poll";

/// 线程退出的额外宽限时间（在一个通信周期 + 响应超时之外）
const JOIN_GRACE: Duration = Duration::from_secs(2);

/// Extension trait for timeout-capable thread joins
trait JoinTimeout {
    fn join_timeout(self, timeout: Duration) -> thread::Result<()>;
}

impl<T: Send + 'static> JoinTimeout for JoinHandle<T> {
    fn join_timeout(self, timeout: Duration) -> thread::Result<()> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        thread::spawn(move || {
            let _ = tx.send(self.join().map(|_| ()));
        });
        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => Err(Box::new(
                std::io::Error::new(std::io::ErrorKind::TimedOut, "Thread join timeout"),
            )),
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => Err(Box::new(
                std::io::Error::new(std::io::ErrorKind::ConnectionReset, "Join watchdog lost"),
            )),
        }
    }
}

/// 运行期间的工作线程
#[derive(Default)]
struct Workers {
    shutdown: Option<ShutdownSignal>,
    comm: Option<JoinHandle<()>>,
    poll: Option<JoinHandle<()>>,
}

/// 反作用飞轮控制器
///
/// 所有方法都只需要 `&self`，可以放进 `Arc` 在多个线程间共享；
/// 生命周期操作（connect / start / stop / disconnect）由内部锁串行化。
///
/// ```rust,no_run
/// use flywheel_driver::FlywheelBuilder;
///
/// # fn main() -> Result<(), flywheel_driver::DriverError> {
/// let flywheel = FlywheelBuilder::new()
///     .port("/dev/ttyUSB0")
///     .baud_rate(115_200)
///     .auto_polling(true)
///     .build()?;
///
/// flywheel.connect()?;
/// flywheel.start()?;
/// flywheel.set_speed(1000.0)?;
///
/// if let Some(t) = flywheel.latest_telemetry() {
///     println!("{} rpm", t.speed_rpm);
/// }
///
/// flywheel.stop()?;
/// flywheel.disconnect()?;
/// # Ok(())
/// # }
/// ```
pub struct Flywheel {
    config: FlywheelConfig,
    pipeline: PipelineConfig,
    ctx: Arc<FlywheelContext>,
    link: Arc<Mutex<Link>>,
    workers: Mutex<Workers>,
    port: String,
    baud_rate: u32,
}

impl std::fmt::Debug for Flywheel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flywheel")
            .field("config", &self.config)
            .field("port", &self.port)
            .field("baud_rate", &self.baud_rate)
            .finish_non_exhaustive()
    }
}

impl Flywheel {
    /// 用给定的传输和编解码器创建控制器（不打开端口）
    pub fn new(
        config: FlywheelConfig,
        transport: Box<dyn SerialAdapter>,
        codec: Box<dyn FrameCodec>,
        callback: Option<Arc<dyn TelemetryCallback>>,
    ) -> Result<Self, DriverError> {
        config.validate()?;
        let port = transport.port_name().to_string();
        let baud_rate = transport.baud_rate();
        let ctx = Arc::new(FlywheelContext::new(
            config.queue_size,
            config.max_telemetry_size,
            CallbackDispatcher::new(callback),
        ));
        Ok(Self {
            pipeline: PipelineConfig::from(&config),
            config,
            ctx,
            link: Arc::new(Mutex::new(Link::new(transport, codec))),
            workers: Mutex::new(Workers::default()),
            port,
            baud_rate,
        })
    }

    // ==================== 生命周期 ====================

    /// 打开串口：Disconnected → Connected
    ///
    /// 已连接时记录警告并返回 `Ok(())`。打开失败时状态不变。
    pub fn connect(&self) -> Result<(), DriverError> {
        let _workers = self.workers.lock();
        let state = self.ctx.connection_state();
        if state.is_connected() {
            warn!("connect() called while {}, ignoring", state);
            return Ok(());
        }

        let mut link = self.link.lock();
        link.transport.open().map_err(|source| ConnectionError::Open {
            port: self.port.clone(),
            source,
        })?;
        link.codec.reset();
        drop(link);

        // 新会话：第一帧遥测的 previous 为 None
        self.ctx.store.clear();
        self.ctx.control_mode.set(None, Ordering::Release);
        self.ctx.link_alive.store(true, Ordering::Release);
        self.ctx
            .connection
            .set(ConnectionState::Connected, Ordering::Release);
        info!("Connected to {} at {} baud", self.port, self.baud_rate);
        Ok(())
    }

    /// 断开：任意状态 → Disconnected
    ///
    /// 运行中会先停止工作线程；命令队列被清空。关闭失败时返回错误，状态保持不变
    /// （若之前在运行，此时已是 Stopped）。
    pub fn disconnect(&self) -> Result<(), DriverError> {
        let mut workers = self.workers.lock();
        let state = self.ctx.connection_state();
        if state == ConnectionState::Disconnected {
            debug!("disconnect() called while already disconnected");
            return Ok(());
        }
        if state == ConnectionState::Running {
            self.stop_workers(&mut workers);
            self.ctx
                .connection
                .set(ConnectionState::Stopped, Ordering::Release);
        }

        let mut link = self.link.lock();
        link.transport
            .close()
            .map_err(|source| ConnectionError::Close {
                port: self.port.clone(),
                source,
            })?;
        link.codec.reset();
        drop(link);

        let dropped = self.ctx.queue.clear();
        if dropped > 0 {
            debug!("Discarded {} queued command(s) on disconnect", dropped);
        }
        self.ctx.link_alive.store(false, Ordering::Release);
        self.ctx
            .connection
            .set(ConnectionState::Disconnected, Ordering::Release);
        info!("Disconnected from {}", self.port);
        Ok(())
    }

    /// 启动工作线程：Connected | Stopped → Running
    pub fn start(&self) -> Result<(), DriverError> {
        let mut workers = self.workers.lock();
        let state = self.ctx.connection_state();
        if !matches!(state, ConnectionState::Connected | ConnectionState::Stopped) {
            return Err(DriverError::state("start", state));
        }

        let shutdown = ShutdownSignal::new();
        self.ctx
            .connection
            .set(ConnectionState::Running, Ordering::Release);

        let comm = {
            let link = self.link.clone();
            let ctx = self.ctx.clone();
            let config = self.pipeline.clone();
            let signal = shutdown.clone();
            thread::Builder::new()
                .name(COMM_THREAD_NAME.to_string())
                .spawn(move || comm_loop(link, ctx, config, signal))
        };
        let comm = match comm {
            Ok(handle) => handle,
            Err(e) => {
                self.ctx.connection.set(state, Ordering::Release);
                return Err(DriverError::ThreadSpawn(e.to_string()));
            },
        };

        let poll = if self.config.auto_polling {
            let ctx = self.ctx.clone();
            let period = self.pipeline.polling_period;
            let signal = shutdown.clone();
            let spawned = thread::Builder::new()
                .name(POLL_THREAD_NAME.to_string())
                .spawn(move || poll_loop(ctx, period, signal));
            match spawned {
                Ok(handle) => Some(handle),
                Err(e) => {
                    shutdown.trigger();
                    if comm.join().is_err() {
                        error!("Comm thread panicked during aborted start");
                    }
                    self.ctx.connection.set(state, Ordering::Release);
                    return Err(DriverError::ThreadSpawn(e.to_string()));
                },
            }
        } else {
            None
        };

        workers.shutdown = Some(shutdown);
        workers.comm = Some(comm);
        workers.poll = poll;
        info!(
            "Started: comm {:.1} Hz, polling {}",
            self.config.communication_frequency_hz,
            if self.config.auto_polling {
                format!("{:.1} Hz", self.config.polling_frequency_hz)
            } else {
                "off".to_string()
            }
        );
        Ok(())
    }

    /// 停止工作线程：Running → Stopped；其它状态下为空操作
    ///
    /// 在一个通信周期（加上正在进行的响应等待）内返回。
    pub fn stop(&self) -> Result<(), DriverError> {
        let mut workers = self.workers.lock();
        let state = self.ctx.connection_state();
        if state != ConnectionState::Running {
            debug!("stop() called while {}, ignoring", state);
            return Ok(());
        }
        self.ctx
            .connection
            .set(ConnectionState::Stopped, Ordering::Release);
        self.stop_workers(&mut workers);
        info!("Stopped");
        Ok(())
    }

    fn stop_workers(&self, workers: &mut Workers) {
        if let Some(shutdown) = workers.shutdown.take() {
            shutdown.trigger();
        }
        let timeout = self.pipeline.communication_period + self.pipeline.response_timeout + JOIN_GRACE;
        for (name, handle) in [
            (COMM_THREAD_NAME, workers.comm.take()),
            (POLL_THREAD_NAME, workers.poll.take()),
        ] {
            let Some(handle) = handle else {
                continue;
            };
            // 从回调内调用时当前线程就是通信线程，它会在本节拍结束后自行退出
            if handle.thread().id() == thread::current().id() {
                debug!("{} thread stopping itself, not joining", name);
                continue;
            }
            if handle.join_timeout(timeout).is_err() {
                error!("{} thread panicked or failed to shut down within {:?}", name, timeout);
            }
        }
    }

    // ==================== 命令 ====================

    fn ensure_connected(&self, operation: &'static str) -> Result<(), DriverError> {
        let state = self.ctx.connection_state();
        if state == ConnectionState::Disconnected {
            return Err(DriverError::state(operation, state));
        }
        Ok(())
    }

    fn submit_setpoint(
        &self,
        operation: &'static str,
        mode: ControlMode,
        value: f32,
    ) -> Result<(), DriverError> {
        self.ensure_connected(operation)?;
        self.config.limits.check(mode, value)?;
        let command = Command::for_mode(mode, value);
        self.ctx.enqueue(command);
        debug!("Queued '{}'", command);
        Ok(())
    }

    /// 转速设定值（rpm）；隐式切换到转速模式
    pub fn set_speed(&self, rpm: f32) -> Result<(), DriverError> {
        self.submit_setpoint("set speed", ControlMode::Speed, rpm)
    }

    /// 力矩设定值（mNm）；隐式切换到力矩模式
    pub fn set_torque(&self, mnm: f32) -> Result<(), DriverError> {
        self.submit_setpoint("set torque", ControlMode::Torque, mnm)
    }

    /// 电流设定值（mA）；隐式切换到电流模式
    pub fn set_current(&self, ma: f32) -> Result<(), DriverError> {
        self.submit_setpoint("set current", ControlMode::Current, ma)
    }

    /// 切换模式（以该模式的零设定值下发）
    pub fn switch_mode(&self, mode: ControlMode) -> Result<(), DriverError> {
        self.ensure_connected("switch mode")?;
        self.ctx.enqueue(Command::mode_switch(mode));
        debug!("Queued mode switch to {}", mode);
        Ok(())
    }

    /// 手动请求一次遥测
    pub fn poll_telemetry(&self) -> Result<(), DriverError> {
        self.ensure_connected("poll telemetry")?;
        self.ctx.enqueue(Command::poll());
        Ok(())
    }

    /// 附加一个遥测钩子（在用户回调之后调用）
    pub fn add_hook(&self, hook: Arc<dyn TelemetryCallback>) {
        self.ctx.dispatcher.add_hook(hook);
    }

    // ==================== 读取 ====================

    pub fn state(&self) -> ConnectionState {
        self.ctx.connection_state()
    }

    /// 设备最近一次确认的控制模式；尚未收到应答时为 `None`
    pub fn control_mode(&self) -> Option<ControlMode> {
        self.ctx.control_mode.get(Ordering::Acquire)
    }

    pub fn latest_telemetry(&self) -> Option<Arc<Telemetry>> {
        self.ctx.store.current()
    }

    pub fn previous_telemetry(&self) -> Option<Arc<Telemetry>> {
        self.ctx.store.previous()
    }

    pub fn telemetry_history(&self) -> Vec<Arc<Telemetry>> {
        self.ctx.store.history()
    }

    pub fn queue_len(&self) -> usize {
        self.ctx.queue.len()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.ctx.metrics.snapshot()
    }

    pub fn last_communication_error(&self) -> Option<CommunicationError> {
        self.ctx.last_error.load_full().map(|e| (*e).clone())
    }

    /// 运行中、传输可用，且最近一次有效响应不早于最近一次通信错误
    pub fn is_healthy(&self) -> bool {
        self.state().is_running()
            && self.ctx.link_alive.load(Ordering::Acquire)
            && self.ctx.responses_outpace_errors()
    }

    pub fn config(&self) -> &FlywheelConfig {
        &self.config
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    /// 把当前遥测历史窗口写成 JSON 数组
    pub fn save_telemetry(&self, path: impl AsRef<Path>) -> Result<(), DriverError> {
        save_telemetry_json(path, &self.ctx.store.snapshot())
    }
}

impl Drop for Flywheel {
    fn drop(&mut self) {
        let mut workers = std::mem::take(self.workers.get_mut());
        self.stop_workers(&mut workers);

        if self.ctx.connection_state().is_connected() {
            if let Err(e) = self.link.lock().transport.close() {
                error!("Failed to close {} on drop: {}", self.port, e);
            }
            self.ctx
                .connection
                .set(ConnectionState::Disconnected, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flywheel_protocol::FlywheelCodec;
    use flywheel_serial::{MockHandle, MockSerialAdapter};

    fn mock_flywheel(config: FlywheelConfig) -> (Flywheel, MockHandle) {
        let (adapter, handle) = MockSerialAdapter::with_simulator("mock0", 115_200);
        let flywheel =
            Flywheel::new(config, Box::new(adapter), Box::new(FlywheelCodec::new()), None)
                .unwrap();
        (flywheel, handle)
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let (adapter, _) = MockSerialAdapter::new("mock0", 9600);
        let mut config = FlywheelConfig::new("mock0", 9600);
        config.queue_size = 0;
        let result = Flywheel::new(config, Box::new(adapter), Box::new(FlywheelCodec::new()), None);
        assert!(matches!(result, Err(DriverError::InvalidConfig(_))));
    }

    #[test]
    fn test_initial_state() {
        let (flywheel, handle) = mock_flywheel(FlywheelConfig::new("mock0", 115_200));
        assert_eq!(flywheel.state(), ConnectionState::Disconnected);
        assert_eq!(flywheel.control_mode(), None);
        assert_eq!(flywheel.port(), "mock0");
        assert_eq!(flywheel.baud_rate(), 115_200);
        assert!(!flywheel.is_healthy());
        assert!(!handle.is_open());
    }

    #[test]
    fn test_connect_is_idempotent() {
        let (flywheel, handle) = mock_flywheel(FlywheelConfig::new("mock0", 115_200));
        flywheel.connect().unwrap();
        flywheel.connect().unwrap();
        assert_eq!(flywheel.state(), ConnectionState::Connected);
        assert_eq!(handle.open_count(), 1);
    }

    #[test]
    fn test_connect_failure_leaves_state() {
        let (flywheel, handle) = mock_flywheel(FlywheelConfig::new("mock0", 115_200));
        handle.fail_next_open("permission denied");
        let err = flywheel.connect().unwrap_err();
        assert!(matches!(err, DriverError::Connection(ConnectionError::Open { .. })));
        assert_eq!(flywheel.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_start_requires_connection() {
        let (flywheel, _handle) = mock_flywheel(FlywheelConfig::new("mock0", 115_200));
        let err = flywheel.start().unwrap_err();
        assert!(matches!(
            err,
            DriverError::State {
                operation: "start",
                state: ConnectionState::Disconnected
            }
        ));
    }

    #[test]
    fn test_start_twice_is_state_error() {
        let (flywheel, _handle) = mock_flywheel(FlywheelConfig::new("mock0", 115_200));
        flywheel.connect().unwrap();
        flywheel.start().unwrap();
        assert!(matches!(
            flywheel.start(),
            Err(DriverError::State {
                state: ConnectionState::Running,
                ..
            })
        ));
        flywheel.stop().unwrap();
    }

    #[test]
    fn test_stop_is_noop_when_not_running() {
        let (flywheel, _handle) = mock_flywheel(FlywheelConfig::new("mock0", 115_200));
        flywheel.stop().unwrap();
        assert_eq!(flywheel.state(), ConnectionState::Disconnected);
        flywheel.connect().unwrap();
        flywheel.stop().unwrap();
        assert_eq!(flywheel.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_setpoint_validation() {
        let (flywheel, _handle) = mock_flywheel(FlywheelConfig::new("mock0", 115_200));
        flywheel.connect().unwrap();
        assert!(matches!(
            flywheel.set_speed(f32::NAN),
            Err(DriverError::Validation(_))
        ));
        assert!(matches!(
            flywheel.set_torque(60.0),
            Err(DriverError::Validation(_))
        ));
        assert_eq!(flywheel.queue_len(), 0);
        flywheel.set_current(-1500.0).unwrap();
        assert_eq!(flywheel.queue_len(), 1);
    }

    #[test]
    fn test_disconnect_close_failure() {
        let (flywheel, handle) = mock_flywheel(FlywheelConfig::new("mock0", 115_200));
        flywheel.connect().unwrap();
        handle.set_fail_close(true);
        let err = flywheel.disconnect().unwrap_err();
        assert!(matches!(err, DriverError::Connection(ConnectionError::Close { .. })));
        assert_eq!(flywheel.state(), ConnectionState::Connected);

        handle.set_fail_close(false);
        flywheel.disconnect().unwrap();
        assert_eq!(flywheel.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_drop_closes_transport() {
        let (flywheel, handle) = mock_flywheel(FlywheelConfig::new("mock0", 115_200));
        flywheel.connect().unwrap();
        flywheel.start().unwrap();
        drop(flywheel);
        assert!(!handle.is_open());
        assert_eq!(handle.close_count(), 1);
    }
}
