//! 工作线程循环
//!
//! - [`poll_loop`]：按轮询频率向命令队列推入轮询命令，不做任何 I/O
//! - [`comm_loop`]：按通信频率从队列取一条命令，写出、等待响应、更新遥测并分发回调
//!
//! 两个循环只通过 [`FlywheelContext`] 中的命令队列和同一个 [`ShutdownSignal`] 协作。

use crate::config::FlywheelConfig;
use crate::error::CommunicationError;
use crate::shutdown::{ShutdownSignal, Ticker};
use crate::state::FlywheelContext;
use flywheel_protocol::{Command, DecodedFrame, FrameCodec};
use flywheel_serial::{SerialAdapter, SerialError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Pipeline 配置
///
/// ```
/// use flywheel_driver::{FlywheelConfig, PipelineConfig};
/// use std::time::Duration;
///
/// let config = PipelineConfig::from(&FlywheelConfig::new("/dev/ttyUSB0", 115_200));
/// assert_eq!(config.communication_period, Duration::from_millis(5));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub communication_period: Duration,
    pub polling_period: Duration,
    /// 写出命令后等待响应的最长时间
    pub response_timeout: Duration,
    /// 单次串口读取的最大字节数
    pub read_chunk_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from(&FlywheelConfig::default())
    }
}

impl From<&FlywheelConfig> for PipelineConfig {
    fn from(config: &FlywheelConfig) -> Self {
        Self {
            communication_period: config.communication_period(),
            polling_period: config.polling_period(),
            response_timeout: config.response_timeout(),
            read_chunk_size: config.read_chunk_size.max(1),
        }
    }
}

/// 串口 + 编解码器
///
/// 运行期间由通信线程独占使用；停止后由控制器负责关闭。
pub struct Link {
    pub transport: Box<dyn SerialAdapter>,
    pub codec: Box<dyn FrameCodec>,
}

impl Link {
    pub fn new(transport: Box<dyn SerialAdapter>, codec: Box<dyn FrameCodec>) -> Self {
        Self { transport, codec }
    }
}

/// 单个通信节拍的失败
enum TickError {
    /// 记录后继续运行
    Communication(CommunicationError),
    /// 设备不可用，通信线程退出
    Fatal(CommunicationError),
}

/// 轮询循环
///
/// 仅在 Running 状态下生效；队列溢出由队列的丢弃最旧策略吸收。
pub fn poll_loop(ctx: Arc<FlywheelContext>, period: Duration, shutdown: ShutdownSignal) {
    let mut ticker = Ticker::new(period);
    while ticker.wait(&shutdown) {
        if !ctx.connection_state().is_running() {
            continue;
        }
        ctx.enqueue(Command::poll());
        trace!("Poll thread: poll enqueued (queue len {})", ctx.queue.len());
    }
    trace!("Poll thread: loop exited");
}

/// 通信循环
///
/// 每个节拍至多处理一条命令。超时与无效帧只记录，不影响后续节拍；
/// 致命的传输错误（设备消失）时记录 `error!` 并退出，连接状态保持不变，
/// 由调用方决定 stop / disconnect。
pub fn comm_loop(
    link: Arc<Mutex<Link>>,
    ctx: Arc<FlywheelContext>,
    config: PipelineConfig,
    shutdown: ShutdownSignal,
) {
    let mut ticker = Ticker::new(config.communication_period);
    let mut chunk = vec![0u8; config.read_chunk_size.max(1)];

    while ticker.wait(&shutdown) {
        if !ctx.connection_state().is_running() {
            continue;
        }
        let Some(command) = ctx.queue.try_pop() else {
            ctx.metrics.idle_ticks.fetch_add(1, Ordering::Relaxed);
            continue;
        };

        // 回调可能重入控制 API（stop / disconnect），分发前必须释放串口锁
        let outcome = {
            let mut link = link.lock();
            let outcome = transceive(&mut link, &command, &ctx, &config, &mut chunk);
            if matches!(outcome, Err(TickError::Communication(_))) {
                link.codec.reset();
                if let Err(clear_err) = link.transport.clear_input() {
                    debug!("Failed to clear serial input: {}", clear_err);
                }
            }
            outcome
        };
        match outcome {
            Ok(frame) => handle_frame(frame, &ctx),
            Err(TickError::Communication(e)) => {
                warn!("Communication error on '{}': {}", command, e);
                ctx.record_error(e);
            },
            Err(TickError::Fatal(e)) => {
                error!("Comm thread: fatal transport error, exiting: {}", e);
                ctx.record_error(e);
                ctx.link_alive.store(false, Ordering::Release);
                break;
            },
        }
    }

    trace!("Comm thread: loop exited");
}

/// 写出一条命令并等待一帧响应
fn transceive(
    link: &mut Link,
    command: &Command,
    ctx: &FlywheelContext,
    config: &PipelineConfig,
    chunk: &mut [u8],
) -> Result<DecodedFrame, TickError> {
    let bytes = link.codec.encode(command);
    if let Err(e) = link.transport.write_all(&bytes) {
        ctx.metrics.write_errors.fetch_add(1, Ordering::Relaxed);
        let fatal = e.is_fatal();
        let e = CommunicationError::Write(e.to_string());
        return Err(if fatal {
            TickError::Fatal(e)
        } else {
            TickError::Communication(e)
        });
    }
    ctx.metrics.commands_sent.fetch_add(1, Ordering::Relaxed);
    trace!("Comm thread: sent '{}'", command);

    let deadline = Instant::now() + config.response_timeout;
    loop {
        let now = Instant::now();
        if now >= deadline {
            ctx.metrics.response_timeouts.fetch_add(1, Ordering::Relaxed);
            return Err(TickError::Communication(CommunicationError::Timeout {
                timeout_ms: config.response_timeout.as_millis() as u64,
            }));
        }

        match link.transport.read_timeout(chunk, deadline - now) {
            Ok(n) => match link.codec.decode(&chunk[..n]) {
                Ok(Some(frame)) => return Ok(frame),
                Ok(None) => {},
                Err(e) => {
                    ctx.metrics.decode_errors.fetch_add(1, Ordering::Relaxed);
                    return Err(TickError::Communication(CommunicationError::Decode(e)));
                },
            },
            Err(SerialError::Timeout) => {},
            Err(e) if e.is_fatal() => {
                ctx.metrics.read_errors.fetch_add(1, Ordering::Relaxed);
                return Err(TickError::Fatal(CommunicationError::Read(e.to_string())));
            },
            Err(e) => {
                ctx.metrics.read_errors.fetch_add(1, Ordering::Relaxed);
                return Err(TickError::Communication(CommunicationError::Read(
                    e.to_string(),
                )));
            },
        }
    }
}

/// 处理一帧有效响应：更新控制模式、遥测存储，分发回调
fn handle_frame(frame: DecodedFrame, ctx: &FlywheelContext) {
    ctx.record_response();

    if let Some(mode) = frame.acknowledged_mode() {
        let previous = ctx.control_mode.swap(mode, Ordering::AcqRel);
        if previous != Some(mode) {
            info!("Control mode acknowledged: {}", mode);
        }
    }

    match frame {
        DecodedFrame::Telemetry(telemetry) => {
            ctx.metrics.telemetry_frames.fetch_add(1, Ordering::Relaxed);
            debug!(
                "Telemetry: speed={} rpm current={} mA temp={} C",
                telemetry.speed_rpm, telemetry.current_ma, telemetry.temperature_c
            );
            let pair = ctx.store.push(telemetry);
            let failures = ctx
                .dispatcher
                .dispatch(&pair.current, pair.previous.as_deref());
            if failures > 0 {
                ctx.metrics
                    .callback_errors
                    .fetch_add(failures as u64, Ordering::Relaxed);
            }
        },
        DecodedFrame::Ack { opcode, .. } => {
            ctx.metrics.acks_received.fetch_add(1, Ordering::Relaxed);
            debug!("Ack for opcode 0x{:02X}", opcode);
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{CallbackDispatcher, TelemetryCallback};
    use crate::state::ConnectionState;
    use crate::error::CallbackError;
    use flywheel_protocol::{ControlMode, FlywheelCodec, Telemetry, encode_command};
    use flywheel_serial::{MockHandle, MockSerialAdapter};
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    fn running_context(queue_size: usize) -> Arc<FlywheelContext> {
        let ctx = Arc::new(FlywheelContext::new(
            queue_size,
            16,
            CallbackDispatcher::default(),
        ));
        ctx.connection
            .set(ConnectionState::Running, Ordering::Release);
        ctx.link_alive.store(true, Ordering::Release);
        ctx
    }

    fn mock_link(simulated: bool) -> (Arc<Mutex<Link>>, MockHandle) {
        let (mut adapter, handle) = if simulated {
            MockSerialAdapter::with_simulator("mock0", 115_200)
        } else {
            MockSerialAdapter::new("mock0", 115_200)
        };
        adapter.open().unwrap();
        let link = Link::new(Box::new(adapter), Box::new(FlywheelCodec::new()));
        (Arc::new(Mutex::new(link)), handle)
    }

    fn fast_config() -> PipelineConfig {
        PipelineConfig {
            communication_period: Duration::from_millis(5),
            polling_period: Duration::from_millis(5),
            response_timeout: Duration::from_millis(3),
            read_chunk_size: 40,
        }
    }

    fn run_comm_for(
        link: Arc<Mutex<Link>>,
        ctx: Arc<FlywheelContext>,
        config: PipelineConfig,
        duration: Duration,
    ) {
        let shutdown = ShutdownSignal::new();
        let signal = shutdown.clone();
        let handle = thread::spawn(move || comm_loop(link, ctx, config, signal));
        thread::sleep(duration);
        shutdown.trigger();
        handle.join().unwrap();
    }

    #[test]
    fn test_pipeline_config_from_flywheel_config() {
        let mut config = FlywheelConfig::new("p", 9600);
        config.communication_frequency_hz = 50.0;
        config.read_chunk_size = 64;
        let pipeline = PipelineConfig::from(&config);
        assert_eq!(pipeline.communication_period, Duration::from_millis(20));
        assert_eq!(pipeline.response_timeout, Duration::from_millis(20));
        assert_eq!(pipeline.read_chunk_size, 64);
    }

    #[test]
    fn test_poll_loop_only_enqueues_while_running() {
        let ctx = running_context(100);
        ctx.connection
            .set(ConnectionState::Stopped, Ordering::Release);
        let shutdown = ShutdownSignal::new();
        let signal = shutdown.clone();
        let ctx_clone = ctx.clone();
        let handle =
            thread::spawn(move || poll_loop(ctx_clone, Duration::from_millis(2), signal));

        thread::sleep(Duration::from_millis(30));
        assert_eq!(ctx.queue.len(), 0);

        ctx.connection
            .set(ConnectionState::Running, Ordering::Release);
        thread::sleep(Duration::from_millis(30));
        shutdown.trigger();
        handle.join().unwrap();

        assert!(ctx.queue.len() >= 3);
        assert!(ctx.queue.try_pop().unwrap().is_poll());
    }

    #[test]
    fn test_comm_loop_poll_updates_store_and_dispatches() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = calls.clone();
        let ctx = Arc::new(FlywheelContext::new(
            10,
            16,
            CallbackDispatcher::new(Some(Arc::new(
                move |c: &Telemetry, p: Option<&Telemetry>| {
                    sink.lock().push((c.control_target, p.map(|p| p.control_target)));
                },
            ))),
        ));
        ctx.connection
            .set(ConnectionState::Running, Ordering::Release);

        let (link, handle) = mock_link(true);
        ctx.enqueue(Command::set_speed(1200.0));
        ctx.enqueue(Command::poll());
        ctx.enqueue(Command::poll());

        run_comm_for(link, ctx.clone(), fast_config(), Duration::from_millis(60));

        assert_eq!(handle.written_count(), 3);
        assert_eq!(ctx.control_mode.get(Ordering::Acquire), Some(ControlMode::Speed));
        assert_eq!(ctx.store.current().map(|t| t.speed_rpm), Some(1200.0));
        assert!(ctx.store.previous().is_some());
        assert_eq!(*calls.lock(), vec![(1200.0, None), (1200.0, Some(1200.0))]);

        let metrics = ctx.metrics.snapshot();
        assert_eq!(metrics.commands_sent, 3);
        assert_eq!(metrics.acks_received, 1);
        assert_eq!(metrics.telemetry_frames, 2);
        assert!(metrics.idle_ticks > 0);
    }

    #[test]
    fn test_comm_loop_timeout_is_recorded_and_loop_continues() {
        let ctx = running_context(10);
        let (link, handle) = mock_link(false);
        ctx.enqueue(Command::poll());
        ctx.enqueue(Command::poll());

        run_comm_for(link, ctx.clone(), fast_config(), Duration::from_millis(60));

        assert_eq!(handle.written_count(), 2);
        assert!(ctx.store.current().is_none());
        assert_eq!(ctx.metrics.snapshot().response_timeouts, 2);
        assert!(matches!(
            ctx.last_error.load_full().as_deref(),
            Some(CommunicationError::Timeout { .. })
        ));
        assert_eq!(ctx.connection_state(), ConnectionState::Running);
    }

    #[test]
    fn test_comm_loop_malformed_frame_leaves_store_untouched() {
        let ctx = running_context(10);
        let (link, handle) = mock_link(false);
        let good = Telemetry {
            speed_rpm: 42.0,
            ..Default::default()
        }
        .to_frame();
        let mut bad = good;
        bad[31] ^= 0x5A;

        let mut responses = vec![good.to_vec(), bad.to_vec()].into_iter();
        handle.set_responder(move |_| responses.next());
        ctx.enqueue(Command::poll());
        ctx.enqueue(Command::poll());

        run_comm_for(link, ctx.clone(), fast_config(), Duration::from_millis(60));

        assert_eq!(ctx.store.current().map(|t| t.speed_rpm), Some(42.0));
        assert!(ctx.store.previous().is_none());
        assert_eq!(ctx.metrics.snapshot().decode_errors, 1);
        assert!(matches!(
            ctx.last_error.load_full().as_deref(),
            Some(CommunicationError::Decode(_))
        ));
    }

    #[test]
    fn test_comm_loop_exits_on_fatal_error() {
        let ctx = running_context(10);
        let (link, handle) = mock_link(false);
        handle.disconnect();
        ctx.enqueue(Command::poll());

        let shutdown = ShutdownSignal::new();
        let ctx_clone = ctx.clone();
        let config = fast_config();
        let worker = thread::spawn(move || comm_loop(link, ctx_clone, config, shutdown));

        // 不触发停止信号，线程应自行退出
        let start = Instant::now();
        while !worker.is_finished() && start.elapsed() < Duration::from_secs(2) {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(worker.is_finished());
        worker.join().unwrap();
        assert!(matches!(
            ctx.last_error.load_full().as_deref(),
            Some(CommunicationError::Write(_))
        ));
        assert!(!ctx.link_alive.load(Ordering::Acquire));
        assert_eq!(ctx.connection_state(), ConnectionState::Running);
    }

    struct Flaky {
        calls: AtomicUsize,
    }

    impl TelemetryCallback for Flaky {
        fn on_telemetry(&self, _: &Telemetry, _: Option<&Telemetry>) -> Result<(), CallbackError> {
            match self.calls.fetch_add(1, Ordering::SeqCst) {
                0 => panic!("callback blew up"),
                1 => Err(CallbackError::new("rejected")),
                _ => Ok(()),
            }
        }
    }

    #[test]
    fn test_comm_loop_keeps_decoding_after_callback_failures() {
        let flaky = Arc::new(Flaky {
            calls: AtomicUsize::new(0),
        });
        let ctx = Arc::new(FlywheelContext::new(
            10,
            16,
            CallbackDispatcher::new(Some(flaky.clone() as Arc<dyn TelemetryCallback>)),
        ));
        ctx.connection
            .set(ConnectionState::Running, Ordering::Release);

        let (link, handle) = mock_link(true);
        ctx.enqueue(Command::set_speed(300.0));
        for _ in 0..3 {
            ctx.enqueue(Command::poll());
        }

        run_comm_for(link, ctx.clone(), fast_config(), Duration::from_millis(80));

        assert_eq!(handle.written_count(), 4);
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
        let metrics = ctx.metrics.snapshot();
        assert_eq!(metrics.telemetry_frames, 3);
        assert_eq!(metrics.callback_errors, 2);
        assert_eq!(ctx.store.history().len(), 3);
        assert_eq!(ctx.store.current().map(|t| t.speed_rpm), Some(300.0));
        assert!(ctx.last_error.load_full().is_none());
    }

    #[test]
    fn test_comm_loop_transmits_in_fifo_order() {
        let ctx = running_context(10);
        let (link, handle) = mock_link(true);
        let commands = [
            Command::set_speed(100.0),
            Command::set_torque(-5.0),
            Command::poll(),
            Command::set_current(250.0),
            Command::mode_switch(ControlMode::Speed),
            Command::poll(),
        ];
        for command in commands {
            ctx.enqueue(command);
        }

        run_comm_for(link, ctx.clone(), fast_config(), Duration::from_millis(100));

        let expected: Vec<Vec<u8>> = commands.iter().map(|c| encode_command(c).to_vec()).collect();
        assert_eq!(handle.written(), expected);
        assert_eq!(ctx.queue.len(), 0);
    }
}
