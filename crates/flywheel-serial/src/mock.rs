//! Mock 串口后端
//!
//! [`MockSerialAdapter`] 与一个 [`MockHandle`] 共享内部状态：适配器交给驱动，
//! 测试代码持有句柄，用来注入响应字节、查看写出的帧、模拟故障。
//!
//! ```rust
//! use flywheel_serial::{MockSerialAdapter, SerialAdapter};
//! use std::time::Duration;
//!
//! let (mut adapter, handle) = MockSerialAdapter::new("mock0", 115_200);
//! adapter.open().unwrap();
//! handle.push_response(&[0xEB, 0x90]);
//!
//! let mut buf = [0u8; 8];
//! let n = adapter.read_timeout(&mut buf, Duration::from_millis(10)).unwrap();
//! assert_eq!(&buf[..n], &[0xEB, 0x90]);
//! ```

use crate::{SerialAdapter, SerialError};
use flywheel_protocol::{
    COMMAND_FRAME_LEN, ControlMode, FRAME_HEADER, Opcode, Telemetry, response_checksum,
};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 写入回调：收到一次写出的字节，返回要放入接收缓冲区的响应
pub type Responder = Box<dyn FnMut(&[u8]) -> Option<Vec<u8>> + Send>;

#[derive(Default)]
struct MockState {
    open: bool,
    rx: VecDeque<u8>,
    written: Vec<Vec<u8>>,
    responder: Option<Responder>,
    open_error: Option<String>,
    fail_close: bool,
    fail_writes: bool,
    disconnected: bool,
    open_count: usize,
    close_count: usize,
}

struct Shared {
    state: Mutex<MockState>,
    data_ready: Condvar,
}

/// Mock 串口适配器
pub struct MockSerialAdapter {
    port_name: String,
    baud_rate: u32,
    shared: Arc<Shared>,
}

/// 测试侧句柄
#[derive(Clone)]
pub struct MockHandle {
    shared: Arc<Shared>,
}

impl MockSerialAdapter {
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> (Self, MockHandle) {
        let shared = Arc::new(Shared {
            state: Mutex::new(MockState::default()),
            data_ready: Condvar::new(),
        });
        let adapter = Self {
            port_name: port_name.into(),
            baud_rate,
            shared: shared.clone(),
        };
        (adapter, MockHandle { shared })
    }

    /// 创建一个由 [`DeviceSimulator`] 应答的适配器
    pub fn with_simulator(port_name: impl Into<String>, baud_rate: u32) -> (Self, MockHandle) {
        let (adapter, handle) = Self::new(port_name, baud_rate);
        let mut device = DeviceSimulator::new();
        handle.set_responder(move |bytes| device.respond(bytes));
        (adapter, handle)
    }
}

impl SerialAdapter for MockSerialAdapter {
    fn open(&mut self) -> Result<(), SerialError> {
        let mut state = self.shared.state.lock();
        if let Some(message) = state.open_error.take() {
            return Err(SerialError::Open {
                port: self.port_name.clone(),
                message,
            });
        }
        if !state.open {
            state.open = true;
            state.disconnected = false;
            state.open_count += 1;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), SerialError> {
        let mut state = self.shared.state.lock();
        if state.fail_close {
            return Err(SerialError::Io(std::io::Error::other("injected close failure")));
        }
        if state.open {
            state.open = false;
            state.close_count += 1;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.shared.state.lock().open
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), SerialError> {
        let mut state = self.shared.state.lock();
        if state.disconnected {
            return Err(SerialError::Disconnected);
        }
        if !state.open {
            return Err(SerialError::NotOpen);
        }
        if state.fail_writes {
            return Err(SerialError::Io(std::io::Error::other("injected write failure")));
        }
        state.written.push(bytes.to_vec());
        let response = state.responder.as_mut().and_then(|r| r(bytes));
        if let Some(response) = response {
            state.rx.extend(response);
            self.shared.data_ready.notify_all();
        }
        Ok(())
    }

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, SerialError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        loop {
            if state.disconnected {
                return Err(SerialError::Disconnected);
            }
            if !state.open {
                return Err(SerialError::NotOpen);
            }
            if !state.rx.is_empty() {
                let n = buf.len().min(state.rx.len());
                for (slot, byte) in buf.iter_mut().zip(state.rx.drain(..n)) {
                    *slot = byte;
                }
                return Ok(n);
            }
            let result = self.shared.data_ready.wait_until(&mut state, deadline);
            if result.timed_out() && state.rx.is_empty() && !state.disconnected {
                return Err(SerialError::Timeout);
            }
        }
    }

    fn clear_input(&mut self) -> Result<(), SerialError> {
        self.shared.state.lock().rx.clear();
        Ok(())
    }

    fn port_name(&self) -> &str {
        &self.port_name
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }
}

impl MockHandle {
    /// 向接收缓冲区追加字节
    pub fn push_response(&self, bytes: &[u8]) {
        let mut state = self.shared.state.lock();
        state.rx.extend(bytes.iter().copied());
        self.shared.data_ready.notify_all();
    }

    /// 设置写入回调（替换已有回调）
    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&[u8]) -> Option<Vec<u8>> + Send + 'static,
    {
        self.shared.state.lock().responder = Some(Box::new(responder));
    }

    pub fn clear_responder(&self) {
        self.shared.state.lock().responder = None;
    }

    /// 所有写出的字节（每次 `write_all` 一项）
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.shared.state.lock().written.clone()
    }

    pub fn written_count(&self) -> usize {
        self.shared.state.lock().written.len()
    }

    /// 下一次 `open()` 失败
    pub fn fail_next_open(&self, message: impl Into<String>) {
        self.shared.state.lock().open_error = Some(message.into());
    }

    pub fn set_fail_close(&self, fail: bool) {
        self.shared.state.lock().fail_close = fail;
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.shared.state.lock().fail_writes = fail;
    }

    /// 模拟设备被拔出：后续读写返回 `Disconnected`
    pub fn disconnect(&self) {
        self.shared.state.lock().disconnected = true;
        self.shared.data_ready.notify_all();
    }

    pub fn is_open(&self) -> bool {
        self.shared.state.lock().open
    }

    pub fn open_count(&self) -> usize {
        self.shared.state.lock().open_count
    }

    pub fn close_count(&self) -> usize {
        self.shared.state.lock().close_count
    }

    pub fn pending_rx(&self) -> usize {
        self.shared.state.lock().rx.len()
    }
}

/// 简化的飞轮设备模型
///
/// - 设定值命令：原样回送作为应答帧，并记录目标值
/// - 轮询命令：回送遥测帧，转速/电流/力矩通道跟随当前目标
/// - 其它字节：不应答
#[derive(Debug, Default)]
pub struct DeviceSimulator {
    mode: Option<ControlMode>,
    target: f32,
    last_command: u8,
    command_count: u8,
    poll_count: u8,
    error_count: u8,
}

impl DeviceSimulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> Option<ControlMode> {
        self.mode
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    /// 处理一帧命令，返回应答字节
    pub fn respond(&mut self, bytes: &[u8]) -> Option<Vec<u8>> {
        if bytes.len() != COMMAND_FRAME_LEN || bytes[..2] != FRAME_HEADER {
            return None;
        }
        if response_checksum(bytes) != bytes[COMMAND_FRAME_LEN - 1] {
            self.error_count = self.error_count.wrapping_add(1);
            return None;
        }
        let opcode = Opcode::try_from(bytes[2]).ok()?;
        let value = f32::from_be_bytes([bytes[3], bytes[4], bytes[5], bytes[6]]);

        match opcode.control_mode() {
            Some(mode) => {
                self.mode = Some(mode);
                self.target = value;
                self.last_command = bytes[2];
                self.command_count = self.command_count.wrapping_add(1);
                Some(bytes.to_vec())
            },
            None => {
                self.poll_count = self.poll_count.wrapping_add(1);
                Some(self.telemetry().to_frame().to_vec())
            },
        }
    }

    fn telemetry(&self) -> Telemetry {
        let (speed, current) = match self.mode {
            Some(ControlMode::Speed) => (self.target, self.target * 0.05),
            Some(ControlMode::Current) => (0.0, self.target),
            Some(ControlMode::Torque) => (0.0, self.target * 30.0),
            None => (0.0, 0.0),
        };
        Telemetry {
            last_command: self.last_command,
            control_target: self.target,
            speed_rpm: speed,
            current_ma: current,
            command_response_count: self.command_count,
            telemetry_command_count: self.poll_count,
            error_command_count: self.error_count,
            motherboard_current_ma: 120,
            temperature_c: 25,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flywheel_protocol::{Command, encode_command};

    #[test]
    fn test_read_times_out_without_data() {
        let (mut adapter, _handle) = MockSerialAdapter::new("mock0", 9600);
        adapter.open().unwrap();
        let mut buf = [0u8; 4];
        let start = Instant::now();
        let err = adapter
            .read_timeout(&mut buf, Duration::from_millis(20))
            .unwrap_err();
        assert!(matches!(err, SerialError::Timeout));
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn test_read_respects_buffer_size() {
        let (mut adapter, handle) = MockSerialAdapter::new("mock0", 9600);
        adapter.open().unwrap();
        handle.push_response(&[1, 2, 3, 4, 5]);
        let mut buf = [0u8; 3];
        assert_eq!(adapter.read_timeout(&mut buf, Duration::ZERO).unwrap(), 3);
        assert_eq!(buf, [1, 2, 3]);
        assert_eq!(handle.pending_rx(), 2);
    }

    #[test]
    fn test_open_failure_injection() {
        let (mut adapter, handle) = MockSerialAdapter::new("mock0", 9600);
        handle.fail_next_open("busy");
        assert!(matches!(adapter.open(), Err(SerialError::Open { .. })));
        assert!(!adapter.is_open());
        assert!(adapter.open().is_ok());
        assert_eq!(handle.open_count(), 1);
    }

    #[test]
    fn test_write_requires_open() {
        let (mut adapter, _handle) = MockSerialAdapter::new("mock0", 9600);
        assert!(matches!(adapter.write_all(&[1]), Err(SerialError::NotOpen)));
    }

    #[test]
    fn test_disconnect_is_fatal() {
        let (mut adapter, handle) = MockSerialAdapter::new("mock0", 9600);
        adapter.open().unwrap();
        handle.disconnect();
        let err = adapter.write_all(&[1]).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_simulator_acks_setpoint_and_reports_telemetry() {
        let (mut adapter, handle) = MockSerialAdapter::with_simulator("mock0", 115_200);
        adapter.open().unwrap();

        let setpoint = encode_command(&Command::set_speed(1500.0));
        adapter.write_all(&setpoint).unwrap();
        let mut buf = [0u8; 40];
        let n = adapter.read_timeout(&mut buf, Duration::from_millis(10)).unwrap();
        assert_eq!(&buf[..n], &setpoint);

        adapter.write_all(&encode_command(&Command::poll())).unwrap();
        let n = adapter.read_timeout(&mut buf, Duration::from_millis(10)).unwrap();
        assert_eq!(n, 32);
        let t = Telemetry::from_frame(&buf[..n]).unwrap();
        assert_eq!(t.speed_rpm, 1500.0);
        assert_eq!(t.reported_mode(), Some(ControlMode::Speed));
        assert_eq!(handle.written_count(), 2);
    }
}
