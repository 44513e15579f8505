//! 基于 `serialport` crate 的串口后端（8N1，无流控）

use crate::{SerialAdapter, SerialError};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{Read, Write};
use std::time::Duration;
use tracing::{debug, info, trace};

/// 打开端口时使用的默认读超时，每次读取前会按调用方给定的值重设
const DEFAULT_TIMEOUT: Duration = Duration::from_millis(100);

pub struct SerialPortAdapter {
    port_name: String,
    baud_rate: u32,
    clear_on_open: bool,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialPortAdapter {
    /// 创建适配器（不打开端口）
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            clear_on_open: true,
            port: None,
        }
    }

    /// 打开后是否清空残留的输入字节（默认开启）
    pub fn clear_on_open(mut self, enabled: bool) -> Self {
        self.clear_on_open = enabled;
        self
    }

    /// 列出系统中可用的串口名称
    pub fn available_ports() -> Result<Vec<String>, SerialError> {
        let ports = serialport::available_ports().map_err(map_port_error)?;
        Ok(ports.into_iter().map(|p| p.port_name).collect())
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn SerialPort>, SerialError> {
        self.port.as_mut().ok_or(SerialError::NotOpen)
    }
}

fn map_port_error(e: serialport::Error) -> SerialError {
    match e.kind() {
        serialport::ErrorKind::NoDevice => SerialError::Disconnected,
        _ => SerialError::Io(e.into()),
    }
}

fn map_io_error(e: std::io::Error) -> SerialError {
    match e.kind() {
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => SerialError::Timeout,
        _ => SerialError::Io(e),
    }
}

impl SerialAdapter for SerialPortAdapter {
    fn open(&mut self) -> Result<(), SerialError> {
        if self.port.is_some() {
            return Ok(());
        }
        let port = serialport::new(self.port_name.as_str(), self.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(DEFAULT_TIMEOUT)
            .open()
            .map_err(|e| SerialError::Open {
                port: self.port_name.clone(),
                message: e.to_string(),
            })?;

        if self.clear_on_open {
            port.clear(ClearBuffer::All).map_err(map_port_error)?;
        }

        info!("Opened serial port: {} at {} baud", self.port_name, self.baud_rate);
        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) -> Result<(), SerialError> {
        if let Some(mut port) = self.port.take() {
            // 关闭前把尚未写出的字节刷出去；句柄在 drop 时释放
            port.flush().map_err(SerialError::Io)?;
            info!("Closed serial port: {}", self.port_name);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), SerialError> {
        let port = self.port_mut()?;
        port.write_all(bytes).map_err(map_io_error)?;
        port.flush().map_err(map_io_error)?;
        trace!("Serial TX {} bytes", bytes.len());
        Ok(())
    }

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, SerialError> {
        let port = self.port_mut()?;
        port.set_timeout(timeout).map_err(map_port_error)?;
        match port.read(buf) {
            Ok(0) => Err(SerialError::Timeout),
            Ok(n) => {
                trace!("Serial RX {} bytes", n);
                Ok(n)
            },
            Err(e) => Err(map_io_error(e)),
        }
    }

    fn clear_input(&mut self) -> Result<(), SerialError> {
        let port = self.port_mut()?;
        port.clear(ClearBuffer::Input).map_err(map_port_error)?;
        debug!("Cleared serial input buffer");
        Ok(())
    }

    fn port_name(&self) -> &str {
        &self.port_name
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_closed() {
        let adapter = SerialPortAdapter::new("/dev/ttyUSB0", 115_200);
        assert!(!adapter.is_open());
        assert_eq!(adapter.port_name(), "/dev/ttyUSB0");
        assert_eq!(adapter.baud_rate(), 115_200);
    }

    #[test]
    fn test_io_on_closed_port_is_not_open() {
        let mut adapter = SerialPortAdapter::new("/dev/ttyUSB0", 115_200);
        assert!(matches!(adapter.write_all(&[1, 2]), Err(SerialError::NotOpen)));
        let mut buf = [0u8; 8];
        assert!(matches!(
            adapter.read_timeout(&mut buf, Duration::from_millis(1)),
            Err(SerialError::NotOpen)
        ));
        // 关闭未打开的端口是空操作
        assert!(adapter.close().is_ok());
    }

    #[test]
    fn test_open_missing_port_fails() {
        let mut adapter = SerialPortAdapter::new("/dev/flywheel-does-not-exist", 9600);
        let err = adapter.open().unwrap_err();
        assert!(matches!(err, SerialError::Open { .. }));
        assert!(!adapter.is_open());
    }

    #[test]
    fn test_timeout_mapping() {
        let err = map_io_error(std::io::Error::new(std::io::ErrorKind::TimedOut, "t"));
        assert!(matches!(err, SerialError::Timeout));
    }
}
