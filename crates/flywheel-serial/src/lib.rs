//! # Flywheel Serial Adapter Layer
//!
//! 串口硬件抽象层。驱动层只通过 [`SerialAdapter`] 读写字节，
//! 具体后端：
//!
//! - `native`（默认）：[`SerialPortAdapter`]，基于 `serialport` crate
//! - `mock`：[`MockSerialAdapter`]，脚本化响应，用于测试

use std::time::Duration;
use thiserror::Error;

#[cfg(feature = "native")]
pub mod native;

#[cfg(feature = "native")]
pub use native::SerialPortAdapter;

#[cfg(feature = "mock")]
pub mod mock;

#[cfg(feature = "mock")]
pub use mock::{DeviceSimulator, MockHandle, MockSerialAdapter};

/// 串口适配层统一错误类型
#[derive(Error, Debug)]
pub enum SerialError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to open {port}: {message}")]
    Open { port: String, message: String },
    #[error("Read timeout")]
    Timeout,
    #[error("Port not open")]
    NotOpen,
    #[error("Device disconnected")]
    Disconnected,
}

impl SerialError {
    /// 设备已不可用（拔出、句柄失效），继续重试没有意义
    pub fn is_fatal(&self) -> bool {
        match self {
            SerialError::Disconnected | SerialError::NotOpen => true,
            SerialError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::PermissionDenied
            ),
            SerialError::Open { .. } | SerialError::Timeout => false,
        }
    }
}

/// 点对点串口传输接口
///
/// 运行期间由通信线程独占，因此只要求 `Send`。
pub trait SerialAdapter: Send {
    /// 打开端口（已打开时为空操作）
    fn open(&mut self) -> Result<(), SerialError>;

    /// 关闭端口（未打开时为空操作）
    fn close(&mut self) -> Result<(), SerialError>;

    fn is_open(&self) -> bool;

    /// 写出全部字节
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), SerialError>;

    /// 读取至多 `buf.len()` 字节，最多等待 `timeout`
    ///
    /// 超时无数据时返回 [`SerialError::Timeout`]。
    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, SerialError>;

    /// 丢弃输入缓冲区中尚未读取的字节
    fn clear_input(&mut self) -> Result<(), SerialError> {
        Ok(())
    }

    fn port_name(&self) -> &str;

    fn baud_rate(&self) -> u32;
}

impl<T: SerialAdapter + ?Sized> SerialAdapter for Box<T> {
    fn open(&mut self) -> Result<(), SerialError> {
        (**self).open()
    }

    fn close(&mut self) -> Result<(), SerialError> {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), SerialError> {
        (**self).write_all(bytes)
    }

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, SerialError> {
        (**self).read_timeout(buf, timeout)
    }

    fn clear_input(&mut self) -> Result<(), SerialError> {
        (**self).clear_input()
    }

    fn port_name(&self) -> &str {
        (**self).port_name()
    }

    fn baud_rate(&self) -> u32 {
        (**self).baud_rate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(SerialError::Disconnected.is_fatal());
        assert!(SerialError::NotOpen.is_fatal());
        assert!(!SerialError::Timeout.is_fatal());
        assert!(
            SerialError::Io(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone")).is_fatal()
        );
        assert!(
            !SerialError::Io(std::io::Error::new(std::io::ErrorKind::Interrupted, "eintr"))
                .is_fatal()
        );
    }

    #[test]
    fn test_error_display() {
        let err = SerialError::Open {
            port: "/dev/ttyUSB0".to_string(),
            message: "No such file or directory".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to open /dev/ttyUSB0: No such file or directory"
        );
    }
}
