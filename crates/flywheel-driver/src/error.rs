//! 驱动层错误类型定义

use crate::state::ConnectionState;
use flywheel_protocol::ProtocolError;
use flywheel_serial::SerialError;
use thiserror::Error;

/// 驱动层错误类型（控制 API 的返回错误）
#[derive(Error, Debug)]
pub enum DriverError {
    /// 打开 / 关闭传输失败
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// 当前连接状态不允许该操作
    #[error("Cannot {operation} while {state}")]
    State {
        operation: &'static str,
        state: ConnectionState,
    },

    /// 设定值校验失败
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// 配置无效
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// 工作线程创建失败
    #[error("Failed to spawn thread: {0}")]
    ThreadSpawn(String),

    /// 遥测导出失败
    #[error("Recording error: {0}")]
    Recording(String),
}

impl DriverError {
    pub(crate) fn state(operation: &'static str, state: ConnectionState) -> Self {
        DriverError::State { operation, state }
    }
}

/// 传输层打开 / 关闭失败
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("failed to open {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: SerialError,
    },

    #[error("failed to close {port}: {source}")]
    Close {
        port: String,
        #[source]
        source: SerialError,
    },
}

/// 设定值校验错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("{kind} set-point must be finite")]
    NonFinite { kind: &'static str },

    #[error("{kind} set-point {value} outside [{min}, {max}]")]
    OutOfRange {
        kind: &'static str,
        value: f32,
        min: f32,
        max: f32,
    },
}

/// 一次通信周期内的失败
///
/// 只记录（指标 + 最近错误 + 日志），从不返回给控制 API 的调用方。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommunicationError {
    #[error("no response within {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("malformed response: {0}")]
    Decode(#[from] ProtocolError),

    #[error("write failed: {0}")]
    Write(String),

    #[error("read failed: {0}")]
    Read(String),
}

/// 用户回调返回的失败（或捕获到的 panic）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct CallbackError(pub String);

impl CallbackError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<String> for CallbackError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for CallbackError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_error_display() {
        let err = DriverError::state("set speed", ConnectionState::Disconnected);
        assert_eq!(err.to_string(), "Cannot set speed while Disconnected");

        let err = DriverError::InvalidConfig("queue_size must be > 0".to_string());
        assert!(err.to_string().contains("queue_size"));

        let err = DriverError::ThreadSpawn("resource limit".to_string());
        assert!(err.to_string().contains("spawn") && err.to_string().contains("resource limit"));
    }

    #[test]
    fn test_from_validation_error() {
        let err: DriverError = ValidationError::NonFinite { kind: "speed" }.into();
        match err {
            DriverError::Validation(ValidationError::NonFinite { kind }) => {
                assert_eq!(kind, "speed")
            },
            _ => panic!("Expected Validation variant"),
        }
    }

    #[test]
    fn test_from_connection_error() {
        let err: DriverError = ConnectionError::Open {
            port: "/dev/ttyUSB0".to_string(),
            source: SerialError::Timeout,
        }
        .into();
        let msg = err.to_string();
        assert!(msg.contains("/dev/ttyUSB0"), "{}", msg);
    }

    #[test]
    fn test_out_of_range_display() {
        let err = ValidationError::OutOfRange {
            kind: "torque",
            value: 80.0,
            min: -50.0,
            max: 50.0,
        };
        assert_eq!(err.to_string(), "torque set-point 80 outside [-50, 50]");
    }

    #[test]
    fn test_communication_error_from_protocol() {
        let err: CommunicationError = ProtocolError::Checksum {
            expected: 1,
            actual: 2,
        }
        .into();
        assert!(matches!(err, CommunicationError::Decode(_)));
        assert!(err.to_string().starts_with("malformed response"));
    }
}
