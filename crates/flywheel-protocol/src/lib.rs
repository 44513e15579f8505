//! # Flywheel Protocol
//!
//! 反作用飞轮串口协议定义（无硬件依赖）
//!
//! ## 模块
//!
//! - `constants`: 帧长度、帧头、设定值范围
//! - `command`: 命令与控制模式
//! - `telemetry`: 32 字节遥测帧解析
//! - `codec`: 命令帧编码与响应帧增量解码
//! - `timestamp`: 单调时钟 / 系统时钟时间戳
//!
//! ## 字节序
//!
//! 所有多字节字段均为大端字节序。

pub mod codec;
pub mod command;
pub mod constants;
pub mod telemetry;
pub mod timestamp;

pub use codec::{DecodedFrame, FlywheelCodec, FrameCodec, encode_command, response_checksum};
pub use command::{Command, CommandKind, ControlMode, Opcode};
pub use constants::*;
pub use telemetry::Telemetry;

use thiserror::Error;

/// 协议解析错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Checksum mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    Checksum { expected: u8, actual: u8 },

    #[error("Invalid frame header: {bytes:02X?}")]
    InvalidHeader { bytes: [u8; 3] },
}
