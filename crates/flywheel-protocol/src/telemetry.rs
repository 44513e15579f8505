//! 遥测帧解析
//!
//! 32 字节遥测帧布局（大端字节序）：
//!
//! | 偏移 | 长度 | 字段 |
//! |------|------|------|
//! | 0 | 2 | 帧头 `EB 90` |
//! | 2 | 1 | 遥测标记 `DD` |
//! | 3 | 1 | 最近一次执行的指令码 |
//! | 4 | 4 | 控制目标值 (f32) |
//! | 8 | 4 | 转速 rpm (f32) |
//! | 12 | 4 | 电流 mA (f32) |
//! | 16 | 4 | 加速度 (f32) |
//! | 20 | 1 | 指令应答计数 |
//! | 21 | 1 | 遥测指令计数 |
//! | 22 | 1 | 错误指令计数 |
//! | 23 | 2 | 主板电流 mA (u16) |
//! | 25 | 1 | 温度 ℃ (i8) |
//! | 26 | 1 | 电机状态 |
//! | 27 | 4 | 保留 |
//! | 31 | 1 | 校验和 |

use crate::codec::response_checksum;
use crate::command::{ControlMode, Opcode};
use crate::constants::{FRAME_HEADER, TELEMETRY_FRAME_LEN, TELEMETRY_MARKER};
use crate::timestamp::{monotonic_micros, system_micros};
use crate::ProtocolError;

/// 一帧解码后的遥测数据
///
/// 解码后不可变；驱动层以 `Arc<Telemetry>` 形式共享。
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Telemetry {
    /// 单调时钟时间戳（微秒，进程内起点）
    pub timestamp_us: u64,
    /// 系统时钟时间戳（微秒，Unix 纪元）
    pub system_timestamp_us: u64,
    pub last_command: u8,
    pub control_target: f32,
    pub speed_rpm: f32,
    pub current_ma: f32,
    pub acceleration: f32,
    pub command_response_count: u8,
    pub telemetry_command_count: u8,
    pub error_command_count: u8,
    pub motherboard_current_ma: u16,
    pub temperature_c: i8,
    pub motor_status: u8,
    pub reserved: [u8; 4],
    pub checksum: u8,
}

fn be_f32(frame: &[u8], offset: usize) -> f32 {
    f32::from_be_bytes([
        frame[offset],
        frame[offset + 1],
        frame[offset + 2],
        frame[offset + 3],
    ])
}

impl Telemetry {
    /// 从完整的 32 字节遥测帧解析，以当前时刻作为时间戳
    pub fn from_frame(frame: &[u8]) -> Result<Self, ProtocolError> {
        Self::from_frame_at(frame, monotonic_micros(), system_micros())
    }

    /// 从完整帧解析，并使用给定的时间戳
    pub fn from_frame_at(
        frame: &[u8],
        timestamp_us: u64,
        system_timestamp_us: u64,
    ) -> Result<Self, ProtocolError> {
        if frame.len() != TELEMETRY_FRAME_LEN {
            return Err(ProtocolError::InvalidLength {
                expected: TELEMETRY_FRAME_LEN,
                actual: frame.len(),
            });
        }
        if frame[..2] != FRAME_HEADER || frame[2] != TELEMETRY_MARKER {
            return Err(ProtocolError::InvalidHeader {
                bytes: [frame[0], frame[1], frame[2]],
            });
        }
        let expected = response_checksum(frame);
        let actual = frame[TELEMETRY_FRAME_LEN - 1];
        if expected != actual {
            return Err(ProtocolError::Checksum { expected, actual });
        }

        Ok(Self {
            timestamp_us,
            system_timestamp_us,
            last_command: frame[3],
            control_target: be_f32(frame, 4),
            speed_rpm: be_f32(frame, 8),
            current_ma: be_f32(frame, 12),
            acceleration: be_f32(frame, 16),
            command_response_count: frame[20],
            telemetry_command_count: frame[21],
            error_command_count: frame[22],
            motherboard_current_ma: u16::from_be_bytes([frame[23], frame[24]]),
            temperature_c: frame[25] as i8,
            motor_status: frame[26],
            reserved: [frame[27], frame[28], frame[29], frame[30]],
            checksum: actual,
        })
    }

    /// 重新编码为 32 字节遥测帧（校验和重新计算）
    ///
    /// 主要用于模拟设备与测试。
    pub fn to_frame(&self) -> [u8; TELEMETRY_FRAME_LEN] {
        let mut frame = [0u8; TELEMETRY_FRAME_LEN];
        frame[..2].copy_from_slice(&FRAME_HEADER);
        frame[2] = TELEMETRY_MARKER;
        frame[3] = self.last_command;
        frame[4..8].copy_from_slice(&self.control_target.to_be_bytes());
        frame[8..12].copy_from_slice(&self.speed_rpm.to_be_bytes());
        frame[12..16].copy_from_slice(&self.current_ma.to_be_bytes());
        frame[16..20].copy_from_slice(&self.acceleration.to_be_bytes());
        frame[20] = self.command_response_count;
        frame[21] = self.telemetry_command_count;
        frame[22] = self.error_command_count;
        frame[23..25].copy_from_slice(&self.motherboard_current_ma.to_be_bytes());
        frame[25] = self.temperature_c as u8;
        frame[26] = self.motor_status;
        frame[27..31].copy_from_slice(&self.reserved);
        frame[31] = response_checksum(&frame);
        frame
    }

    /// 最近执行指令的指令码（未知值返回 `None`）
    pub fn last_opcode(&self) -> Option<Opcode> {
        Opcode::try_from(self.last_command).ok()
    }

    /// 设备报告的当前控制模式（由最近执行的设定值指令推断）
    pub fn reported_mode(&self) -> Option<ControlMode> {
        ControlMode::from_opcode(self.last_command)
    }

    /// 以 `(名称, 数值)` 列表形式返回全部数值通道，顺序固定
    pub fn channels(&self) -> Vec<(&'static str, f64)> {
        vec![
            ("last_command", f64::from(self.last_command)),
            ("control_target", f64::from(self.control_target)),
            ("speed_rpm", f64::from(self.speed_rpm)),
            ("current_ma", f64::from(self.current_ma)),
            ("acceleration", f64::from(self.acceleration)),
            ("command_response_count", f64::from(self.command_response_count)),
            ("telemetry_command_count", f64::from(self.telemetry_command_count)),
            ("error_command_count", f64::from(self.error_command_count)),
            ("motherboard_current_ma", f64::from(self.motherboard_current_ma)),
            ("temperature_c", f64::from(self.temperature_c)),
            ("motor_status", f64::from(self.motor_status)),
        ]
    }

    /// 按名称查询单个通道
    pub fn channel(&self, name: &str) -> Option<f64> {
        self.channels()
            .into_iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v)
    }
}
