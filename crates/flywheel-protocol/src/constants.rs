//! 协议常量定义
//!
//! 帧长度、帧头以及设备允许的设定值范围。

/// 所有帧（命令帧与响应帧）共用的帧头
pub const FRAME_HEADER: [u8; 2] = [0xEB, 0x90];

/// 命令帧长度：帧头(2) + 指令码(1) + f32 大端载荷(4) + 校验和(1)
pub const COMMAND_FRAME_LEN: usize = 8;

/// 应答帧长度（设定值指令的回执）
pub const ACK_FRAME_LEN: usize = 8;

/// 遥测帧长度
pub const TELEMETRY_FRAME_LEN: usize = 32;

/// 响应帧第 3 字节为该值时表示遥测帧，否则为应答帧
pub const TELEMETRY_MARKER: u8 = 0xDD;

/// 转速设定值上限（rpm，对称区间）
pub const MAX_SPEED_RPM: f32 = 6050.0;

/// 力矩设定值上限（mNm，对称区间）
pub const MAX_TORQUE_MNM: f32 = 50.0;

/// 电流设定值上限（mA，对称区间）
pub const MAX_CURRENT_MA: f32 = 1500.0;
