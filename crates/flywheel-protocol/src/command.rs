//! 命令定义
//!
//! `Command` 是控制 API 与通信线程之间传递的唯一数据单元。
//! 构造后不可变（字段私有，`Copy`），编码由 [`crate::codec`] 负责。

use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::fmt;

/// 设备指令码（命令帧第 3 字节）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Opcode {
    /// 电流模式设定值
    Current = 0xD1,
    /// 转速模式设定值
    Speed = 0xD2,
    /// 力矩模式设定值
    Torque = 0xD3,
    /// 遥测轮询
    Poll = 0xDD,
}

impl Opcode {
    /// 该指令码对应的控制模式（轮询返回 `None`）
    pub fn control_mode(self) -> Option<ControlMode> {
        match self {
            Opcode::Current => Some(ControlMode::Current),
            Opcode::Speed => Some(ControlMode::Speed),
            Opcode::Torque => Some(ControlMode::Torque),
            Opcode::Poll => None,
        }
    }
}

/// 控制模式
///
/// 设备同一时刻只工作在一种模式下，由最近一次被应答的设定值指令决定。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum ControlMode {
    Speed = 1,
    Torque = 2,
    Current = 3,
}

impl ControlMode {
    /// 模式对应的设定值指令码
    pub fn opcode(self) -> Opcode {
        match self {
            ControlMode::Speed => Opcode::Speed,
            ControlMode::Torque => Opcode::Torque,
            ControlMode::Current => Opcode::Current,
        }
    }

    /// 由指令码反查模式
    pub fn from_opcode(opcode: u8) -> Option<Self> {
        Opcode::try_from(opcode).ok().and_then(Opcode::control_mode)
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// 从 u8 转换，无效值返回 `None`
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Speed),
            2 => Some(Self::Torque),
            3 => Some(Self::Current),
            _ => None,
        }
    }

    /// 设定值单位
    pub fn unit(self) -> &'static str {
        match self {
            ControlMode::Speed => "rpm",
            ControlMode::Torque => "mNm",
            ControlMode::Current => "mA",
        }
    }
}

impl fmt::Display for ControlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ControlMode::Speed => "speed",
            ControlMode::Torque => "torque",
            ControlMode::Current => "current",
        };
        f.write_str(name)
    }
}

/// 命令种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CommandKind {
    SetSpeed,
    SetTorque,
    SetCurrent,
    PollTelemetry,
    ModeSwitch,
}

/// 发往设备的一条命令
///
/// # 不变量
///
/// - `PollTelemetry` 没有载荷
/// - 设定值命令携带 f32 载荷，并决定目标模式
/// - `ModeSwitch` 携带目标模式，以零设定值编码
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Command {
    kind: CommandKind,
    payload: Option<f32>,
    mode: Option<ControlMode>,
}

impl Command {
    /// 转速设定值（rpm）
    pub fn set_speed(rpm: f32) -> Self {
        Self::setpoint(CommandKind::SetSpeed, ControlMode::Speed, rpm)
    }

    /// 力矩设定值（mNm）
    pub fn set_torque(mnm: f32) -> Self {
        Self::setpoint(CommandKind::SetTorque, ControlMode::Torque, mnm)
    }

    /// 电流设定值（mA）
    pub fn set_current(ma: f32) -> Self {
        Self::setpoint(CommandKind::SetCurrent, ControlMode::Current, ma)
    }

    /// 遥测轮询
    pub fn poll() -> Self {
        Self {
            kind: CommandKind::PollTelemetry,
            payload: None,
            mode: None,
        }
    }

    /// 切换模式（以该模式的零设定值下发）
    pub fn mode_switch(mode: ControlMode) -> Self {
        Self {
            kind: CommandKind::ModeSwitch,
            payload: None,
            mode: Some(mode),
        }
    }

    /// 按模式构造设定值命令
    pub fn for_mode(mode: ControlMode, value: f32) -> Self {
        match mode {
            ControlMode::Speed => Self::set_speed(value),
            ControlMode::Torque => Self::set_torque(value),
            ControlMode::Current => Self::set_current(value),
        }
    }

    fn setpoint(kind: CommandKind, mode: ControlMode, value: f32) -> Self {
        Self {
            kind,
            payload: Some(value),
            mode: Some(mode),
        }
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    /// 设定值载荷；轮询与模式切换返回 `None`
    pub fn payload(&self) -> Option<f32> {
        self.payload
    }

    /// 该命令选择的控制模式（轮询返回 `None`）
    pub fn control_mode(&self) -> Option<ControlMode> {
        self.mode
    }

    /// 编码时使用的指令码
    pub fn opcode(&self) -> Opcode {
        self.mode.map(ControlMode::opcode).unwrap_or(Opcode::Poll)
    }

    /// 写入帧中的载荷值
    pub fn wire_value(&self) -> f32 {
        self.payload.unwrap_or(0.0)
    }

    pub fn is_poll(&self) -> bool {
        self.kind == CommandKind::PollTelemetry
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.kind, self.mode, self.payload) {
            (CommandKind::PollTelemetry, _, _) => f.write_str("poll"),
            (CommandKind::ModeSwitch, Some(mode), _) => write!(f, "switch to {mode} mode"),
            (_, Some(mode), Some(value)) => write!(f, "{mode} = {value} {}", mode.unit()),
            _ => write!(f, "{:?}", self.kind),
        }
    }
}
