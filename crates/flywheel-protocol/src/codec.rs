//! 帧编解码
//!
//! - 命令帧（8 字节）：`EB 90 | 指令码 | f32 大端载荷 | 校验和`
//! - 响应帧：以 `EB 90` 开头，第 3 字节为 `DD` 时为 32 字节遥测帧，否则为 8 字节应答帧
//! - 校验和：`Σ frame[2..len-1] & 0xFF`（命令帧即 `指令码 + Σ 载荷`）
//!
//! 解码是增量式的：串口读取可能在任意位置切分帧，未凑齐的字节保留在缓冲区中，
//! 帧头之前的字节被丢弃。

use crate::command::{Command, ControlMode};
use crate::constants::{
    ACK_FRAME_LEN, COMMAND_FRAME_LEN, FRAME_HEADER, TELEMETRY_FRAME_LEN, TELEMETRY_MARKER,
};
use crate::telemetry::Telemetry;
use crate::ProtocolError;

/// 计算帧校验和：第 3 字节到倒数第 2 字节求和，取低 8 位
///
/// 帧长度不足 3 字节时返回 0。
pub fn response_checksum(frame: &[u8]) -> u8 {
    if frame.len() < 3 {
        return 0;
    }
    frame[2..frame.len() - 1]
        .iter()
        .fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// 将命令编码为 8 字节命令帧
pub fn encode_command(command: &Command) -> [u8; COMMAND_FRAME_LEN] {
    let mut frame = [0u8; COMMAND_FRAME_LEN];
    frame[..2].copy_from_slice(&FRAME_HEADER);
    frame[2] = command.opcode().into();
    frame[3..7].copy_from_slice(&command.wire_value().to_be_bytes());
    frame[7] = response_checksum(&frame);
    frame
}

/// 解码得到的一帧响应
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedFrame {
    /// 遥测帧
    Telemetry(Telemetry),
    /// 设定值指令的应答帧
    Ack {
        opcode: u8,
        raw: [u8; ACK_FRAME_LEN],
    },
}

impl DecodedFrame {
    /// 该响应所确认的控制模式
    ///
    /// 应答帧按其指令码确认；遥测帧按 `last_command` 确认。
    pub fn acknowledged_mode(&self) -> Option<ControlMode> {
        match self {
            DecodedFrame::Telemetry(t) => t.reported_mode(),
            DecodedFrame::Ack { opcode, .. } => ControlMode::from_opcode(*opcode),
        }
    }
}

/// 帧编解码器接口
///
/// 通信线程独占一个编解码器实例，因此只要求 `Send`。
pub trait FrameCodec: Send {
    /// 编码一条命令
    fn encode(&self, command: &Command) -> Vec<u8>;

    /// 追加新读到的字节，尝试解出一帧
    ///
    /// - `Ok(Some(frame))`：解出一帧（缓冲区中可能还有后续字节）
    /// - `Ok(None)`：字节不足，需要继续读取
    /// - `Err(_)`：当前帧无效，已从缓冲区移除
    fn decode(&mut self, bytes: &[u8]) -> Result<Option<DecodedFrame>, ProtocolError>;

    /// 清空内部缓冲区
    fn reset(&mut self);

    /// 缓冲区中尚未消费的字节数
    fn buffered(&self) -> usize;
}

/// 默认编解码器
#[derive(Debug, Default)]
pub struct FlywheelCodec {
    buffer: Vec<u8>,
}

impl FlywheelCodec {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(TELEMETRY_FRAME_LEN * 2),
        }
    }

    /// 丢弃帧头之前的字节；找不到帧头时只保留可能是半个帧头的末尾 `EB`
    fn sync_to_header(&mut self) -> bool {
        match self
            .buffer
            .windows(FRAME_HEADER.len())
            .position(|w| w == FRAME_HEADER)
        {
            Some(0) => true,
            Some(pos) => {
                self.buffer.drain(..pos);
                true
            },
            None => {
                let keep_tail = self.buffer.last() == Some(&FRAME_HEADER[0]);
                let drop = if keep_tail {
                    self.buffer.len() - 1
                } else {
                    self.buffer.len()
                };
                self.buffer.drain(..drop);
                false
            },
        }
    }
}

impl FrameCodec for FlywheelCodec {
    fn encode(&self, command: &Command) -> Vec<u8> {
        encode_command(command).to_vec()
    }

    fn decode(&mut self, bytes: &[u8]) -> Result<Option<DecodedFrame>, ProtocolError> {
        self.buffer.extend_from_slice(bytes);

        if !self.sync_to_header() || self.buffer.len() < 3 {
            return Ok(None);
        }

        let frame_len = if self.buffer[2] == TELEMETRY_MARKER {
            TELEMETRY_FRAME_LEN
        } else {
            ACK_FRAME_LEN
        };
        if self.buffer.len() < frame_len {
            return Ok(None);
        }

        let frame: Vec<u8> = self.buffer.drain(..frame_len).collect();

        if frame_len == TELEMETRY_FRAME_LEN {
            return Telemetry::from_frame(&frame).map(|t| Some(DecodedFrame::Telemetry(t)));
        }

        let expected = response_checksum(&frame);
        let actual = frame[ACK_FRAME_LEN - 1];
        if expected != actual {
            return Err(ProtocolError::Checksum { expected, actual });
        }
        let mut raw = [0u8; ACK_FRAME_LEN];
        raw.copy_from_slice(&frame);
        Ok(Some(DecodedFrame::Ack {
            opcode: raw[2],
            raw,
        }))
    }

    fn reset(&mut self) {
        self.buffer.clear();
    }

    fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn telemetry_frame(speed: f32) -> [u8; TELEMETRY_FRAME_LEN] {
        Telemetry {
            last_command: 0xD2,
            speed_rpm: speed,
            ..Default::default()
        }
        .to_frame()
    }

    #[test]
    fn test_encode_known_vectors() {
        assert_eq!(
            encode_command(&Command::set_torque(30.0)).to_vec(),
            hex::decode("EB90D341F0000004").unwrap()
        );
        assert_eq!(
            encode_command(&Command::set_torque(-30.0)).to_vec(),
            hex::decode("EB90D3C1F0000084").unwrap()
        );
        assert_eq!(
            encode_command(&Command::poll()).to_vec(),
            hex::decode("EB90DD00000000DD").unwrap()
        );
    }

    #[test]
    fn test_encode_mode_switch_as_zero_setpoint() {
        let frame = encode_command(&Command::mode_switch(ControlMode::Current));
        assert_eq!(frame, [0xEB, 0x90, 0xD1, 0, 0, 0, 0, 0xD1]);
    }

    #[test]
    fn test_decode_telemetry_in_one_chunk() {
        let mut codec = FlywheelCodec::new();
        let frame = telemetry_frame(1234.0);
        match codec.decode(&frame).unwrap() {
            Some(DecodedFrame::Telemetry(t)) => assert_eq!(t.speed_rpm, 1234.0),
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(codec.buffered(), 0);
    }

    #[test]
    fn test_decode_split_across_reads() {
        let mut codec = FlywheelCodec::new();
        let frame = telemetry_frame(10.0);
        assert_eq!(codec.decode(&frame[..1]).unwrap(), None);
        assert_eq!(codec.decode(&frame[1..20]).unwrap(), None);
        assert!(matches!(
            codec.decode(&frame[20..]).unwrap(),
            Some(DecodedFrame::Telemetry(_))
        ));
    }

    #[test]
    fn test_decode_skips_leading_garbage() {
        let mut codec = FlywheelCodec::new();
        let mut bytes = vec![0x00, 0x13, 0xEB, 0x37];
        bytes.extend_from_slice(&telemetry_frame(5.0));
        assert!(matches!(
            codec.decode(&bytes).unwrap(),
            Some(DecodedFrame::Telemetry(_))
        ));
    }

    #[test]
    fn test_decode_garbage_only_keeps_nothing() {
        let mut codec = FlywheelCodec::new();
        assert_eq!(codec.decode(&[1, 2, 3, 4, 5]).unwrap(), None);
        assert_eq!(codec.buffered(), 0);
        // 末尾的 EB 可能是半个帧头
        assert_eq!(codec.decode(&[9, 0xEB]).unwrap(), None);
        assert_eq!(codec.buffered(), 1);
    }

    #[test]
    fn test_decode_ack() {
        let mut codec = FlywheelCodec::new();
        let ack = encode_command(&Command::set_speed(500.0));
        let decoded = codec.decode(&ack).unwrap().unwrap();
        assert_eq!(decoded.acknowledged_mode(), Some(ControlMode::Speed));
        match decoded {
            DecodedFrame::Ack { opcode, raw } => {
                assert_eq!(opcode, 0xD2);
                assert_eq!(raw, ack);
            },
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_checksum_error_consumes_frame() {
        let mut codec = FlywheelCodec::new();
        let mut bad = telemetry_frame(1.0);
        bad[31] ^= 0xFF;
        let good = telemetry_frame(2.0);
        let mut bytes = bad.to_vec();
        bytes.extend_from_slice(&good);

        assert!(matches!(
            codec.decode(&bytes),
            Err(ProtocolError::Checksum { .. })
        ));
        match codec.decode(&[]).unwrap() {
            Some(DecodedFrame::Telemetry(t)) => assert_eq!(t.speed_rpm, 2.0),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_reset_drops_partial_frame() {
        let mut codec = FlywheelCodec::new();
        let frame = telemetry_frame(3.0);
        assert_eq!(codec.decode(&frame[..10]).unwrap(), None);
        codec.reset();
        assert_eq!(codec.buffered(), 0);
        assert!(codec.decode(&frame).unwrap().is_some());
    }

    proptest! {
        #[test]
        fn prop_any_split_point_decodes(speed in -6050.0f32..6050.0, split in 0usize..32) {
            let frame = telemetry_frame(speed);
            let mut codec = FlywheelCodec::new();
            let first = codec.decode(&frame[..split]).unwrap();
            prop_assert!(first.is_none());
            match codec.decode(&frame[split..]).unwrap() {
                Some(DecodedFrame::Telemetry(t)) => prop_assert_eq!(t.speed_rpm, speed),
                other => prop_assert!(false, "unexpected: {:?}", other),
            }
        }

        #[test]
        fn prop_single_byte_corruption_is_detected(index in 3usize..31, flip in 1u8..=255) {
            let mut frame = telemetry_frame(100.0);
            frame[index] ^= flip;
            let mut codec = FlywheelCodec::new();
            prop_assert!(
                matches!(codec.decode(&frame), Err(ProtocolError::Checksum { .. })),
                "corruption was not detected"
            );
        }
    }
}
