//! 驱动配置
//!
//! 可从 TOML 文件加载，缺省字段使用默认值：
//!
//! ```toml
//! port = "/dev/ttyUSB0"
//! baud_rate = 115200
//! communication_frequency_hz = 200.0
//! auto_polling = true
//!
//! [limits]
//! speed_rpm = 3000.0
//! ```

use crate::error::{DriverError, ValidationError};
use flywheel_protocol::{ControlMode, MAX_CURRENT_MA, MAX_SPEED_RPM, MAX_TORQUE_MNM};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 设定值上限（对称区间 `[-limit, limit]`）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SetpointLimits {
    pub speed_rpm: f32,
    pub torque_mnm: f32,
    pub current_ma: f32,
}

impl Default for SetpointLimits {
    fn default() -> Self {
        Self {
            speed_rpm: MAX_SPEED_RPM,
            torque_mnm: MAX_TORQUE_MNM,
            current_ma: MAX_CURRENT_MA,
        }
    }
}

impl SetpointLimits {
    pub fn limit(&self, mode: ControlMode) -> f32 {
        match mode {
            ControlMode::Speed => self.speed_rpm,
            ControlMode::Torque => self.torque_mnm,
            ControlMode::Current => self.current_ma,
        }
    }

    /// 校验设定值：必须有限且位于 `[-limit, limit]`
    pub fn check(&self, mode: ControlMode, value: f32) -> Result<(), ValidationError> {
        let kind = match mode {
            ControlMode::Speed => "speed",
            ControlMode::Torque => "torque",
            ControlMode::Current => "current",
        };
        if !value.is_finite() {
            return Err(ValidationError::NonFinite { kind });
        }
        let max = self.limit(mode);
        if value < -max || value > max {
            return Err(ValidationError::OutOfRange {
                kind,
                value,
                min: -max,
                max,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlywheelConfig {
    /// 串口名称（如 `/dev/ttyUSB0`、`COM3`）
    pub port: String,
    pub baud_rate: u32,
    /// 命令队列容量
    pub queue_size: usize,
    pub communication_frequency_hz: f64,
    pub polling_frequency_hz: f64,
    /// 遥测历史窗口大小
    pub max_telemetry_size: usize,
    /// 是否在运行期间自动轮询遥测
    pub auto_polling: bool,
    /// 等待响应的超时；缺省为一个通信周期
    pub response_timeout_ms: Option<u64>,
    /// 每次串口读取的最大字节数
    pub read_chunk_size: usize,
    pub limits: SetpointLimits,
}

impl Default for FlywheelConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: 115_200,
            queue_size: 1000,
            communication_frequency_hz: 200.0,
            polling_frequency_hz: 100.0,
            max_telemetry_size: 1000,
            auto_polling: false,
            response_timeout_ms: None,
            read_chunk_size: 40,
            limits: SetpointLimits::default(),
        }
    }
}

/// 通信/轮询周期与响应超时的上限
pub const MAX_PERIOD: Duration = Duration::from_secs(3600);

fn period_of(frequency_hz: f64) -> Duration {
    Duration::from_secs_f64(1.0 / frequency_hz)
}

impl FlywheelConfig {
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// 从 TOML 文件加载并校验
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, DriverError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| DriverError::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, DriverError> {
        let config: Self =
            toml::from_str(text).map_err(|e| DriverError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, DriverError> {
        toml::to_string_pretty(self).map_err(|e| DriverError::InvalidConfig(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), DriverError> {
        let invalid = |msg: String| Err(DriverError::InvalidConfig(msg));

        if self.baud_rate == 0 {
            return invalid("baud_rate must be > 0".to_string());
        }
        for (name, hz) in [
            ("communication_frequency_hz", self.communication_frequency_hz),
            ("polling_frequency_hz", self.polling_frequency_hz),
        ] {
            if !hz.is_finite() || hz <= 0.0 {
                return invalid(format!("{name} must be a positive finite number, got {hz}"));
            }
            // 周期小于 1µs 没有意义，Duration 也无法表示过小的周期
            if hz > 1_000_000.0 {
                return invalid(format!("{name} must be <= 1 MHz, got {hz}"));
            }
            match Duration::try_from_secs_f64(1.0 / hz) {
                Ok(period) if period <= MAX_PERIOD => {},
                _ => {
                    return invalid(format!(
                        "{name} must give a period <= {}s, got {hz}",
                        MAX_PERIOD.as_secs()
                    ));
                },
            }
        }
        if self.queue_size == 0 {
            return invalid("queue_size must be > 0".to_string());
        }
        if self.max_telemetry_size == 0 {
            return invalid("max_telemetry_size must be > 0".to_string());
        }
        if self.read_chunk_size == 0 {
            return invalid("read_chunk_size must be > 0".to_string());
        }
        if let Some(ms) = self.response_timeout_ms
            && (ms == 0 || Duration::from_millis(ms) > MAX_PERIOD)
        {
            return invalid(format!(
                "response_timeout_ms must be in 1..={}, got {ms}",
                MAX_PERIOD.as_millis()
            ));
        }
        for (name, limit) in [
            ("limits.speed_rpm", self.limits.speed_rpm),
            ("limits.torque_mnm", self.limits.torque_mnm),
            ("limits.current_ma", self.limits.current_ma),
        ] {
            if !limit.is_finite() || limit < 0.0 {
                return invalid(format!("{name} must be a non-negative finite number"));
            }
        }
        Ok(())
    }

    pub fn communication_period(&self) -> Duration {
        period_of(self.communication_frequency_hz)
    }

    pub fn polling_period(&self) -> Duration {
        period_of(self.polling_frequency_hz)
    }

    /// 响应超时；未配置时为一个通信周期
    pub fn response_timeout(&self) -> Duration {
        self.response_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.communication_period())
    }
}
