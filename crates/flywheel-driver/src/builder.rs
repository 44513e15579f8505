//! Builder 模式实现
//!
//! 提供链式构造 [`Flywheel`] 实例的便捷方式。

use crate::config::{FlywheelConfig, SetpointLimits};
use crate::error::DriverError;
use crate::flywheel::Flywheel;
use crate::hooks::TelemetryCallback;
use flywheel_protocol::{FlywheelCodec, FrameCodec};
use flywheel_serial::SerialAdapter;
#[cfg(feature = "native")]
use flywheel_serial::SerialPortAdapter;
use std::sync::Arc;
use std::time::Duration;

/// Flywheel Builder（链式构造）
///
/// 未显式设置的字段取 [`FlywheelConfig::default`] 的值。
///
/// # Example
///
/// ```no_run
/// use flywheel_driver::FlywheelBuilder;
///
/// let flywheel = FlywheelBuilder::new()
///     .port("/dev/ttyUSB0")
///     .baud_rate(115_200)
///     .communication_frequency(200.0)
///     .polling_frequency(50.0)
///     .auto_polling(true)
///     .build()
///     .unwrap();
/// ```
pub struct FlywheelBuilder {
    config: FlywheelConfig,
    transport: Option<Box<dyn SerialAdapter>>,
    codec: Option<Box<dyn FrameCodec>>,
    callback: Option<Arc<dyn TelemetryCallback>>,
}

impl FlywheelBuilder {
    pub fn new() -> Self {
        Self {
            config: FlywheelConfig::default(),
            transport: None,
            codec: None,
            callback: None,
        }
    }

    /// 以完整配置为起点（例如从 TOML 加载的配置）
    pub fn config(mut self, config: FlywheelConfig) -> Self {
        self.config = config;
        self
    }

    /// 串口名称（使用内置串口后端时必填）
    pub fn port(mut self, port: impl Into<String>) -> Self {
        self.config.port = port.into();
        self
    }

    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.config.baud_rate = baud_rate;
        self
    }

    /// 命令队列容量，满时丢弃最旧的命令
    pub fn queue_size(mut self, size: usize) -> Self {
        self.config.queue_size = size;
        self
    }

    /// 通信线程频率（Hz）
    pub fn communication_frequency(mut self, hz: f64) -> Self {
        self.config.communication_frequency_hz = hz;
        self
    }

    /// 自动轮询频率（Hz）
    pub fn polling_frequency(mut self, hz: f64) -> Self {
        self.config.polling_frequency_hz = hz;
        self
    }

    pub fn max_telemetry_size(mut self, size: usize) -> Self {
        self.config.max_telemetry_size = size;
        self
    }

    pub fn auto_polling(mut self, enabled: bool) -> Self {
        self.config.auto_polling = enabled;
        self
    }

    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.config.response_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn read_chunk_size(mut self, size: usize) -> Self {
        self.config.read_chunk_size = size;
        self
    }

    pub fn limits(mut self, limits: SetpointLimits) -> Self {
        self.config.limits = limits;
        self
    }

    /// 用户遥测回调（每帧一次，先于钩子调用）
    pub fn callback(mut self, callback: impl TelemetryCallback + 'static) -> Self {
        self.callback = Some(Arc::new(callback));
        self
    }

    /// 注入自定义传输（测试或非串口后端）
    ///
    /// 设置后 `port` / `baud_rate` 仅作为配置记录，实际端口信息取自传输本身。
    pub fn transport(mut self, transport: Box<dyn SerialAdapter>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// 替换帧编解码器（默认 [`FlywheelCodec`]）
    pub fn codec(mut self, codec: Box<dyn FrameCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// 构建 Flywheel 实例
    ///
    /// 只校验配置并创建对象，不会打开串口；之后调用 [`Flywheel::connect`]。
    ///
    /// # Errors
    /// - `DriverError::InvalidConfig`: 配置非法，或既没有注入传输也没有可用的串口后端
    pub fn build(self) -> Result<Flywheel, DriverError> {
        self.config.validate()?;
        let transport = match self.transport {
            Some(transport) => transport,
            None => default_transport(&self.config)?,
        };
        let codec = self
            .codec
            .unwrap_or_else(|| Box::new(FlywheelCodec::new()) as Box<dyn FrameCodec>);
        Flywheel::new(self.config, transport, codec, self.callback)
    }
}

impl Default for FlywheelBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "native")]
fn default_transport(config: &FlywheelConfig) -> Result<Box<dyn SerialAdapter>, DriverError> {
    if config.port.is_empty() {
        return Err(DriverError::InvalidConfig(
            "port must be set when no transport is supplied".to_string(),
        ));
    }
    Ok(Box::new(SerialPortAdapter::new(
        config.port.clone(),
        config.baud_rate,
    )))
}

#[cfg(not(feature = "native"))]
fn default_transport(_config: &FlywheelConfig) -> Result<Box<dyn SerialAdapter>, DriverError> {
    Err(DriverError::InvalidConfig(
        "no transport supplied and the `native` feature is disabled".to_string(),
    ))
}
