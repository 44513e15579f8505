//! 顶层导出测试
//!
//! 确认 facade 与 prelude 导出的类型可以直接组合使用。

use flywheel_sdk::prelude::*;
use flywheel_sdk::serial::MockSerialAdapter;
use std::time::{Duration, Instant};

#[test]
fn test_prelude_builds_working_controller() {
    flywheel_sdk::init_logger_with_default("warn");
    // 第二次调用不应 panic
    flywheel_sdk::init_logger();

    let (adapter, _handle) = MockSerialAdapter::with_simulator("mock0", 115_200);
    let flywheel: Flywheel = FlywheelBuilder::new()
        .communication_frequency(200.0)
        .transport(Box::new(adapter))
        .build()
        .unwrap();

    flywheel.connect().unwrap();
    flywheel.start().unwrap();
    flywheel.set_current(120.0).unwrap();
    flywheel.poll_telemetry().unwrap();

    let deadline = Instant::now() + Duration::from_secs(1);
    while flywheel.latest_telemetry().is_none() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    let telemetry: std::sync::Arc<Telemetry> = flywheel.latest_telemetry().unwrap();
    assert_eq!(telemetry.current_ma, 120.0);
    assert_eq!(flywheel.control_mode(), Some(ControlMode::Current));
    assert_eq!(flywheel.state(), ConnectionState::Running);

    flywheel.disconnect().unwrap();
}

#[test]
fn test_module_paths() {
    let command = flywheel_sdk::protocol::Command::set_speed(10.0);
    assert_eq!(
        flywheel_sdk::protocol::encode_command(&command)[..2],
        flywheel_sdk::protocol::FRAME_HEADER
    );
    let config = flywheel_sdk::driver::FlywheelConfig::new("COM3", 9600);
    assert!(config.validate().is_ok());
    let err: DriverError = flywheel_sdk::driver::FlywheelBuilder::new()
        .queue_size(0)
        .build()
        .unwrap_err();
    assert!(matches!(err, DriverError::InvalidConfig(_)));
}
