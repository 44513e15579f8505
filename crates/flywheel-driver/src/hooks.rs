//! 遥测回调分发
//!
//! 每解出一帧遥测，通信线程同步调用一次用户回调，再依次调用附加钩子（如录制）。
//!
//! # 约束
//!
//! - 回调在通信线程上执行，同一时刻至多一个回调在运行
//! - 慢回调会推迟后续通信节拍（节拍器跳过错过的截止时间，不补发）
//! - 回调返回的错误和 panic 都被捕获并记录，通信线程继续运行
//!
//! ```rust
//! use flywheel_driver::hooks::{CallbackDispatcher, TelemetryCallback};
//! use flywheel_protocol::Telemetry;
//! use std::sync::Arc;
//!
//! let dispatcher = CallbackDispatcher::new(Some(Arc::new(
//!     |current: &Telemetry, previous: Option<&Telemetry>| {
//!         println!("{} rpm (previous: {:?})", current.speed_rpm, previous.map(|p| p.speed_rpm));
//!     },
//! )));
//! assert_eq!(dispatcher.dispatch(&Telemetry::default(), None), 0);
//! ```

use crate::error::CallbackError;
use flywheel_protocol::Telemetry;
use parking_lot::RwLock;
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tracing::error;

/// 遥测回调
///
/// `previous` 为 `None` 表示这是本次会话解出的第一帧。
pub trait TelemetryCallback: Send + Sync {
    fn on_telemetry(
        &self,
        current: &Telemetry,
        previous: Option<&Telemetry>,
    ) -> Result<(), CallbackError>;
}

impl<F> TelemetryCallback for F
where
    F: Fn(&Telemetry, Option<&Telemetry>) + Send + Sync,
{
    fn on_telemetry(
        &self,
        current: &Telemetry,
        previous: Option<&Telemetry>,
    ) -> Result<(), CallbackError> {
        self(current, previous);
        Ok(())
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// 回调分发器：一个用户回调 + 任意个附加钩子
#[derive(Default)]
pub struct CallbackDispatcher {
    callback: Option<Arc<dyn TelemetryCallback>>,
    hooks: RwLock<Vec<Arc<dyn TelemetryCallback>>>,
}

impl CallbackDispatcher {
    pub fn new(callback: Option<Arc<dyn TelemetryCallback>>) -> Self {
        Self {
            callback,
            hooks: RwLock::new(Vec::new()),
        }
    }

    pub fn add_hook(&self, hook: Arc<dyn TelemetryCallback>) {
        self.hooks.write().push(hook);
    }

    pub fn clear_hooks(&self) {
        self.hooks.write().clear();
    }

    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }

    pub fn hook_count(&self) -> usize {
        self.hooks.read().len()
    }

    /// 依次调用用户回调和所有钩子，返回失败的个数
    pub fn dispatch(&self, current: &Telemetry, previous: Option<&Telemetry>) -> usize {
        // 拷贝一份列表再调用，回调内部可以安全地 add_hook
        let hooks: Vec<Arc<dyn TelemetryCallback>> = self.hooks.read().clone();

        let mut failures = 0;
        for callback in self.callback.iter().chain(hooks.iter()) {
            if Self::invoke(callback.as_ref(), current, previous).is_err() {
                failures += 1;
            }
        }
        failures
    }

    fn invoke(
        callback: &dyn TelemetryCallback,
        current: &Telemetry,
        previous: Option<&Telemetry>,
    ) -> Result<(), CallbackError> {
        let result = catch_unwind(AssertUnwindSafe(|| callback.on_telemetry(current, previous)))
            .unwrap_or_else(|payload| {
                Err(CallbackError::new(format!(
                    "callback panicked: {}",
                    panic_message(payload)
                )))
            });
        if let Err(e) = &result {
            error!("Telemetry callback failed: {}", e);
        }
        result
    }
}
