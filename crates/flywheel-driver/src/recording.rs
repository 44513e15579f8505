//! 遥测录制
//!
//! - [`TelemetryRecorder`]：基于有界 Channel 的录制钩子，队列满时丢帧而非阻塞通信线程
//! - [`save_telemetry_json`] / [`load_telemetry_json`]：把一段遥测写成 JSON 数组
//!
//! ```rust
//! use flywheel_driver::recording::TelemetryRecorder;
//! use flywheel_driver::hooks::TelemetryCallback;
//! use std::sync::Arc;
//!
//! let (recorder, rx) = TelemetryRecorder::new(1024);
//! let dropped = recorder.dropped_frames().clone();
//! let hook = Arc::new(recorder) as Arc<dyn TelemetryCallback>;
//!
//! std::thread::spawn(move || {
//!     while let Ok(t) = rx.recv() {
//!         println!("{} rpm", t.speed_rpm);
//!     }
//! });
//! # drop(hook);
//! println!("dropped {}", dropped.load(std::sync::atomic::Ordering::Relaxed));
//! ```

use crate::error::{CallbackError, DriverError};
use crate::hooks::TelemetryCallback;
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use flywheel_protocol::Telemetry;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// 默认队列容量（200 Hz 下约 5 分钟）
pub const DEFAULT_RECORDING_CAPACITY: usize = 60_000;

pub struct TelemetryRecorder {
    tx: Sender<Telemetry>,
    dropped_frames: Arc<AtomicU64>,
    frame_counter: Arc<AtomicU64>,
}

impl TelemetryRecorder {
    #[must_use]
    pub fn new(capacity: usize) -> (Self, Receiver<Telemetry>) {
        let (tx, rx) = bounded(capacity.max(1));
        let recorder = Self {
            tx,
            dropped_frames: Arc::new(AtomicU64::new(0)),
            frame_counter: Arc::new(AtomicU64::new(0)),
        };
        (recorder, rx)
    }

    /// 丢帧计数器（队列满）
    pub fn dropped_frames(&self) -> &Arc<AtomicU64> {
        &self.dropped_frames
    }

    /// 成功入队的帧数
    pub fn frame_counter(&self) -> &Arc<AtomicU64> {
        &self.frame_counter
    }
}

impl TelemetryCallback for TelemetryRecorder {
    fn on_telemetry(
        &self,
        current: &Telemetry,
        _previous: Option<&Telemetry>,
    ) -> Result<(), CallbackError> {
        match self.tx.try_send(*current) {
            Ok(()) => {
                self.frame_counter.fetch_add(1, Ordering::Relaxed);
                Ok(())
            },
            Err(TrySendError::Full(_)) => {
                self.dropped_frames.fetch_add(1, Ordering::Relaxed);
                Ok(())
            },
            // 接收端已关闭，录制结束，不算回调失败
            Err(TrySendError::Disconnected(_)) => Ok(()),
        }
    }
}

/// 取出接收端中当前已有的全部遥测（不阻塞）
pub fn drain(rx: &Receiver<Telemetry>) -> Vec<Telemetry> {
    rx.try_iter().collect()
}

/// 将遥测序列写成 JSON 数组
pub fn save_telemetry_json(
    path: impl AsRef<Path>,
    telemetry: &[Telemetry],
) -> Result<(), DriverError> {
    let path = path.as_ref();
    let file = File::create(path)
        .map_err(|e| DriverError::Recording(format!("{}: {}", path.display(), e)))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, telemetry)
        .map_err(|e| DriverError::Recording(e.to_string()))?;
    writer
        .flush()
        .map_err(|e| DriverError::Recording(e.to_string()))?;
    info!("Saved {} telemetry frames to {}", telemetry.len(), path.display());
    Ok(())
}

/// 读取 [`save_telemetry_json`] 写出的文件
pub fn load_telemetry_json(path: impl AsRef<Path>) -> Result<Vec<Telemetry>, DriverError> {
    let path = path.as_ref();
    let file = File::open(path)
        .map_err(|e| DriverError::Recording(format!("{}: {}", path.display(), e)))?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| DriverError::Recording(e.to_string()))
}
