//! 驱动指标
//!
//! 原子计数器，任何线程都可以无锁读取。

use std::sync::atomic::{AtomicU64, Ordering};

/// 驱动实时指标
///
/// ```rust
/// use flywheel_driver::DriverMetrics;
/// use std::sync::atomic::Ordering;
///
/// let metrics = DriverMetrics::new();
/// metrics.commands_sent.fetch_add(1, Ordering::Relaxed);
/// assert_eq!(metrics.snapshot().commands_sent, 1);
/// ```
#[derive(Debug, Default)]
pub struct DriverMetrics {
    /// 控制 API 入队的命令数（不含自动轮询）
    pub commands_enqueued: AtomicU64,
    /// 轮询线程入队的轮询命令数
    pub polls_enqueued: AtomicU64,
    /// 因队列已满被丢弃的最旧命令数
    ///
    /// 持续增长说明通信频率跟不上轮询频率。
    pub queue_evictions: AtomicU64,
    /// 成功写出的命令帧数
    pub commands_sent: AtomicU64,
    /// 解出的遥测帧数
    pub telemetry_frames: AtomicU64,
    /// 解出的应答帧数
    pub acks_received: AtomicU64,
    /// 响应超时次数
    pub response_timeouts: AtomicU64,
    /// 响应帧无效次数（校验和 / 帧头）
    pub decode_errors: AtomicU64,
    /// 写失败次数
    pub write_errors: AtomicU64,
    /// 读失败次数（超时除外）
    pub read_errors: AtomicU64,
    /// 回调返回错误或 panic 的次数
    pub callback_errors: AtomicU64,
    /// 队列为空的通信节拍数
    pub idle_ticks: AtomicU64,
}

impl DriverMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            commands_enqueued: self.commands_enqueued.load(Ordering::Relaxed),
            polls_enqueued: self.polls_enqueued.load(Ordering::Relaxed),
            queue_evictions: self.queue_evictions.load(Ordering::Relaxed),
            commands_sent: self.commands_sent.load(Ordering::Relaxed),
            telemetry_frames: self.telemetry_frames.load(Ordering::Relaxed),
            acks_received: self.acks_received.load(Ordering::Relaxed),
            response_timeouts: self.response_timeouts.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
            callback_errors: self.callback_errors.load(Ordering::Relaxed),
            idle_ticks: self.idle_ticks.load(Ordering::Relaxed),
        }
    }

    /// 重置所有计数器
    pub fn reset(&self) {
        for counter in [
            &self.commands_enqueued,
            &self.polls_enqueued,
            &self.queue_evictions,
            &self.commands_sent,
            &self.telemetry_frames,
            &self.acks_received,
            &self.response_timeouts,
            &self.decode_errors,
            &self.write_errors,
            &self.read_errors,
            &self.callback_errors,
            &self.idle_ticks,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// 指标快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct MetricsSnapshot {
    pub commands_enqueued: u64,
    pub polls_enqueued: u64,
    pub queue_evictions: u64,
    pub commands_sent: u64,
    pub telemetry_frames: u64,
    pub acks_received: u64,
    pub response_timeouts: u64,
    pub decode_errors: u64,
    pub write_errors: u64,
    pub read_errors: u64,
    pub callback_errors: u64,
    pub idle_ticks: u64,
}

impl MetricsSnapshot {
    /// 通信错误总数（超时 + 无效帧 + 读写失败）
    pub fn communication_errors(&self) -> u64 {
        self.response_timeouts + self.decode_errors + self.write_errors + self.read_errors
    }

    /// 已发送命令中得到有效响应的比例（百分比）
    ///
    /// 没有发送过命令时返回 0.0。
    pub fn response_rate(&self) -> f64 {
        if self.commands_sent == 0 {
            return 0.0;
        }
        ((self.telemetry_frames + self.acks_received) as f64 / self.commands_sent as f64) * 100.0
    }
}
