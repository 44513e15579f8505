//! 停止信号与固定频率节拍器
//!
//! 两个工作线程只通过命令队列和同一个 [`ShutdownSignal`] 协作。
//! 信号内部持有一个永远不发送消息的 crossbeam 通道：`trigger()` 丢弃发送端，
//! 所有阻塞在 `recv_timeout` 上的线程立即被唤醒，不必等满一个周期。

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::trace;

/// 剩余等待时间低于此值时改用 spin_sleep，保证亚毫秒精度
const SPIN_THRESHOLD: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    triggered: Arc<AtomicBool>,
    sender: Arc<Mutex<Option<Sender<()>>>>,
    receiver: Receiver<()>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (sender, receiver) = crossbeam_channel::bounded(0);
        Self {
            triggered: Arc::new(AtomicBool::new(false)),
            sender: Arc::new(Mutex::new(Some(sender))),
            receiver,
        }
    }

    /// 触发停止（幂等）
    pub fn trigger(&self) {
        // Release: 之前的写入对看到 true 的线程可见
        self.triggered.store(true, Ordering::Release);
        self.sender.lock().take();
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::Acquire)
    }

    /// 最多等待 `timeout`；停止信号触发时提前返回 `true`
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        match self.receiver.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => self.is_triggered(),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// 固定频率节拍器
///
/// 截止时间按 `next += period` 推进；错过的截止时间直接跳过，不补发。
/// 第一次节拍发生在创建后一个周期。
#[derive(Debug)]
pub struct Ticker {
    period: Duration,
    next: Instant,
    skipped: u64,
}

impl Ticker {
    pub fn new(period: Duration) -> Self {
        let period = period.max(Duration::from_micros(1));
        Self {
            period,
            next: Instant::now() + period,
            skipped: 0,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// 累计跳过的截止时间数
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// 等待下一个节拍
    ///
    /// 返回 `false` 表示停止信号已触发，调用方应退出循环。
    pub fn wait(&mut self, shutdown: &ShutdownSignal) -> bool {
        let now = Instant::now();
        if self.next > now {
            let remaining = self.next - now;
            if remaining > SPIN_THRESHOLD && shutdown.wait_timeout(remaining - SPIN_THRESHOLD) {
                return false;
            }
            let now = Instant::now();
            if self.next > now {
                spin_sleep::sleep(self.next - now);
            }
        }
        if shutdown.is_triggered() {
            return false;
        }

        self.next += self.period;
        let now = Instant::now();
        if self.next <= now {
            let behind = now - self.next;
            let missed = (behind.as_nanos() / self.period.as_nanos()) as u64 + 1;
            self.next += self.period * missed.min(u64::from(u32::MAX)) as u32;
            self.skipped += missed;
            trace!("Ticker: skipped {} missed deadline(s)", missed);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_trigger_is_idempotent() {
        let signal = ShutdownSignal::new();
        assert!(!signal.is_triggered());
        signal.trigger();
        signal.trigger();
        assert!(signal.is_triggered());
        assert!(signal.wait_timeout(Duration::from_secs(10)));
    }

    #[test]
    fn test_trigger_wakes_sleeping_waiter() {
        let signal = ShutdownSignal::new();
        let waiter = signal.clone();
        let start = Instant::now();
        let handle = thread::spawn(move || waiter.wait_timeout(Duration::from_secs(10)));
        thread::sleep(Duration::from_millis(20));
        signal.trigger();
        assert!(handle.join().unwrap());
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_wait_timeout_without_trigger() {
        let signal = ShutdownSignal::new();
        assert!(!signal.wait_timeout(Duration::from_millis(5)));
    }

    #[test]
    fn test_ticker_first_tick_after_one_period() {
        let signal = ShutdownSignal::new();
        let mut ticker = Ticker::new(Duration::from_millis(20));
        let start = Instant::now();
        assert!(ticker.wait(&signal));
        assert!(start.elapsed() >= Duration::from_millis(19));
    }

    #[test]
    fn test_ticker_rate() {
        let signal = ShutdownSignal::new();
        let mut ticker = Ticker::new(Duration::from_millis(5));
        let start = Instant::now();
        for _ in 0..10 {
            assert!(ticker.wait(&signal));
        }
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(49), "{:?}", elapsed);
        assert!(elapsed < Duration::from_millis(500), "{:?}", elapsed);
    }

    #[test]
    fn test_ticker_skips_missed_deadlines() {
        let signal = ShutdownSignal::new();
        let mut ticker = Ticker::new(Duration::from_millis(2));
        thread::sleep(Duration::from_millis(20));
        assert!(ticker.wait(&signal));
        assert!(ticker.skipped() >= 5);
    }

    #[test]
    fn test_ticker_stops_on_shutdown() {
        let signal = ShutdownSignal::new();
        let mut ticker = Ticker::new(Duration::from_secs(5));
        let trigger = signal.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            trigger.trigger();
        });
        let start = Instant::now();
        assert!(!ticker.wait(&signal));
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}
