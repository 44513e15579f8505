//! 遥测存储
//!
//! - `current` / `previous`：通过 `ArcSwap` 发布，读取方无锁
//! - `history`：固定容量的最近窗口，满时按 FIFO 淘汰
//!
//! 只有通信线程写入；任何线程都可以读取。

use arc_swap::ArcSwapOption;
use flywheel_protocol::Telemetry;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;

/// 一次写入后的 (当前, 上一帧) 对，用于回调分发
#[derive(Debug, Clone)]
pub struct TelemetryPair {
    pub current: Arc<Telemetry>,
    pub previous: Option<Arc<Telemetry>>,
}

#[derive(Debug)]
pub struct TelemetryStore {
    current: ArcSwapOption<Telemetry>,
    previous: ArcSwapOption<Telemetry>,
    history: RwLock<VecDeque<Arc<Telemetry>>>,
    max_size: usize,
}

impl TelemetryStore {
    /// `max_size` 至少为 1
    pub fn new(max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            current: ArcSwapOption::empty(),
            previous: ArcSwapOption::empty(),
            history: RwLock::new(VecDeque::with_capacity(max_size.min(4096))),
            max_size,
        }
    }

    /// 写入新的一帧，旧的 current 变为 previous
    pub fn push(&self, telemetry: Telemetry) -> TelemetryPair {
        let current = Arc::new(telemetry);
        let previous = self.current.swap(Some(current.clone()));
        self.previous.store(previous.clone());

        let mut history = self.history.write();
        if history.len() >= self.max_size {
            history.pop_front();
        }
        history.push_back(current.clone());

        TelemetryPair { current, previous }
    }

    pub fn current(&self) -> Option<Arc<Telemetry>> {
        self.current.load_full()
    }

    pub fn previous(&self) -> Option<Arc<Telemetry>> {
        self.previous.load_full()
    }

    /// 历史窗口快照（按时间先后）
    pub fn history(&self) -> Vec<Arc<Telemetry>> {
        self.history.read().iter().cloned().collect()
    }

    /// 历史窗口快照（拷贝值，便于序列化）
    pub fn snapshot(&self) -> Vec<Telemetry> {
        self.history.read().iter().map(|t| **t).collect()
    }

    pub fn len(&self) -> usize {
        self.history.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.read().is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn clear(&self) {
        self.current.store(None);
        self.previous.store(None);
        self.history.write().clear();
    }
}
