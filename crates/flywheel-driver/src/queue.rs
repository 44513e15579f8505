//! 有界命令队列（满时丢弃最旧命令）
//!
//! 轮询线程与控制 API 是生产者，通信线程是唯一消费者。
//! `push` 从不阻塞：队列已满时先弹出最旧的一条，再追加新命令，
//! 两步在同一把锁内完成。

use flywheel_protocol::Command;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// `push` 的结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PushOutcome {
    /// 直接入队
    Queued,
    /// 队列已满，返回被挤掉的最旧命令
    Evicted(Command),
}

impl PushOutcome {
    pub fn evicted(&self) -> Option<&Command> {
        match self {
            PushOutcome::Queued => None,
            PushOutcome::Evicted(cmd) => Some(cmd),
        }
    }
}

#[derive(Debug)]
pub struct CommandQueue {
    inner: Mutex<VecDeque<Command>>,
    capacity: usize,
}

impl CommandQueue {
    /// 创建队列；容量至少为 1
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn push(&self, command: Command) -> PushOutcome {
        let mut queue = self.inner.lock();
        let outcome = if queue.len() >= self.capacity {
            match queue.pop_front() {
                Some(oldest) => PushOutcome::Evicted(oldest),
                None => PushOutcome::Queued,
            }
        } else {
            PushOutcome::Queued
        };
        queue.push_back(command);
        outcome
    }

    /// 非阻塞出队（FIFO）
    pub fn try_pop(&self) -> Option<Command> {
        self.inner.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 清空队列，返回被丢弃的命令数
    pub fn clear(&self) -> usize {
        let mut queue = self.inner.lock();
        let dropped = queue.len();
        queue.clear();
        dropped
    }
}
