//! 启动协调与节拍信号
//!
//! 一次性就绪标志（预填充完成、流结束）与单槽节拍标志。
//! 互斥量中毒意味着持锁线程已 panic，协调原语失去可信度，
//! 上层将其作为致命错误处理。

use std::sync::{Condvar, Mutex};

use thiserror::Error;

/// 协调原语失效
#[derive(Debug, Error)]
#[error("synchronization primitive poisoned: {0}")]
pub struct SyncError(pub &'static str);

/// 一次性就绪标志
///
/// false→true 恰好一次，由产生线程置位，其他线程等待。
/// 等待不设超时：上游缺陷应表现为可见的挂起，而非静默成功。
pub struct ReadyFlag {
    name: &'static str,
    state: Mutex<bool>,
    cond: Condvar,
}

impl ReadyFlag {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    /// 置位并唤醒所有等待者（重复置位幂等）
    pub fn set(&self) -> Result<(), SyncError> {
        let mut ready = self.state.lock().map_err(|_| SyncError(self.name))?;
        *ready = true;
        self.cond.notify_all();
        Ok(())
    }

    /// 阻塞直到置位
    pub fn wait(&self) -> Result<(), SyncError> {
        let mut ready = self.state.lock().map_err(|_| SyncError(self.name))?;
        while !*ready {
            ready = self.cond.wait(ready).map_err(|_| SyncError(self.name))?;
        }
        Ok(())
    }

    pub fn is_set(&self) -> Result<bool, SyncError> {
        Ok(*self.state.lock().map_err(|_| SyncError(self.name))?)
    }
}

/// 单槽节拍标志
///
/// 节拍不排队：未被消费前的再次触发只是重新置位。
/// 慢消费者丢失节拍粒度，但永远欠账不超过一个节拍，不会死锁。
pub struct TickSignal {
    pending: Mutex<bool>,
    cond: Condvar,
}

impl TickSignal {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    /// 触发一个节拍
    pub fn raise(&self) -> Result<(), SyncError> {
        let mut pending = self.pending.lock().map_err(|_| SyncError("tick"))?;
        *pending = true;
        self.cond.notify_one();
        Ok(())
    }

    /// 等待下一个节拍并清除标志
    pub fn next_tick(&self) -> Result<(), SyncError> {
        let mut pending = self.pending.lock().map_err(|_| SyncError("tick"))?;
        while !*pending {
            pending = self.cond.wait(pending).map_err(|_| SyncError("tick"))?;
        }
        *pending = false;
        Ok(())
    }
}

impl Default for TickSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_ready_flag_set_before_wait() {
        let flag = ReadyFlag::new("test");
        flag.set().unwrap();
        flag.wait().unwrap();
        assert!(flag.is_set().unwrap());
    }

    #[test]
    fn test_ready_flag_releases_cross_thread_waiter() {
        let flag = Arc::new(ReadyFlag::new("test"));
        let waiter_flag = Arc::clone(&flag);

        let waiter = thread::spawn(move || waiter_flag.wait());

        flag.set().unwrap();
        waiter.join().unwrap().unwrap();
    }

    #[test]
    fn test_ready_flag_set_is_idempotent() {
        let flag = ReadyFlag::new("test");
        flag.set().unwrap();
        flag.set().unwrap();
        assert!(flag.is_set().unwrap());
    }

    #[test]
    fn test_tick_coalescing() {
        let tick = TickSignal::new();

        // 两次触发合并为一个待处理节拍
        tick.raise().unwrap();
        tick.raise().unwrap();

        tick.next_tick().unwrap();
        assert!(!*tick.pending.lock().unwrap());
    }

    #[test]
    fn test_tick_wakes_cross_thread_waiter() {
        let tick = Arc::new(TickSignal::new());
        let waiter_tick = Arc::clone(&tick);

        let waiter = thread::spawn(move || waiter_tick.next_tick());

        tick.raise().unwrap();
        waiter.join().unwrap().unwrap();
    }
}
