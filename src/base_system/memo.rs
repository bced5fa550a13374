//! 计算一次、永久缓存的值容器。
//!
//! 第一个调用者触发计算，并发调用者阻塞等待同一次计算结果；计算失败不缓存，
//! 下一次调用会重新计算。

use std::sync::{Condvar, Mutex, MutexGuard};

enum Slot<T> {
    Empty,
    Running,
    Ready(T),
}

pub struct Memo<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
}

impl<T> Default for Memo<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Memo<T> {
    pub const fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::Empty),
            ready: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.lock(), Slot::Ready(_))
    }
}

impl<T: Clone> Memo<T> {
    pub fn get_or_try_init<E, F>(&self, init: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let mut slot = self.lock();
        loop {
            if let Slot::Ready(v) = &*slot {
                return Ok(v.clone());
            }
            if !matches!(*slot, Slot::Running) {
                break;
            }
            slot = self.ready.wait(slot).unwrap_or_else(|e| e.into_inner());
        }
        *slot = Slot::Running;
        drop(slot);

        // init 若 panic，守卫把状态复位为 Empty 并唤醒等待者。
        let mut reset = ResetOnDrop {
            memo: self,
            armed: true,
        };
        let result = init();
        reset.armed = false;

        let mut slot = self.lock();
        *slot = match &result {
            Ok(v) => Slot::Ready(v.clone()),
            Err(_) => Slot::Empty,
        };
        drop(slot);
        self.ready.notify_all();
        result
    }
}

struct ResetOnDrop<'a, T> {
    memo: &'a Memo<T>,
    armed: bool,
}

impl<T> Drop for ResetOnDrop<'_, T> {
    fn drop(&mut self) {
        if self.armed {
            *self.memo.lock() = Slot::Empty;
            self.memo.ready.notify_all();
        }
    }
}
