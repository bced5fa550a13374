//! 首页闸门：一次性广播信号，只有第 0 个位置的任务会打开它。

use std::sync::{Condvar, Mutex};

#[derive(Default)]
pub(crate) struct FirstUnitGate {
    opened: Mutex<bool>,
    cv: Condvar,
}

impl FirstUnitGate {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn open(&self) {
        let mut opened = self.opened.lock().unwrap_or_else(|e| e.into_inner());
        if !*opened {
            *opened = true;
            self.cv.notify_all();
        }
    }

    pub(crate) fn wait(&self) {
        let mut opened = self.opened.lock().unwrap_or_else(|e| e.into_inner());
        while !*opened {
            opened = self.cv.wait(opened).unwrap_or_else(|e| e.into_inner());
        }
    }

    #[cfg(test)]
    pub(crate) fn is_open(&self) -> bool {
        *self.opened.lock().unwrap_or_else(|e| e.into_inner())
    }
}
