//! 重排缓冲区：按序列位置暂存提前到达的页面，只放出下一个期望位置。

use std::collections::HashMap;

use super::models::UnitIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insert {
    Buffered,
    Duplicate,
    /// 已经写出的位置
    Stale,
    OutOfRange,
}

#[derive(Debug)]
pub struct ReorderBuffer<T> {
    pending: HashMap<UnitIndex, T>,
    next: UnitIndex,
    total: usize,
    peak: usize,
}

impl<T> ReorderBuffer<T> {
    pub fn new(total: usize) -> Self {
        Self {
            pending: HashMap::new(),
            next: 0,
            total,
            peak: 0,
        }
    }

    pub fn insert(&mut self, index: UnitIndex, item: T) -> Insert {
        if index >= self.total {
            return Insert::OutOfRange;
        }
        if index < self.next {
            return Insert::Stale;
        }
        if self.pending.contains_key(&index) {
            return Insert::Duplicate;
        }
        self.pending.insert(index, item);
        self.peak = self.peak.max(self.pending.len());
        Insert::Buffered
    }

    /// 若缓冲区中有下一个期望位置，取出并推进游标。取出后缓冲区不再持有它。
    pub fn pop_ready(&mut self) -> Option<(UnitIndex, T)> {
        let item = self.pending.remove(&self.next)?;
        let index = self.next;
        self.next += 1;
        Some((index, item))
    }

    pub fn next_expected(&self) -> UnitIndex {
        self.next
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn peak(&self) -> usize {
        self.peak
    }

    pub fn is_complete(&self) -> bool {
        self.next >= self.total
    }
}
