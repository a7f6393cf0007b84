use std::collections::VecDeque;

use crate::error::{OrFatal, ReclaimError};

/// 等待回收的条目：退休时的帧号 + 被回收的对象
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetirementEntry<T> {
    pub frame_index: u64,
    pub payload: T,
}

/// 按帧号排序的回收队列
///
/// 条目只能以非递减的帧号追加，所以队首一定是最早退休的条目。
/// 回收时从队首开始弹出，遇到第一个还不安全的条目就停下，不需要检查后面的条目。
#[derive(Debug)]
pub struct RetireQueue<T> {
    entries: VecDeque<RetirementEntry<T>>,
}
impl<T> Default for RetireQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
// new & init
impl<T> RetireQueue<T> {
    #[inline]
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }
}
// getters
impl<T> RetireQueue<T> {
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
    /// 队尾的帧号，也就是最近一次退休的帧
    #[inline]
    pub fn last_frame(&self) -> Option<u64> {
        self.entries.back().map(|entry| entry.frame_index)
    }
    #[inline]
    pub fn front_frame(&self) -> Option<u64> {
        self.entries.front().map(|entry| entry.frame_index)
    }
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &RetirementEntry<T>> {
        self.entries.iter()
    }
}
// update
impl<T> RetireQueue<T> {
    #[inline]
    pub fn push(&mut self, frame_index: u64, payload: T) {
        self.try_push(frame_index, payload).or_fatal()
    }

    pub fn try_push(&mut self, frame_index: u64, payload: T) -> Result<(), ReclaimError> {
        if let Some(last) = self.last_frame() {
            if frame_index < last {
                return Err(ReclaimError::RetireOrder {
                    frame: frame_index,
                    last,
                });
            }
        }
        self.entries.push_back(RetirementEntry { frame_index, payload });
        Ok(())
    }

    /// 如果队首的条目已经可以回收，弹出它
    ///
    /// `is_ready` 接收条目的退休帧号
    #[inline]
    pub fn pop_ready(&mut self, is_ready: impl Fn(u64) -> bool) -> Option<RetirementEntry<T>> {
        if is_ready(self.front_frame()?) { self.entries.pop_front() } else { None }
    }

    /// 无条件地取出所有条目，只在 GPU 空闲时使用
    #[inline]
    pub fn drain_all(&mut self) -> impl Iterator<Item = RetirementEntry<T>> + '_ {
        self.entries.drain(..)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pop_stops_at_first_unready_entry() {
        let mut queue = RetireQueue::new();
        queue.push(3, "a");
        queue.push(5, "b");
        queue.push(5, "c");
        queue.push(7, "d");

        let mut popped = Vec::new();
        while let Some(entry) = queue.pop_ready(|frame| frame <= 5) {
            popped.push(entry.payload);
        }
        assert_eq!(popped, vec!["a", "b", "c"]);
        assert_eq!(queue.front_frame(), Some(7));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_pop_never_skips_the_head() {
        let mut queue = RetireQueue::new();
        queue.push(2, 0);
        queue.push(9, 1);
        // 只有后面的条目"满足"条件，也不能越过队首
        assert!(queue.pop_ready(|frame| frame == 9).is_none());
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_decreasing_push_is_rejected() {
        let mut queue = RetireQueue::new();
        queue.push(4, ());
        assert_eq!(queue.try_push(3, ()), Err(ReclaimError::RetireOrder { frame: 3, last: 4 }));
        assert!(queue.try_push(4, ()).is_ok());
    }

    #[test]
    #[should_panic(expected = "retire queue order violated")]
    fn test_decreasing_push_is_fatal() {
        let mut queue = RetireQueue::new();
        queue.push(4, ());
        queue.push(1, ());
    }

    #[test]
    fn test_drain_all_ignores_frames() {
        let mut queue = RetireQueue::new();
        queue.push(1, 'x');
        queue.push(100, 'y');
        let drained: Vec<_> = queue.drain_all().map(|entry| entry.payload).collect();
        assert_eq!(drained, vec!['x', 'y']);
        assert!(queue.is_empty());
    }
}
