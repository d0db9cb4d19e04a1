//! # 时钟淘汰
//!
//! 指针在槽位上循环移动：被访问过的槽位清除访问标记后放过，
//! 未被访问且没有活跃持有者的槽位被选为牺牲者。
//! 正在被读写的槽位直接跳过，也不清除它的访问标记。
//!
//! 每走一步都会清掉途经槽位的访问标记，因此只要存在空闲槽位，
//! 至多两圈就能选出牺牲者。

use spin::MutexGuard;

use crate::entry::{CacheEntry, EntryMeta};

#[derive(Debug)]
pub struct Clock {
    hand: usize,
}

impl Clock {
    pub const fn new() -> Self {
        Self { hand: 0 }
    }

    #[inline]
    pub fn hand(&self) -> usize {
        self.hand
    }

    /// 选出牺牲槽位，返回时仍持有它的锁，调用者在同一临界区内占有它。
    ///
    /// 扫描两圈仍未找到说明所有槽位都被占用，返回 `None`。
    pub fn select<'a>(
        &mut self,
        entries: &'a [CacheEntry],
    ) -> Option<(usize, MutexGuard<'a, EntryMeta>)> {
        let capacity = entries.len();
        for _ in 0..2 * capacity {
            let index = self.hand;
            self.hand = (self.hand + 1) % capacity;

            let mut meta = entries[index].meta.lock();
            if !meta.is_idle() {
                continue;
            }
            if meta.second_chance() {
                continue;
            }
            return Some((index, meta));
        }
        None
    }
}
