//! 缓存槽位

use alloc::boxed::Box;
use alloc::vec;
use core::cell::UnsafeCell;

use enumflags2::{BitFlags, bitflags};
use spin::Mutex;

use crate::config::SECTOR_SIZE;
use crate::monitor::{Admission, Monitor};
use crate::sector::SectorId;

#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryFlag {
    /// 上次时钟扫过之后被访问过
    Accessed = 0b01,
    /// 内存中的数据尚未写回设备
    Dirty = 0b10,
}

/// 槽位生命周期
///
/// ```text
/// Invalid ──> Loading ──> Resident ──> Flushing ──> Loading ...
///                │            │            │
///                └─> Invalid  └─> Invalid  └─> Resident (写回失败)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// 空槽位，不对应任何扇区
    Invalid,
    /// 已分配给新扇区，数据尚未就绪
    Loading,
    /// 数据与扇区对应，可以命中
    Resident,
    /// 正在把旧扇区写回设备
    Flushing,
}

/// 槽位的元数据，全部由槽位锁保护
#[derive(Debug)]
pub struct EntryMeta {
    sector: SectorId,
    /// 处于 `Flushing` 时，写回完成后将要装入的扇区
    pending: SectorId,
    state: SlotState,
    flags: BitFlags<EntryFlag>,
    monitor: Monitor,
}

/// 淘汰一个槽位前记录的旧住户
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Eviction {
    pub victim: SectorId,
    /// 旧住户是脏的，必须先写回
    pub write_back: bool,
}

impl EntryMeta {
    const fn new() -> Self {
        Self {
            sector: SectorId::EMPTY,
            pending: SectorId::EMPTY,
            state: SlotState::Invalid,
            flags: BitFlags::EMPTY,
            monitor: Monitor::new(),
        }
    }

    #[inline]
    pub fn sector(&self) -> SectorId {
        self.sector
    }

    #[inline]
    pub fn state(&self) -> SlotState {
        self.state
    }

    #[cfg(test)]
    pub fn flags(&self) -> BitFlags<EntryFlag> {
        self.flags
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.flags.contains(EntryFlag::Dirty)
    }

    #[inline]
    pub fn is_accessed(&self) -> bool {
        self.flags.contains(EntryFlag::Accessed)
    }

    /// 只有已就绪的槽位才算命中
    #[inline]
    pub fn holds(&self, sector: SectorId) -> bool {
        self.state == SlotState::Resident && self.sector == sector
    }

    /// 槽位正在为 `sector` 装载（包括先写回旧住户的阶段）
    #[inline]
    pub fn claims(&self, sector: SectorId) -> bool {
        match self.state {
            SlotState::Loading => self.sector == sector,
            SlotState::Flushing => self.pending == sector,
            SlotState::Invalid | SlotState::Resident => false,
        }
    }

    /// 时钟扫描经过此槽位：被访问过则清除标记给予第二次机会
    pub fn second_chance(&mut self) -> bool {
        let accessed = self.is_accessed();
        self.flags.remove(EntryFlag::Accessed);
        accessed
    }

    pub fn mark(&mut self, flags: BitFlags<EntryFlag>) {
        debug_assert!(
            !flags.contains(EntryFlag::Dirty) || self.state == SlotState::Resident,
            "dirtying a slot that is not resident"
        );
        self.flags |= flags;
    }

    pub fn clear_dirty(&mut self) {
        self.flags.remove(EntryFlag::Dirty);
    }

    /// 把槽位交给 `next`，调用者必须已经以写者身份占有槽位
    pub fn begin_evict(&mut self, next: SectorId) -> Eviction {
        debug_assert_eq!(1, self.monitor.active_writers());
        let eviction = Eviction {
            victim: self.sector,
            write_back: self.state == SlotState::Resident && self.is_dirty(),
        };
        if eviction.write_back {
            // 脏标记只属于驻留的槽位，写回失败时再恢复
            self.state = SlotState::Flushing;
            self.pending = next;
            self.flags.remove(EntryFlag::Dirty);
        } else {
            self.install(next);
        }
        eviction
    }

    /// 写回成功，旧住户让位
    pub fn finish_write_back(&mut self) {
        debug_assert_eq!(SlotState::Flushing, self.state);
        let next = self.pending;
        self.install(next);
    }

    /// 写回失败，旧住户原样保留（仍然是脏的）
    pub fn abort_write_back(&mut self) {
        debug_assert_eq!(SlotState::Flushing, self.state);
        self.state = SlotState::Resident;
        self.pending = SectorId::EMPTY;
        self.flags |= EntryFlag::Dirty;
    }

    pub fn finish_load(&mut self) {
        debug_assert_eq!(SlotState::Loading, self.state);
        self.state = SlotState::Resident;
    }

    /// 回到空槽位
    pub fn invalidate(&mut self) {
        self.sector = SectorId::EMPTY;
        self.pending = SectorId::EMPTY;
        self.state = SlotState::Invalid;
        self.flags = BitFlags::EMPTY;
    }

    #[inline]
    pub fn is_idle(&self) -> bool {
        self.monitor.is_idle()
    }

    #[inline]
    pub fn has_waiters(&self) -> bool {
        self.monitor.has_waiters()
    }

    pub fn claim_write(&mut self) {
        self.monitor.claim_write();
    }

    fn install(&mut self, next: SectorId) {
        self.sector = next;
        self.pending = SectorId::EMPTY;
        self.state = SlotState::Loading;
        self.flags = BitFlags::EMPTY;
    }
}

impl Admission for EntryMeta {
    fn monitor(&mut self) -> &mut Monitor {
        &mut self.monitor
    }
}

/// 内存中的一个缓存槽位
#[derive(Debug)]
pub struct CacheEntry {
    pub meta: Mutex<EntryMeta>,
    /// 扇区数据，只有通过管程获得准入后才能访问
    data: UnsafeCell<Box<[u8]>>,
}

// `data` 的并发访问由 `meta` 中的管程约束：多个读者共享或一个写者独占
unsafe impl Sync for CacheEntry {}

impl CacheEntry {
    pub fn new() -> Self {
        Self {
            meta: Mutex::new(EntryMeta::new()),
            data: UnsafeCell::new(vec![0; SECTOR_SIZE].into_boxed_slice()),
        }
    }

    /// # Safety
    ///
    /// 调用者必须持有此槽位的读者或写者准入。
    #[inline]
    pub unsafe fn data(&self) -> &[u8] {
        unsafe { &*self.data.get() }
    }

    /// # Safety
    ///
    /// 调用者必须持有此槽位的写者准入，且不能同时存在别的引用。
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn data_mut(&self) -> &mut [u8] {
        unsafe { &mut *self.data.get() }
    }
}

impl Default for CacheEntry {
    fn default() -> Self {
        Self::new()
    }
}
