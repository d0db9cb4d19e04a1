//! # 块缓存层
//!
//! 块设备读写速度一般慢于内存读写速度，因此我们在内存中开辟固定数量的槽位，
//! 把最近使用的扇区留在内存中，写操作也先落在槽位里，淘汰时才写回设备。
//!
//! 缓存层对使用者来说是透明的，使用者对扇区的读写都经过缓存层，
//! 且**操作扇区时一定在槽位当中**。
//!
//! 并发约束：
//!
//! - 同一槽位上的操作由槽位管程串行化；
//! - 时钟指针、未命中时的复查以及牺牲槽位的选择与占有都在表锁下完成，
//!   两个任务不会同时装载同一个扇区，也不会同时改写同一个牺牲槽位；
//! - 设备 I/O 期间不持有表锁，只持有槽位的写者准入。

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};

use block_dev::BlockDevice;
use enumflags2::BitFlags;
use spin::{Mutex, MutexGuard};

use crate::clock::Clock;
use crate::config::{CACHE_CAPACITY, SECTOR_SIZE};
use crate::entry::{CacheEntry, EntryFlag, EntryMeta, SlotState};
use crate::error::{CacheError, Result};
use crate::monitor::{self, Admission};
use crate::sector::SectorId;
use crate::sync::{Scheduler, WaitQueue};

/// 内存压力下由虚拟内存子系统调用的回收接口
pub trait Reclaim {
    /// 释放至多 `max` 个空闲槽位，脏槽位先写回，返回实际释放的个数
    fn reclaim(&self, max: usize) -> Result<usize>;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    /// 写回设备的次数，包括淘汰与刷新
    pub write_backs: usize,
    /// 旧扇区被挤出槽位的次数
    pub evictions: usize,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicUsize,
    misses: AtomicUsize,
    write_backs: AtomicUsize,
    evictions: AtomicUsize,
}

impl Counters {
    #[inline]
    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            write_backs: self.write_backs.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

/// 扇区缓存，管理固定数量的槽位
pub struct BufferCache {
    entries: Box<[CacheEntry]>,
    /// 表锁
    clock: Mutex<Clock>,
    /// 所有槽位都被占用时，等待任一槽位空闲的任务
    idle_waiters: Mutex<WaitQueue>,
    /// 每当有槽位变为空闲就加一，防止等待者错过唤醒
    idle_epoch: AtomicUsize,
    device: Arc<dyn BlockDevice>,
    scheduler: Arc<dyn Scheduler>,
    counters: Counters,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Read,
    Write,
}

enum Claim<'a> {
    /// 本任务完成了装载，持有写者准入
    Loaded(SlotGuard<'a>),
    /// 扇区已经驻留或正由别的任务装载
    InFlight(usize),
    /// 所有槽位都被占用，已经等到有槽位空闲，需要重试
    Exhausted,
}

impl BufferCache {
    pub fn new(device: Arc<dyn BlockDevice>, scheduler: Arc<dyn Scheduler>) -> Self {
        Self::with_capacity(device, scheduler, CACHE_CAPACITY)
    }

    pub fn with_capacity(
        device: Arc<dyn BlockDevice>,
        scheduler: Arc<dyn Scheduler>,
        capacity: usize,
    ) -> Self {
        assert!(capacity > 0, "buffer cache needs at least one slot");
        Self {
            entries: (0..capacity).map(|_| CacheEntry::new()).collect(),
            clock: Mutex::new(Clock::new()),
            idle_waiters: Mutex::new(WaitQueue::new()),
            idle_epoch: AtomicUsize::new(0),
            device,
            scheduler,
            counters: Counters::default(),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }

    /// 扇区是否驻留在缓存中
    pub fn contains(&self, sector: SectorId) -> bool {
        self.find(sector).is_some()
    }

    #[inline]
    pub fn read(&self, sector: SectorId, buf: &mut [u8]) -> Result<()> {
        self.read_partial(sector, buf, 0, SECTOR_SIZE)
    }

    /// 把扇区的 `[offset, offset + length)` 复制到 `buf[..length]`
    pub fn read_partial(
        &self,
        sector: SectorId,
        buf: &mut [u8],
        offset: usize,
        length: usize,
    ) -> Result<()> {
        check_request(sector, buf.len(), offset, length)?;
        let slot = self.slot(sector, Access::Read, true)?;
        buf[..length].copy_from_slice(&slot.data()[offset..offset + length]);
        Ok(())
    }

    #[inline]
    pub fn write(&self, sector: SectorId, buf: &[u8]) -> Result<()> {
        self.write_partial(sector, buf, 0, SECTOR_SIZE)
    }

    /// 把 `buf[..length]` 写入扇区的 `[offset, offset + length)`。
    ///
    /// 未命中时，除非覆盖整个扇区，否则先从设备读入原有内容再修改。
    pub fn write_partial(
        &self,
        sector: SectorId,
        buf: &[u8],
        offset: usize,
        length: usize,
    ) -> Result<()> {
        check_request(sector, buf.len(), offset, length)?;
        if length == 0 {
            return Ok(());
        }
        let overwrite = offset == 0 && length == SECTOR_SIZE;
        let mut slot = self.slot(sector, Access::Write, !overwrite)?;
        slot.patch(offset, &buf[..length]);
        Ok(())
    }

    /// 把一个驻留的脏扇区写回设备，返回是否发生了写回
    pub fn flush(&self, sector: SectorId) -> Result<bool> {
        match self.find(sector) {
            Some(index) => self.flush_slot(index, Some(sector)),
            None => Ok(false),
        }
    }

    /// 把所有脏槽位写回设备，遇到第一个设备错误即停止，返回写回的槽位数
    pub fn flush_all(&self) -> Result<usize> {
        let mut flushed = 0;
        for index in 0..self.entries.len() {
            if self.flush_slot(index, None)? {
                flushed += 1;
            }
        }
        log::debug!("flushed {flushed} dirty slots");
        Ok(flushed)
    }
}

impl BufferCache {
    /// 查找驻留 `sector` 的槽位，逐个在槽位锁内比较
    fn find(&self, sector: SectorId) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.meta.lock().holds(sector))
    }

    /// 表锁下的复查，装载中的槽位也算
    fn locate(&self, sector: SectorId) -> Option<usize> {
        self.entries.iter().position(|entry| {
            let meta = entry.meta.lock();
            meta.holds(sector) || meta.claims(sector)
        })
    }

    /// 取得装有 `sector` 的槽位并获得相应准入。
    ///
    /// 未命中时由本任务装载，返回的槽位持有写者准入；
    /// `fetch` 为假时不从设备读入，调用者会覆盖整个扇区。
    fn slot(&self, sector: SectorId, access: Access, fetch: bool) -> Result<SlotGuard<'_>> {
        loop {
            if let Some(index) = self.find(sector) {
                if let Some(slot) = self.admit(index, sector, access) {
                    Counters::bump(&self.counters.hits);
                    log::trace!("hit sector {sector} in slot {index}");
                    return Ok(slot);
                }
                continue;
            }

            match self.load(sector, fetch)? {
                Claim::Loaded(slot) => return Ok(slot),
                Claim::InFlight(index) => {
                    if let Some(slot) = self.admit(index, sector, access) {
                        Counters::bump(&self.counters.hits);
                        log::trace!("joined load of sector {sector} in slot {index}");
                        return Ok(slot);
                    }
                }
                Claim::Exhausted => {}
            }
        }
    }

    /// 进入槽位管程后确认它仍然驻留着 `sector`，否则释放准入
    fn admit(&self, index: usize, sector: SectorId, access: Access) -> Option<SlotGuard<'_>> {
        let lock = &self.entries[index].meta;
        let meta = match access {
            Access::Read => monitor::acquire_read(lock, &*self.scheduler),
            Access::Write => monitor::acquire_write(lock, &*self.scheduler),
        };
        let holds = meta.holds(sector);
        drop(meta);

        let mut slot = SlotGuard::new(self, index, access);
        if holds {
            Some(slot)
        } else {
            slot.forget();
            None
        }
    }

    fn load(&self, sector: SectorId, fetch: bool) -> Result<Claim<'_>> {
        let epoch = self.idle_epoch.load(Ordering::SeqCst);
        let mut clock = self.clock.lock();

        if let Some(index) = self.locate(sector) {
            return Ok(Claim::InFlight(index));
        }

        let Some((index, mut meta)) = clock.select(&self.entries) else {
            drop(clock);
            self.wait_idle(epoch);
            return Ok(Claim::Exhausted);
        };
        meta.claim_write();
        let eviction = meta.begin_evict(sector);
        drop(meta);
        drop(clock);

        Counters::bump(&self.counters.misses);
        let mut slot = SlotGuard::new(self, index, Access::Write);
        slot.forget();

        if eviction.write_back {
            self.write_back(&slot, eviction.victim)?;
            slot.meta().finish_write_back();
        }
        if !eviction.victim.is_empty() {
            Counters::bump(&self.counters.evictions);
            log::debug!(
                "evict sector {} from slot {index} for sector {sector}",
                eviction.victim
            );
        }

        if fetch {
            if let Err(err) = self.device.read_block(sector.block(), slot.buf_mut()) {
                log::warn!("loading sector {sector} failed: {err}");
                slot.meta().invalidate();
                return Err(err.into());
            }
        }
        slot.meta().finish_load();
        slot.flags = EntryFlag::Accessed.into();
        Ok(Claim::Loaded(slot))
    }

    /// 写回 `Flushing` 槽位中的旧扇区，失败时槽位恢复原样
    fn write_back(&self, slot: &SlotGuard<'_>, victim: SectorId) -> Result<()> {
        log::debug!("write back sector {victim} from slot {}", slot.index);
        if let Err(err) = self.device.write_block(victim.block(), slot.data()) {
            log::warn!("write-back of sector {victim} failed: {err}");
            slot.meta().abort_write_back();
            return Err(err.into());
        }
        Counters::bump(&self.counters.write_backs);
        Ok(())
    }

    fn flush_slot(&self, index: usize, expected: Option<SectorId>) -> Result<bool> {
        let lock = &self.entries[index].meta;
        if !lock.lock().is_dirty() {
            return Ok(false);
        }

        // 读者准入足以阻止写者修改数据
        let meta = monitor::acquire_read(lock, &*self.scheduler);
        let sector = meta.sector();
        let dirty = meta.state() == SlotState::Resident
            && meta.is_dirty()
            && expected.is_none_or(|expected| expected == sector);
        drop(meta);

        let mut slot = SlotGuard::new(self, index, Access::Read);
        slot.forget();
        if !dirty {
            return Ok(false);
        }

        log::debug!("flush sector {sector} from slot {index}");
        if let Err(err) = self.device.write_block(sector.block(), slot.data()) {
            log::warn!("flushing sector {sector} failed: {err}");
            return Err(err.into());
        }
        slot.meta().clear_dirty();
        Counters::bump(&self.counters.write_backs);
        Ok(true)
    }

    /// 在表锁下把一个空闲驻留槽位腾空
    fn release_slot(&self, index: usize) -> Result<bool> {
        let clock = self.clock.lock();
        let mut meta = self.entries[index].meta.lock();
        if meta.state() != SlotState::Resident || !meta.is_idle() || meta.has_waiters() {
            return Ok(false);
        }
        meta.claim_write();
        let eviction = meta.begin_evict(SectorId::EMPTY);
        drop(meta);
        drop(clock);

        let mut slot = SlotGuard::new(self, index, Access::Write);
        slot.forget();
        if eviction.write_back {
            self.write_back(&slot, eviction.victim)?;
        }
        slot.meta().invalidate();
        Counters::bump(&self.counters.evictions);
        log::debug!("reclaimed slot {index} holding sector {}", eviction.victim);
        Ok(true)
    }

    fn wait_idle(&self, epoch: usize) {
        let mut waiters = self.idle_waiters.lock();
        if self.idle_epoch.load(Ordering::SeqCst) != epoch {
            return;
        }
        let task = self.scheduler.current_task();
        waiters.push(Arc::clone(&task));
        drop(waiters);

        log::warn!(
            "all {} slots are in use, waiting for one to become idle",
            self.capacity()
        );
        self.scheduler.block_current();
        // 虚假唤醒时仍在队列里，调用者会重新扫描
        self.idle_waiters.lock().remove(&task);
    }

    fn notify_idle(&self) {
        self.idle_epoch.fetch_add(1, Ordering::SeqCst);
        self.idle_waiters.lock().wake_all();
    }
}

impl Reclaim for BufferCache {
    fn reclaim(&self, max: usize) -> Result<usize> {
        let mut released = 0;
        for index in 0..self.entries.len() {
            if released == max {
                break;
            }
            if self.release_slot(index)? {
                released += 1;
            }
        }
        Ok(released)
    }
}

impl fmt::Debug for BufferCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferCache")
            .field("capacity", &self.capacity())
            .field("hand", &self.clock.lock().hand())
            .field("stats", &self.stats())
            .finish()
    }
}

impl Drop for BufferCache {
    fn drop(&mut self) {
        if let Err(err) = self.flush_all() {
            log::warn!("dirty sectors lost on drop: {err}");
        }
    }
}

fn check_request(sector: SectorId, buf_len: usize, offset: usize, length: usize) -> Result<()> {
    if sector.is_empty() {
        return Err(CacheError::ReservedSector);
    }
    if offset.checked_add(length).is_none_or(|end| end > SECTOR_SIZE) {
        return Err(CacheError::OutOfBounds { offset, length });
    }
    if buf_len < length {
        return Err(CacheError::BufferTooSmall {
            needed: length,
            got: buf_len,
        });
    }
    Ok(())
}

/// 槽位准入凭证，离开作用域时设置标记并退出管程
struct SlotGuard<'a> {
    cache: &'a BufferCache,
    index: usize,
    access: Access,
    /// 释放时要设置的标记
    flags: BitFlags<EntryFlag>,
}

impl<'a> SlotGuard<'a> {
    fn new(cache: &'a BufferCache, index: usize, access: Access) -> Self {
        Self {
            cache,
            index,
            access,
            flags: EntryFlag::Accessed.into(),
        }
    }

    #[inline]
    fn entry(&self) -> &'a CacheEntry {
        &self.cache.entries[self.index]
    }

    #[inline]
    fn meta(&self) -> MutexGuard<'a, EntryMeta> {
        self.entry().meta.lock()
    }

    fn data(&self) -> &[u8] {
        // SAFETY: 持有读者或写者准入
        unsafe { self.entry().data() }
    }

    /// 不设置任何标记，供设备装载使用
    fn buf_mut(&mut self) -> &mut [u8] {
        assert_eq!(Access::Write, self.access);
        // SAFETY: 持有写者准入，且借用受 `&mut self` 约束
        unsafe { self.entry().data_mut() }
    }

    fn patch(&mut self, offset: usize, src: &[u8]) {
        if src.is_empty() {
            return;
        }
        self.buf_mut()[offset..offset + src.len()].copy_from_slice(src);
        self.flags |= EntryFlag::Dirty;
    }

    /// 释放时不留下访问痕迹
    fn forget(&mut self) {
        self.flags = BitFlags::EMPTY;
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        let idle = {
            let mut meta = self.meta();
            if meta.state() == SlotState::Resident {
                meta.mark(self.flags);
            }
            match self.access {
                Access::Read => meta.monitor().release_read(),
                Access::Write => meta.monitor().release_write(),
            }
            meta.is_idle()
        };
        if idle {
            self.cache.notify_idle();
        }
    }
}
