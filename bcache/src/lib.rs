#![cfg_attr(not(any(test, feature = "std")), no_std)]

extern crate alloc;

/* 缓存的整体架构，自上而下 */

// 缓存表：查找、淘汰、读写路径
mod cache;

// 时钟淘汰策略
mod clock;

// 槽位：状态、标记与数据
mod entry;

// 槽位管程：读写准入，写者优先
mod monitor;

// 阻塞原语：调度器接口与等待队列
pub mod sync;

pub mod config;
mod error;
mod sector;

use alloc::sync::Arc;

use block_dev::BlockDevice;
use spin::Once;

pub use self::{
    cache::{BufferCache, CacheStats, Reclaim},
    error::{CacheError, Result},
    sector::SectorId,
    sync::{Scheduler, Task},
};

static BUFFER_CACHE: Once<BufferCache> = Once::new();

/// 构造全局缓存，必须在文件系统活动之前调用，重复调用无效
pub fn init(device: Arc<dyn BlockDevice>, scheduler: Arc<dyn Scheduler>) {
    BUFFER_CACHE.call_once(|| {
        log::info!("buffer cache: {} slots", config::CACHE_CAPACITY);
        BufferCache::new(device, scheduler)
    });
}

#[inline]
fn manager() -> Result<&'static BufferCache> {
    BUFFER_CACHE.get().ok_or(CacheError::Uninitialized)
}

#[inline]
pub fn read(sector: SectorId, buf: &mut [u8]) -> Result<()> {
    manager()?.read(sector, buf)
}

#[inline]
pub fn read_partial(sector: SectorId, buf: &mut [u8], offset: usize, length: usize) -> Result<()> {
    manager()?.read_partial(sector, buf, offset, length)
}

#[inline]
pub fn write(sector: SectorId, buf: &[u8]) -> Result<()> {
    manager()?.write(sector, buf)
}

#[inline]
pub fn write_partial(sector: SectorId, buf: &[u8], offset: usize, length: usize) -> Result<()> {
    manager()?.write_partial(sector, buf, offset, length)
}

/// 关机前调用，把所有脏扇区写回设备
pub fn flush_all() -> Result<usize> {
    manager()?.flush_all()
}

/// 供虚拟内存子系统在内存压力下回收槽位
pub fn reclaim(max: usize) -> Result<usize> {
    manager()?.reclaim(max)
}

pub fn stats() -> Result<CacheStats> {
    manager().map(BufferCache::stats)
}
