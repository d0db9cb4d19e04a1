//! 缓存的编译期配置

pub use block_dev::SECTOR_SIZE;

/// 缓存槽位个数的上限
pub const CACHE_CAPACITY: usize = 64;
