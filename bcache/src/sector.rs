//! 扇区号的抽象

use derive_more::{Display, From, Into};

/// 设备上的逻辑扇区号，原样传给块设备
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into)]
#[repr(transparent)]
pub struct SectorId(u32);

impl SectorId {
    /// 空槽位的哨兵值，永远不会被当作真实扇区
    pub const EMPTY: Self = Self(u32::MAX);

    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == u32::MAX
    }

    /// 块设备使用的块号
    #[inline]
    pub fn block(self) -> usize {
        self.0 as usize
    }
}
