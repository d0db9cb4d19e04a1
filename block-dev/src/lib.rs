//! # 块设备接口层
//!
//! 块设备是以**扇区**为单位存储数据的设备，例如磁盘、光盘、U盘等；
//! [`BlockDevice`] 就是对读写块设备的抽象，
//! 实现了此特质的类型称为**块设备驱动**。
//!
//! 缓存层只通过此特质与设备交互，读写都是同步的：调用返回时 I/O 已经完成。

#![no_std]

use core::any::Any;

use derive_more::Display;

/// 扇区字节数，缓存与设备之间传输的最小单位
pub const SECTOR_SIZE: usize = 512;

/// 块设备驱动特质
///
/// `buf` 的长度总是 [`SECTOR_SIZE`]。
pub trait BlockDevice: Send + Sync + Any {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> Result<(), IoError>;
    fn write_block(&self, block_id: usize, buf: &[u8]) -> Result<(), IoError>;
}

/// 设备 I/O 失败
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
#[display(fmt = "{} at sector {}", kind, block_id)]
pub struct IoError {
    pub block_id: usize,
    pub kind: IoErrorKind,
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum IoErrorKind {
    /// 扇区号超出设备容量
    #[display(fmt = "sector out of range")]
    OutOfRange,
    /// 设备报告的错误
    #[display(fmt = "device error")]
    Device,
}

impl IoError {
    pub const fn new(block_id: usize, kind: IoErrorKind) -> Self {
        Self { block_id, kind }
    }

    pub const fn out_of_range(block_id: usize) -> Self {
        Self::new(block_id, IoErrorKind::OutOfRange)
    }

    pub const fn device(block_id: usize) -> Self {
        Self::new(block_id, IoErrorKind::Device)
    }
}

impl core::error::Error for IoError {}
