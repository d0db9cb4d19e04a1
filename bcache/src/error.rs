use block_dev::IoError;
use derive_more::Display;

pub type Result<T> = core::result::Result<T, CacheError>;

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum CacheError {
    /// `offset + length` 越过了扇区边界
    #[display(fmt = "range {}+{} exceeds sector width", offset, length)]
    OutOfBounds { offset: usize, length: usize },
    /// 调用者提供的缓冲区装不下请求的字节数
    #[display(fmt = "buffer holds {} bytes but {} are needed", got, needed)]
    BufferTooSmall { needed: usize, got: usize },
    /// 扇区号是空槽位的哨兵值
    #[display(fmt = "sector id is reserved for empty slots")]
    ReservedSector,
    #[display(fmt = "device I/O failed: {}", _0)]
    Io(IoError),
    #[display(fmt = "buffer cache is not initialized")]
    Uninitialized,
}

impl From<IoError> for CacheError {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl core::error::Error for CacheError {}
