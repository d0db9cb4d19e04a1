use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Mutex;

use block_dev::{BlockDevice, IoError, SECTOR_SIZE};

/// 以宿主文件充当块设备
#[derive(Debug)]
pub struct BlockFile {
    inner: Mutex<File>,
    sectors: usize,
}

impl BlockFile {
    pub fn new(fd: File, sectors: usize) -> Self {
        Self {
            inner: Mutex::new(fd),
            sectors,
        }
    }

    #[inline]
    pub fn sectors(&self) -> usize {
        self.sectors
    }

    fn seek(&self, file: &mut File, block_id: usize) -> Result<(), IoError> {
        if block_id >= self.sectors {
            return Err(IoError::out_of_range(block_id));
        }
        file.seek(SeekFrom::Start((block_id * SECTOR_SIZE) as u64))
            .map_err(|err| {
                log::error!("seeking sector {block_id}: {err}");
                IoError::device(block_id)
            })?;
        Ok(())
    }
}

impl BlockDevice for BlockFile {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> Result<(), IoError> {
        let mut file = self.inner.lock().map_err(|_| IoError::device(block_id))?;
        self.seek(&mut file, block_id)?;
        file.read_exact(buf).map_err(|err| {
            log::error!("reading sector {block_id}: {err}");
            IoError::device(block_id)
        })
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) -> Result<(), IoError> {
        let mut file = self.inner.lock().map_err(|_| IoError::device(block_id))?;
        self.seek(&mut file, block_id)?;
        file.write_all(buf).map_err(|err| {
            log::error!("writing sector {block_id}: {err}");
            IoError::device(block_id)
        })
    }
}
