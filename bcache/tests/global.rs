mod common;

use std::sync::Arc;

use bcache::sync::ThreadScheduler;
use bcache::{CacheError, SectorId};
use block_dev::SECTOR_SIZE;

use self::common::{MemDisk, pattern};

// 全局缓存是进程级单例，整个流程放在一个测试里保证顺序
#[test]
fn process_wide_cache() {
    let mut buf = vec![0; SECTOR_SIZE];
    assert_eq!(
        Err(CacheError::Uninitialized),
        bcache::read(SectorId::new(0), &mut buf)
    );
    assert_eq!(Err(CacheError::Uninitialized), bcache::flush_all());

    let disk = Arc::new(MemDisk::new(256));
    bcache::init(disk.clone(), Arc::new(ThreadScheduler));
    // 重复初始化不会替换已有的缓存
    bcache::init(Arc::new(MemDisk::new(1)), Arc::new(ThreadScheduler));

    bcache::read(SectorId::new(200), &mut buf).unwrap();
    assert_eq!(pattern(200), buf);

    bcache::write_partial(SectorId::new(17), b"kernel", 100, 6).unwrap();
    let mut word = [0; 6];
    bcache::read_partial(SectorId::new(17), &mut word, 100, 6).unwrap();
    assert_eq!(b"kernel", &word);

    bcache::write(SectorId::new(18), &[0xab; SECTOR_SIZE]).unwrap();
    assert_eq!(2, bcache::flush_all().unwrap());
    assert_eq!(b"kernel", &disk.sector(17)[100..106]);
    assert_eq!(vec![0xab; SECTOR_SIZE], disk.sector(18));

    assert_eq!(3, bcache::reclaim(usize::MAX).unwrap());
    let stats = bcache::stats().unwrap();
    assert_eq!(3, stats.misses);
    assert_eq!(1, stats.hits);
}
