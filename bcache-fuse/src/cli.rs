use std::path::PathBuf;

use bcache::config::CACHE_CAPACITY;
use clap::Parser;

/// Drive a disk image through the buffer cache with a multi-threaded workload
#[derive(Parser)]
pub struct Cli {
    /// Disk image backing the cache
    #[arg(long, short)]
    pub image: PathBuf,

    /// Create (or truncate) the image with this many MiB of patterned sectors
    #[arg(long)]
    pub create_mib: Option<u64>,

    /// Number of cache slots
    #[arg(long, short, default_value_t = CACHE_CAPACITY)]
    pub capacity: usize,

    /// Worker threads
    #[arg(long, short = 'j', default_value_t = 4)]
    pub threads: usize,

    /// Operations per worker
    #[arg(long, short = 'n', default_value_t = 10_000)]
    pub ops: usize,

    /// Percentage of operations that write
    #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u8).range(0..=100))]
    pub write_ratio: u8,

    /// Sectors touched by each worker; a small working set stays cache resident
    #[arg(long, default_value_t = 256)]
    pub working_set: usize,

    #[arg(long, default_value_t = 0)]
    pub seed: u64,
}
