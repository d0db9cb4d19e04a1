mod block_file;
mod cli;
mod workload;

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use bcache::BufferCache;
use bcache::sync::ThreadScheduler;
use block_dev::{BlockDevice, SECTOR_SIZE};
use clap::Parser;
use typed_bytesize::ByteSizeIec;

pub use self::{block_file::BlockFile, cli::Cli, workload::Workload};

fn main() -> io::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    println!("image={:?}", cli.image);

    let mut fd = OpenOptions::new()
        .read(true)
        .write(true)
        .create(cli.create_mib.is_some())
        .truncate(cli.create_mib.is_some())
        .open(&cli.image)?;
    if let Some(mib) = cli.create_mib {
        let disk_size = ByteSizeIec::mib(mib).0;
        fd.set_len(disk_size)?;
        for block_id in 0..disk_size as usize / SECTOR_SIZE {
            let stamp = (block_id as u32).to_le_bytes();
            fd.write_all(&stamp.repeat(SECTOR_SIZE / stamp.len()))?;
        }
    }

    let sectors = fd.metadata()?.len() as usize / SECTOR_SIZE;
    if sectors == 0 {
        return Err(io::Error::other("image holds no complete sector"));
    }
    let threads = cli.threads.clamp(1, sectors);
    let block_file = BlockFile::new(fd, sectors);
    log::info!("{} sectors, {} slots", block_file.sectors(), cli.capacity);

    let device: Arc<dyn BlockDevice> = Arc::new(block_file);
    let cache = Arc::new(BufferCache::with_capacity(
        device,
        Arc::new(ThreadScheduler),
        cli.capacity.max(1),
    ));

    let start = Instant::now();
    let workers = (0..threads)
        .map(|worker| {
            let cache = Arc::clone(&cache);
            let workload = Workload {
                worker,
                workers: threads,
                ops: cli.ops,
                write_ratio: cli.write_ratio,
                working_set: cli.working_set.max(1),
                sectors,
                seed: cli.seed,
            };
            thread::spawn(move || workload.run(&cache))
        })
        .collect::<Vec<_>>();

    let mut mismatches = 0;
    let (mut reads, mut writes) = (0, 0);
    for worker in workers {
        let report = worker
            .join()
            .map_err(|_| io::Error::other("worker panicked"))?
            .map_err(io::Error::other)?;
        reads += report.reads;
        writes += report.writes;
        mismatches += report.mismatches;
    }
    let flushed = cache.flush_all().map_err(io::Error::other)?;
    let elapsed = start.elapsed();

    let stats = cache.stats();
    println!("reads={reads} writes={writes} elapsed={elapsed:?}");
    println!(
        "hits={} misses={} evictions={} write_backs={} flushed_at_exit={flushed}",
        stats.hits, stats.misses, stats.evictions, stats.write_backs
    );

    if mismatches > 0 {
        return Err(io::Error::other(format!("{mismatches} reads did not match")));
    }
    Ok(())
}
