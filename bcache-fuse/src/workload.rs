//! 随机读写负载，每个线程只写自己的扇区，并对照影子副本校验读到的内容

use std::collections::HashMap;

use bcache::{BufferCache, Result, SectorId};
use block_dev::SECTOR_SIZE;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone, Copy)]
pub struct Workload {
    pub worker: usize,
    pub workers: usize,
    pub ops: usize,
    pub write_ratio: u8,
    pub working_set: usize,
    pub sectors: usize,
    pub seed: u64,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Report {
    pub reads: usize,
    pub writes: usize,
    pub mismatches: usize,
}

impl Workload {
    /// 本线程负责的第 `i` 个扇区；不同线程之间互不重叠
    fn sector(&self, i: usize) -> SectorId {
        let raw = (i * self.workers + self.worker) % self.sectors;
        SectorId::new(raw as u32)
    }

    pub fn run(&self, cache: &BufferCache) -> Result<Report> {
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(self.worker as u64));
        let owned = (self.sectors / self.workers).clamp(1, self.working_set);
        let mut shadow: HashMap<SectorId, Vec<u8>> = HashMap::new();
        let mut report = Report::default();

        for _ in 0..self.ops {
            let sector = self.sector(rng.gen_range(0..owned));
            if !shadow.contains_key(&sector) {
                let mut data = vec![0; SECTOR_SIZE];
                cache.read(sector, &mut data)?;
                shadow.insert(sector, data);
            }

            let offset = rng.gen_range(0..SECTOR_SIZE);
            let length = rng.gen_range(0..=SECTOR_SIZE - offset);

            if rng.gen_range(0..100) < self.write_ratio {
                let mut patch = vec![0; length];
                rng.fill(&mut patch[..]);
                cache.write_partial(sector, &patch, offset, length)?;
                if let Some(data) = shadow.get_mut(&sector) {
                    data[offset..offset + length].copy_from_slice(&patch);
                }
                report.writes += 1;
            } else {
                let mut buf = vec![0; length];
                cache.read_partial(sector, &mut buf, offset, length)?;
                if buf[..] != shadow[&sector][offset..offset + length] {
                    log::error!("sector {sector}: read {offset}+{length} does not match");
                    report.mismatches += 1;
                }
                report.reads += 1;
            }
        }

        Ok(report)
    }
}
