#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use bcache::sync::ThreadScheduler;
use bcache::{BufferCache, Scheduler, SectorId, Task};
use block_dev::{BlockDevice, IoError, SECTOR_SIZE};

/// 设备上每个扇区的初始内容互不相同
pub fn pattern(block_id: usize) -> Vec<u8> {
    (0..SECTOR_SIZE)
        .map(|i| (block_id * 7 + i * 13) as u8)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Read(usize),
    Write(usize),
}

#[derive(Debug, Default)]
struct State {
    sectors: Vec<Vec<u8>>,
    ops: Vec<Op>,
    failing_reads: HashSet<usize>,
    failing_writes: HashSet<usize>,
    gated: HashSet<usize>,
    at_gate: usize,
}

/// 内存中的块设备，记录每一次 I/O，可以注入故障或让读操作停在闸门前
#[derive(Debug)]
pub struct MemDisk {
    state: Mutex<State>,
    gate: Condvar,
    read_delay: Option<Duration>,
}

impl MemDisk {
    pub fn new(sectors: usize) -> Self {
        Self {
            state: Mutex::new(State {
                sectors: (0..sectors).map(pattern).collect(),
                ..State::default()
            }),
            gate: Condvar::new(),
            read_delay: None,
        }
    }

    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    pub fn sector(&self, block_id: usize) -> Vec<u8> {
        self.state.lock().unwrap().sectors[block_id].clone()
    }

    pub fn ops(&self) -> Vec<Op> {
        self.state.lock().unwrap().ops.clone()
    }

    pub fn reads_of(&self, block_id: usize) -> usize {
        self.count(Op::Read(block_id))
    }

    pub fn writes_of(&self, block_id: usize) -> usize {
        self.count(Op::Write(block_id))
    }

    pub fn total_writes(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.ops.iter().filter(|op| matches!(op, Op::Write(_))).count()
    }

    pub fn fail_read(&self, block_id: usize) {
        self.state.lock().unwrap().failing_reads.insert(block_id);
    }

    pub fn fail_write(&self, block_id: usize) {
        self.state.lock().unwrap().failing_writes.insert(block_id);
    }

    pub fn heal(&self) {
        let mut state = self.state.lock().unwrap();
        state.failing_reads.clear();
        state.failing_writes.clear();
    }

    /// 读这些扇区的任务会停在闸门前，直到 [`MemDisk::open_gate`]
    pub fn close_gate(&self, blocks: impl IntoIterator<Item = usize>) {
        self.state.lock().unwrap().gated.extend(blocks);
    }

    pub fn open_gate(&self) {
        self.state.lock().unwrap().gated.clear();
        self.gate.notify_all();
    }

    pub fn waiting_at_gate(&self) -> usize {
        self.state.lock().unwrap().at_gate
    }

    fn count(&self, op: Op) -> usize {
        let state = self.state.lock().unwrap();
        state.ops.iter().filter(|&&o| o == op).count()
    }
}

impl BlockDevice for MemDisk {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> Result<(), IoError> {
        let mut state = self.state.lock().unwrap();
        if block_id >= state.sectors.len() {
            return Err(IoError::out_of_range(block_id));
        }
        if state.failing_reads.contains(&block_id) {
            return Err(IoError::device(block_id));
        }
        if state.gated.contains(&block_id) {
            state.at_gate += 1;
            while state.gated.contains(&block_id) {
                state = self.gate.wait(state).unwrap();
            }
            state.at_gate -= 1;
        }
        if let Some(delay) = self.read_delay {
            drop(state);
            thread::sleep(delay);
            state = self.state.lock().unwrap();
        }
        buf.copy_from_slice(&state.sectors[block_id]);
        state.ops.push(Op::Read(block_id));
        Ok(())
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) -> Result<(), IoError> {
        let mut state = self.state.lock().unwrap();
        if block_id >= state.sectors.len() {
            return Err(IoError::out_of_range(block_id));
        }
        if state.failing_writes.contains(&block_id) {
            return Err(IoError::device(block_id));
        }
        state.sectors[block_id].copy_from_slice(buf);
        state.ops.push(Op::Write(block_id));
        Ok(())
    }
}

/// 每隔一次阻塞就不等唤醒直接返回
#[derive(Debug, Default)]
pub struct Restless {
    blocks: AtomicUsize,
}

impl Scheduler for Restless {
    fn current_task(&self) -> Arc<dyn Task> {
        ThreadScheduler.current_task()
    }

    fn block_current(&self) {
        if self.blocks.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
            return;
        }
        thread::park();
    }
}

pub fn cache(disk: &Arc<MemDisk>, capacity: usize) -> BufferCache {
    BufferCache::with_capacity(disk.clone(), Arc::new(ThreadScheduler), capacity)
}

pub fn restless_cache(disk: &Arc<MemDisk>, capacity: usize) -> BufferCache {
    BufferCache::with_capacity(disk.clone(), Arc::new(Restless::default()), capacity)
}

pub fn sid(raw: u32) -> SectorId {
    SectorId::new(raw)
}

pub fn read_sector(cache: &BufferCache, sector: u32) -> Vec<u8> {
    let mut buf = vec![0; SECTOR_SIZE];
    cache.read(sid(sector), &mut buf).unwrap();
    buf
}
