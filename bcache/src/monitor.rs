//! # 槽位管程
//!
//! 每个缓存槽位都有一个读写管程：要么允许任意多个读者同时访问，
//! 要么只允许一个写者独占。写者优先，有写者在等待时新来的读者必须让路，
//! 避免写者饿死。
//!
//! 管程的计数器与等待队列放在槽位的自旋锁里，
//! 阻塞前把当前任务挂入等待队列再释放锁，被唤醒后重新加锁检查条件。

use alloc::sync::Arc;

use spin::{Mutex, MutexGuard};

use crate::sync::{Scheduler, Task, WaitQueue};

#[derive(Debug, Default)]
pub struct Monitor {
    /// 活跃读者数（AR）
    active_readers: usize,
    /// 活跃写者数（AW），只会是 0 或 1
    active_writers: usize,
    /// 等待中的读者数（WR）
    waiting_readers: usize,
    /// 等待中的写者数（WW）
    waiting_writers: usize,
    can_read: WaitQueue,
    can_write: WaitQueue,
}

impl Monitor {
    pub const fn new() -> Self {
        Self {
            active_readers: 0,
            active_writers: 0,
            waiting_readers: 0,
            waiting_writers: 0,
            can_read: WaitQueue::new(),
            can_write: WaitQueue::new(),
        }
    }

    /// 没有任何活跃的读者或写者
    #[inline]
    pub fn is_idle(&self) -> bool {
        self.active_readers == 0 && self.active_writers == 0
    }

    #[inline]
    pub fn has_waiters(&self) -> bool {
        self.waiting_readers > 0 || self.waiting_writers > 0
    }

    #[cfg(test)]
    pub fn active_readers(&self) -> usize {
        self.active_readers
    }

    #[inline]
    pub fn active_writers(&self) -> usize {
        self.active_writers
    }

    #[cfg(test)]
    pub fn waiting_readers(&self) -> usize {
        self.waiting_readers
    }

    #[cfg(test)]
    pub fn waiting_writers(&self) -> usize {
        self.waiting_writers
    }

    #[inline]
    fn reader_admissible(&self) -> bool {
        self.active_writers == 0 && self.waiting_writers == 0
    }

    #[inline]
    fn writer_admissible(&self) -> bool {
        self.active_writers == 0 && self.active_readers == 0
    }

    /// 在空闲槽位上直接成为写者，不经过等待。
    ///
    /// 淘汰者在表锁下选中牺牲槽位后立即调用，选中与占有是同一个临界区。
    pub fn claim_write(&mut self) {
        assert!(self.is_idle(), "claiming a busy slot");
        self.active_writers = 1;
    }

    pub fn release_read(&mut self) {
        assert!(self.active_readers > 0, "release_read without a reader");
        self.active_readers -= 1;
        if self.active_readers == 0 {
            self.can_write.wake_one();
        }
    }

    /// 唤醒所有等待的读者，同时唤醒一个等待的写者。
    ///
    /// 读者在有写者等待时会重新睡下，所以写者必须一并唤醒，否则双方都不会再被叫醒。
    pub fn release_write(&mut self) {
        assert_eq!(self.active_writers, 1, "release_write without a writer");
        self.active_writers = 0;
        if self.waiting_readers > 0 {
            self.can_read.wake_all();
        }
        self.can_write.wake_one();
    }
}

/// 内嵌了管程的槽位状态
pub trait Admission {
    fn monitor(&mut self) -> &mut Monitor;
}

impl Admission for Monitor {
    fn monitor(&mut self) -> &mut Monitor {
        self
    }
}

/// 以读者身份进入管程，返回仍然持有的锁，调用者可以在同一临界区内检查槽位
pub fn acquire_read<'a, T: Admission>(
    lock: &'a Mutex<T>,
    scheduler: &dyn Scheduler,
) -> MutexGuard<'a, T> {
    let mut guard = lock.lock();
    if !guard.monitor().reader_admissible() {
        guard.monitor().waiting_readers += 1;
        let task = scheduler.current_task();
        while !guard.monitor().reader_admissible() {
            guard = block_on(lock, guard, scheduler, &task, |m| &mut m.can_read);
        }
        let monitor = guard.monitor();
        monitor.can_read.remove(&task);
        monitor.waiting_readers -= 1;
    }
    guard.monitor().active_readers += 1;
    guard
}

/// 以写者身份进入管程，返回仍然持有的锁
pub fn acquire_write<'a, T: Admission>(
    lock: &'a Mutex<T>,
    scheduler: &dyn Scheduler,
) -> MutexGuard<'a, T> {
    let mut guard = lock.lock();
    if !guard.monitor().writer_admissible() {
        guard.monitor().waiting_writers += 1;
        let task = scheduler.current_task();
        while !guard.monitor().writer_admissible() {
            guard = block_on(lock, guard, scheduler, &task, |m| &mut m.can_write);
        }
        let monitor = guard.monitor();
        monitor.can_write.remove(&task);
        monitor.waiting_writers -= 1;
    }
    guard.monitor().active_writers = 1;
    guard
}

/// 挂入等待队列后阻塞，醒来时重新加锁。
///
/// 同一次等待始终使用同一个 `task`，虚假唤醒后不会在队列里留下重复项。
fn block_on<'a, T: Admission>(
    lock: &'a Mutex<T>,
    mut guard: MutexGuard<'a, T>,
    scheduler: &dyn Scheduler,
    task: &Arc<dyn Task>,
    queue: impl FnOnce(&mut Monitor) -> &mut WaitQueue,
) -> MutexGuard<'a, T> {
    queue(guard.monitor()).push_once(task);
    drop(guard);
    scheduler.block_current();
    lock.lock()
}
