//! 阻塞原语
//!
//! 缓存本身不知道任务如何调度。嵌入它的内核实现 [`Scheduler`]，
//! 缓存在等待准入或空闲槽位时把当前任务挂进 [`WaitQueue`] 并阻塞，
//! 条件满足的一方再把它唤醒。

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use core::fmt;

/// 可被唤醒的任务
pub trait Task: Send + Sync {
    fn wakeup(&self);
}

pub trait Scheduler: Send + Sync {
    fn current_task(&self) -> Arc<dyn Task>;

    /// 阻塞当前任务直到被唤醒。
    ///
    /// 允许虚假唤醒，调用者必须重新检查等待条件，
    /// 并且自己仍可能留在等待队列里，不再等待时要把自己移出。
    fn block_current(&self);
}

/// 任务等待队列，必须在保护等待条件的锁内操作
#[derive(Default)]
pub struct WaitQueue {
    tasks: VecDeque<Arc<dyn Task>>,
}

impl WaitQueue {
    pub const fn new() -> Self {
        Self {
            tasks: VecDeque::new(),
        }
    }

    pub fn push(&mut self, task: Arc<dyn Task>) {
        self.tasks.push_back(task);
    }

    /// 同一个任务只入队一次，虚假唤醒后再次等待时不会重复入队
    pub fn push_once(&mut self, task: &Arc<dyn Task>) {
        if !self.contains(task) {
            self.push(Arc::clone(task));
        }
    }

    pub fn contains(&self, task: &Arc<dyn Task>) -> bool {
        self.tasks.iter().any(|queued| Arc::ptr_eq(queued, task))
    }

    /// 取出尚未被唤醒就已不再等待的任务，返回它是否还在队列里
    pub fn remove(&mut self, task: &Arc<dyn Task>) -> bool {
        match self.tasks.iter().position(|queued| Arc::ptr_eq(queued, task)) {
            Some(index) => {
                self.tasks.remove(index);
                true
            }
            None => false,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// 唤醒最早等待的任务，返回是否有任务被唤醒
    pub fn wake_one(&mut self) -> bool {
        match self.tasks.pop_front() {
            Some(task) => {
                task.wakeup();
                true
            }
            None => false,
        }
    }

    pub fn wake_all(&mut self) {
        while let Some(task) = self.tasks.pop_front() {
            task.wakeup();
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl fmt::Debug for WaitQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitQueue")
            .field("tasks", &self.tasks.len())
            .finish()
    }
}

#[cfg(any(test, feature = "std"))]
pub use self::thread::ThreadScheduler;

#[cfg(any(test, feature = "std"))]
mod thread {
    use alloc::sync::Arc;
    use std::thread::{self, Thread};

    use super::{Scheduler, Task};

    impl Task for Thread {
        fn wakeup(&self) {
            self.unpark();
        }
    }

    /// 以宿主线程充当任务，用 park/unpark 实现阻塞
    #[derive(Debug, Default, Clone, Copy)]
    pub struct ThreadScheduler;

    impl Scheduler for ThreadScheduler {
        fn current_task(&self) -> Arc<dyn Task> {
            Arc::new(thread::current())
        }

        fn block_current(&self) {
            thread::park();
        }
    }
}
