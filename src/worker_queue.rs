use std::{collections::VecDeque, ops::Deref, sync::Arc};

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::warn;

use crate::task::Task;

pub const MAIN_QUEUE_NAME: &str = "main";
pub const RENDER_QUEUE_NAME: &str = "render";
pub const RESOURCE_QUEUE_NAME: &str = "resource";
pub const OTHER_QUEUE_NAME: &str = "other";

#[derive(Clone, Default)]
pub struct WorkerQueue(Arc<WorkerQueueInner>);

impl WorkerQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Deref for WorkerQueue {
    type Target = WorkerQueueInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Default)]
pub struct WorkerQueueInner {
    state: RwLock<QueueState>,
    sleep: Mutex<()>,
    waiters: Condvar,
}

struct QueueState {
    pending: VecDeque<Arc<Task>>,
    running: bool,
}

impl Default for QueueState {
    fn default() -> Self {
        Self {
            pending: VecDeque::new(),
            running: true,
        }
    }
}

impl WorkerQueueInner {
    pub fn contains(&self, task: &Arc<Task>) -> bool {
        self.state
            .read()
            .pending
            .iter()
            .any(|queued| Arc::ptr_eq(queued, task))
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().pending.is_empty()
    }

    pub fn is_running(&self) -> bool {
        self.state.read().running
    }

    pub fn pop_next_task(&self) -> Option<Arc<Task>> {
        self.state.write().pending.pop_front()
    }

    pub fn add_task(&self, task: Arc<Task>) -> bool {
        {
            let mut state = self.state.write();
            if state.pending.iter().any(|queued| Arc::ptr_eq(queued, &task)) {
                warn!("worker queue already contains the added task");
                return false;
            }
            state.pending.push_back(task);
        }
        // taking the sleep lock orders the notify after any waiter that has
        // re-checked the queue and is about to park
        let _sleep = self.sleep.lock();
        self.waiters.notify_one();
        true
    }

    pub fn wait_for_task(&self) {
        let mut sleep = self.sleep.lock();
        if !self.is_empty() || !self.is_running() {
            return;
        }
        self.waiters.wait(&mut sleep);
    }

    /// Stops the queue and wakes every blocked waiter so bound workers can
    /// observe the shutdown and exit. Idempotent.
    pub fn destroy(&self) {
        self.state.write().running = false;
        let _sleep = self.sleep.lock();
        self.waiters.notify_all();
    }
}

impl Drop for WorkerQueueInner {
    fn drop(&mut self) {
        self.destroy();
    }
}
