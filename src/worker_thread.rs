use std::thread::{self, JoinHandle};

use tracing::error;

use crate::worker_queue::WorkerQueue;

pub struct WorkerThread {
    queue: WorkerQueue,
    handle: Option<JoinHandle<()>>,
}

impl WorkerThread {
    pub fn new(queue: WorkerQueue) -> Self {
        Self {
            queue,
            handle: None,
        }
    }

    pub fn start(&mut self) {
        let queue = self.queue.clone();
        self.handle = Some(thread::spawn(move || Self::work(queue)));
    }

    fn work(queue: WorkerQueue) {
        while queue.is_running() {
            if queue.is_empty() {
                queue.wait_for_task();
                continue;
            }
            while let Some(task) = queue.pop_next_task() {
                if !task.check_dependencies_started() {
                    // not safe to run yet: requeue instead of blocking the
                    // worker on a dependency that has not even started
                    queue.add_task(task);
                } else {
                    task.execute();
                }
            }
        }
    }

    /// Joins the worker. The owning queue must already be destroyed,
    /// otherwise the thread would never exit its loop.
    pub fn destroy(&mut self) {
        debug_assert!(
            !self.queue.is_running(),
            "task queue is not supposed to be running anymore"
        );
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("worker thread terminated with a panic");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    use super::*;
    use crate::task::Task;

    #[test]
    fn test_worker_runs_dependencies_first() {
        let value = Arc::new(AtomicBool::new(false));
        let flag1 = value.clone();
        let flag2 = value.clone();
        let task1 = Arc::new(Task::new(move || flag1.store(true, Ordering::SeqCst)));
        let task2 = Arc::new(Task::new(move || flag2.store(false, Ordering::SeqCst)));
        assert!(task2.add_dependency(Arc::downgrade(&task1)));

        let queue = WorkerQueue::new();
        let mut worker = WorkerThread::new(queue.clone());
        worker.start();

        // the dependent is submitted before its dependency
        assert!(queue.add_task(task2.clone()));
        assert!(queue.add_task(task1.clone()));

        task2.join();
        assert!(task1.is_done());
        assert!(task2.is_done());
        assert!(!value.load(Ordering::SeqCst));

        queue.destroy();
        worker.destroy();
    }

    #[test]
    fn test_cross_queue_dependency() {
        let task1 = Arc::new(Task::new(|| {}));
        let task2 = Arc::new(Task::new(|| {}));
        assert!(task2.add_dependency(Arc::downgrade(&task1)));

        let queue1 = WorkerQueue::new();
        let queue2 = WorkerQueue::new();
        let mut worker1 = WorkerThread::new(queue1.clone());
        let mut worker2 = WorkerThread::new(queue2.clone());
        worker1.start();
        worker2.start();

        assert!(queue1.add_task(task2.clone()));
        assert!(queue2.add_task(task1.clone()));

        task2.join();
        assert!(task1.is_done());
        assert!(task2.is_done());

        queue1.destroy();
        queue2.destroy();
        worker1.destroy();
        worker2.destroy();
    }
}
