use std::{collections::HashMap, sync::Arc};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::{
    task::Task,
    utils,
    worker_queue::{
        WorkerQueue, MAIN_QUEUE_NAME, OTHER_QUEUE_NAME, RENDER_QUEUE_NAME, RESOURCE_QUEUE_NAME,
    },
    worker_thread::WorkerThread,
};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueDefinition {
    pub name: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ThreadGroupDefinition {
    pub queue: String,
    pub thread_count: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerManagerDefinition {
    pub main_queue: QueueDefinition,
    pub other_queues: Vec<QueueDefinition>,
    pub other_threads: Vec<ThreadGroupDefinition>,
}

impl WorkerManagerDefinition {
    /// The canonical engine layout: a synchronous main queue plus "render",
    /// "resource" and a generic "other" pool sized from the host cpu count.
    pub fn default_definition() -> Self {
        Self {
            main_queue: QueueDefinition {
                name: MAIN_QUEUE_NAME.to_string(),
            },
            other_queues: vec![
                QueueDefinition {
                    name: RENDER_QUEUE_NAME.to_string(),
                },
                QueueDefinition {
                    name: RESOURCE_QUEUE_NAME.to_string(),
                },
                QueueDefinition {
                    name: OTHER_QUEUE_NAME.to_string(),
                },
            ],
            other_threads: vec![
                ThreadGroupDefinition {
                    queue: RENDER_QUEUE_NAME.to_string(),
                    thread_count: 1,
                },
                ThreadGroupDefinition {
                    queue: RESOURCE_QUEUE_NAME.to_string(),
                    thread_count: 1,
                },
                ThreadGroupDefinition {
                    queue: OTHER_QUEUE_NAME.to_string(),
                    thread_count: utils::default_worker_count(),
                },
            ],
        }
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("thread group references unknown queue `{0}`")]
    UnknownQueue(String),
    #[error("main queue `{0}` cannot be thread-backed")]
    MainQueueThreads(String),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum QueueSlot {
    Main,
    Background(usize),
}

#[derive(Default)]
pub struct WorkerManager {
    main_queue: WorkerQueue,
    queues: Vec<WorkerQueue>,
    threads: Vec<WorkerThread>,
    queue_map: HashMap<String, QueueSlot>,
}

impl WorkerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the queues and worker threads described by `definition` and
    /// starts every thread. Fails before anything is started when a thread
    /// group references an undeclared queue or the main queue.
    pub fn init(&mut self, definition: &WorkerManagerDefinition) -> Result<(), WorkerError> {
        self.queue_map
            .insert(definition.main_queue.name.clone(), QueueSlot::Main);
        for (index, queue) in definition.other_queues.iter().enumerate() {
            self.queues.push(WorkerQueue::new());
            self.queue_map
                .insert(queue.name.clone(), QueueSlot::Background(index));
        }

        for group in &definition.other_threads {
            let slot = self
                .queue_map
                .get(&group.queue)
                .copied()
                .ok_or_else(|| WorkerError::UnknownQueue(group.queue.clone()))?;
            let QueueSlot::Background(index) = slot else {
                return Err(WorkerError::MainQueueThreads(group.queue.clone()));
            };
            for _ in 0..group.thread_count {
                self.threads.push(WorkerThread::new(self.queues[index].clone()));
            }
        }

        for thread in &mut self.threads {
            thread.start();
        }

        Ok(())
    }

    pub fn add_task(&self, task: &Arc<Task>, queue_name: &str) -> bool {
        let Some(slot) = self.queue_map.get(queue_name) else {
            warn!("could not add task to queue `{queue_name}`: it does not exist");
            return false;
        };
        match slot {
            QueueSlot::Main => self.main_queue.add_task(task.clone()),
            QueueSlot::Background(index) => self.queues[*index].add_task(task.clone()),
        }
    }

    /// Drains the main queue on the calling thread, requeueing units whose
    /// dependencies have not started yet. Returns once the queue is empty.
    pub fn execute_main_thread(&self) {
        while let Some(task) = self.main_queue.pop_next_task() {
            if !task.check_dependencies_started() {
                self.main_queue.add_task(task);
            } else {
                task.execute();
            }
        }
    }

    /// Queues are stopped before any thread is joined; the other way around
    /// the joins would hang.
    pub fn destroy(&mut self) {
        for queue in &self.queues {
            queue.destroy();
        }
        for thread in &mut self.threads {
            thread.destroy();
        }
        self.main_queue.destroy();
    }

    pub fn workers_count(&self) -> usize {
        self.threads.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    };

    use super::*;

    fn single_queue_definition(name: &str, thread_count: usize) -> WorkerManagerDefinition {
        WorkerManagerDefinition {
            main_queue: QueueDefinition {
                name: MAIN_QUEUE_NAME.to_string(),
            },
            other_queues: vec![QueueDefinition {
                name: name.to_string(),
            }],
            other_threads: vec![ThreadGroupDefinition {
                queue: name.to_string(),
                thread_count,
            }],
        }
    }

    #[test]
    fn test_empty_manager() {
        let mut manager = WorkerManager::new();
        manager
            .init(&single_queue_definition(OTHER_QUEUE_NAME, 2))
            .unwrap();
        assert_eq!(manager.workers_count(), 2);

        manager.execute_main_thread();
        manager.destroy();
    }

    #[test]
    fn test_default_definition() {
        let definition = WorkerManagerDefinition::default_definition();
        assert_eq!(definition.main_queue.name, MAIN_QUEUE_NAME);
        let names = definition
            .other_queues
            .iter()
            .map(|queue| queue.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(
            names,
            [RENDER_QUEUE_NAME, RESOURCE_QUEUE_NAME, OTHER_QUEUE_NAME]
        );
        assert_eq!(definition.other_threads[0].thread_count, 1);
        assert_eq!(definition.other_threads[1].thread_count, 1);
        assert_eq!(
            definition.other_threads[2].thread_count,
            utils::default_worker_count()
        );
    }

    #[test]
    fn test_init_rejects_unknown_thread_group() {
        let mut definition = single_queue_definition(OTHER_QUEUE_NAME, 1);
        definition.other_threads.push(ThreadGroupDefinition {
            queue: "nonexistent".to_string(),
            thread_count: 1,
        });

        let mut manager = WorkerManager::new();
        assert!(matches!(
            manager.init(&definition),
            Err(WorkerError::UnknownQueue(name)) if name == "nonexistent"
        ));
    }

    #[test]
    fn test_init_rejects_thread_backed_main_queue() {
        let mut definition = single_queue_definition(OTHER_QUEUE_NAME, 1);
        definition.other_threads.push(ThreadGroupDefinition {
            queue: MAIN_QUEUE_NAME.to_string(),
            thread_count: 1,
        });

        let mut manager = WorkerManager::new();
        assert!(matches!(
            manager.init(&definition),
            Err(WorkerError::MainQueueThreads(_))
        ));
    }

    #[test]
    fn test_unknown_queue_name_drops_task() {
        let mut manager = WorkerManager::new();
        manager
            .init(&single_queue_definition(OTHER_QUEUE_NAME, 1))
            .unwrap();

        let task = Arc::new(Task::new(|| {}));
        assert!(!manager.add_task(&task, "nonexistent"));
        assert!(!task.has_started());

        manager.destroy();
    }

    #[test]
    fn test_main_queue_runs_on_calling_thread() {
        let mut manager = WorkerManager::new();
        manager
            .init(&single_queue_definition(OTHER_QUEUE_NAME, 1))
            .unwrap();

        let caller = std::thread::current().id();
        let ran_on = Arc::new(Mutex::new(None));
        let slot = ran_on.clone();
        let task = Arc::new(Task::new(move || {
            *slot.lock().unwrap() = Some(std::thread::current().id());
        }));

        assert!(manager.add_task(&task, MAIN_QUEUE_NAME));
        assert!(!task.is_done());
        manager.execute_main_thread();

        assert!(task.is_done());
        assert_eq!(*ran_on.lock().unwrap(), Some(caller));

        manager.destroy();
    }

    // a dependent submitted before its dependency still runs after it
    #[test]
    fn test_dependency_submitted_last() {
        let mut manager = WorkerManager::new();
        manager
            .init(&single_queue_definition(OTHER_QUEUE_NAME, 2))
            .unwrap();

        let task1 = Arc::new(Task::new(|| {}));
        let dep_done_first = Arc::new(AtomicBool::new(false));
        let observed = dep_done_first.clone();
        let dependency = task1.clone();
        let task2 = Arc::new(Task::new(move || {
            observed.store(dependency.is_done(), Ordering::SeqCst);
        }));
        assert!(task2.add_dependency(Arc::downgrade(&task1)));

        assert!(manager.add_task(&task2, OTHER_QUEUE_NAME));
        assert!(manager.add_task(&task1, OTHER_QUEUE_NAME));

        task2.join();
        assert!(task1.is_done());
        assert!(task2.is_done());
        assert!(dep_done_first.load(Ordering::SeqCst));

        manager.destroy();
    }

    #[test]
    fn test_single_thread_queue_preserves_submission_order() {
        let mut manager = WorkerManager::new();
        manager
            .init(&single_queue_definition(RENDER_QUEUE_NAME, 1))
            .unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        let tasks = (0..100)
            .map(|index| {
                let order = order.clone();
                Arc::new(Task::new(move || order.lock().unwrap().push(index)))
            })
            .collect::<Vec<_>>();

        for task in &tasks {
            assert!(manager.add_task(task, RENDER_QUEUE_NAME));
        }
        for task in &tasks {
            task.join();
        }

        assert!(tasks.iter().all(|task| task.is_done()));
        let order = order.lock().unwrap();
        assert_eq!(*order, (0..100).collect::<Vec<_>>());

        manager.destroy();
    }
}
