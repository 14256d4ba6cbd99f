use std::{
    collections::HashSet,
    fmt,
    sync::{
        atomic::Ordering,
        Arc, Weak,
    },
};

use atomig::{Atom, AtomLogic, Atomic};
use parking_lot::{Condvar, Mutex, RwLock};
use smallvec::SmallVec;

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct TaskStatus: u8 {
        const STARTED = 1 << 0;
        const DONE = 1 << 1;
    }
}

impl Atom for TaskStatus {
    type Repr = u8;

    fn pack(self) -> Self::Repr {
        self.bits()
    }

    fn unpack(src: Self::Repr) -> Self {
        TaskStatus::from_bits(src).unwrap()
    }
}

impl AtomLogic for TaskStatus {}

#[derive(Default)]
struct CompletionSignal {
    done: Mutex<bool>,
    cond: Condvar,
}

impl CompletionSignal {
    fn complete(&self) {
        let mut done = self.done.lock();
        *done = true;
        self.cond.notify_all();
    }

    fn wait(&self) {
        let mut done = self.done.lock();
        while !*done {
            self.cond.wait(&mut done);
        }
    }
}

pub struct Task {
    body: Box<dyn Fn() + Send + Sync>,
    status: Atomic<TaskStatus>,
    signal: RwLock<Arc<CompletionSignal>>,
    dependencies: RwLock<SmallVec<[Weak<Task>; 4]>>,
}

impl Task {
    pub fn new(body: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            body: Box::new(body),
            status: Atomic::new(TaskStatus::empty()),
            signal: RwLock::new(Arc::new(CompletionSignal::default())),
            dependencies: RwLock::new(SmallVec::new()),
        }
    }

    /// Joins every live dependency, runs the body once and completes the
    /// signal. A second `execute` waits for the first instead of re-running
    /// the body.
    pub fn execute(&self) {
        let dependencies = self.dependencies.read().clone();
        for dependency in dependencies.iter().filter_map(Weak::upgrade) {
            if !dependency.is_done() {
                dependency.join();
            }
        }

        let previous = self.status.fetch_or(TaskStatus::STARTED, Ordering::AcqRel);
        if previous.contains(TaskStatus::STARTED) {
            self.join();
            return;
        }

        (self.body)();
        self.status.fetch_or(TaskStatus::DONE, Ordering::AcqRel);
        self.signal.read().complete();
    }

    pub fn join(&self) {
        if self.is_done() {
            return;
        }
        let signal = self.signal.read().clone();
        signal.wait();
    }

    pub fn is_done(&self) -> bool {
        self.status.load(Ordering::Acquire).contains(TaskStatus::DONE)
    }

    pub fn has_started(&self) -> bool {
        self.status.load(Ordering::Acquire).contains(TaskStatus::STARTED)
    }

    pub fn check_dependencies_started(&self) -> bool {
        self.dependencies
            .read()
            .iter()
            .all(|dependency| match dependency.upgrade() {
                Some(dependency) => dependency.has_started(),
                None => true,
            })
    }

    /// Adds `dependency` as an edge of this task. Returns false without
    /// mutating anything when the candidate is already dead, is the task
    /// itself, already appears in the dependency tree, or would close a
    /// cycle back to this task.
    ///
    /// Dependency edges must only be added before the task is first
    /// submitted; the tree walk does not lock the graph as a whole.
    pub fn add_dependency(&self, dependency: Weak<Task>) -> bool {
        let Some(candidate) = dependency.upgrade() else {
            return false;
        };
        let this = self as *const Task;
        if Arc::as_ptr(&candidate) == this {
            return false;
        }

        let targets = [this, Arc::as_ptr(&candidate)];
        let own = self.dependencies.read().clone();
        if dependency_tree_contains(&own, targets) {
            return false;
        }
        let theirs = candidate.dependencies.read().clone();
        if dependency_tree_contains(&theirs, targets) {
            return false;
        }

        self.dependencies.write().push(dependency);
        true
    }

    /// Clears the status, the dependency edges and the completion signal,
    /// but keeps the body so the task can be submitted again. Must not be
    /// called while another thread may be inside `execute` or `join`.
    pub fn reset(&self) {
        *self.signal.write() = Arc::new(CompletionSignal::default());
        self.status.store(TaskStatus::empty(), Ordering::Release);
        self.dependencies.write().clear();
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("status", &self.status.load(Ordering::Relaxed))
            .field("dependencies", &self.dependencies.read().len())
            .finish()
    }
}

// Iterative reachability walk. Edges that died mid-walk are treated as
// non-edges; the visited set bounds the walk on diamond-shaped graphs.
fn dependency_tree_contains(roots: &[Weak<Task>], targets: [*const Task; 2]) -> bool {
    let mut visited = HashSet::new();
    let mut stack = roots.iter().filter_map(Weak::upgrade).collect::<Vec<_>>();

    while let Some(task) = stack.pop() {
        let ptr = Arc::as_ptr(&task);
        if targets.contains(&ptr) {
            return true;
        }
        if !visited.insert(ptr) {
            continue;
        }
        stack.extend(task.dependencies.read().iter().filter_map(Weak::upgrade));
    }

    false
}
