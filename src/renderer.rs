use std::{
    collections::VecDeque,
    ops::Deref,
    sync::{Arc, Weak},
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use tracing::debug;

use crate::task::Task;

pub const DEFAULT_PRE_RENDER_BUDGET: Duration = Duration::from_millis(8);

/// Render-thread entry point for time-sliced work. Producers on any thread
/// register GPU-only units (buffer and texture uploads); the render thread
/// drains them once per frame without blowing the frame budget.
#[derive(Clone)]
pub struct Renderer(Arc<RendererInner>);

impl Renderer {
    pub fn new() -> Self {
        Self::with_budget(DEFAULT_PRE_RENDER_BUDGET)
    }

    pub fn with_budget(budget: Duration) -> Self {
        Self(Arc::new(RendererInner {
            pre_render_tasks: Mutex::new(VecDeque::new()),
            budget,
        }))
    }
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for Renderer {
    type Target = RendererInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

pub struct RendererInner {
    pre_render_tasks: Mutex<VecDeque<Weak<Task>>>,
    budget: Duration,
}

impl RendererInner {
    /// Registrations are one-shot: each is consumed by at most one drain,
    /// and the producer re-registers if its unit did not run.
    pub fn register_pre_render_task(&self, task: Weak<Task>) {
        self.pre_render_tasks.lock().push_back(task);
    }

    pub fn pending_pre_render_tasks(&self) -> usize {
        self.pre_render_tasks.lock().len()
    }

    /// Runs registered units on the calling thread until the wall-clock
    /// budget is spent, the list empties, or a unit's dependencies have not
    /// started yet (which ends the drain for this frame). Returns how many
    /// units were executed.
    pub fn drain_pre_render(&self) -> usize {
        let started_at = Instant::now();
        let mut executed = 0;

        while started_at.elapsed() < self.budget {
            let Some(task) = self.pre_render_tasks.lock().pop_front() else {
                break;
            };
            let Some(task) = task.upgrade() else {
                continue;
            };
            if !task.check_dependencies_started() {
                break;
            }
            task.execute();
            executed += 1;
        }

        debug!(
            executed,
            deferred = self.pending_pre_render_tasks(),
            "pre-render drain finished"
        );
        executed
    }
}
