use std::thread;

/// Worker count for the generic "other" pool: two hardware threads are left
/// for the main and render loops.
pub fn default_worker_count() -> usize {
    thread::available_parallelism()
        .map(|count| count.get())
        .unwrap_or(1)
        .saturating_sub(2)
}
