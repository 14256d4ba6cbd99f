use std::{sync::Arc, thread, time::Duration};

use frame_workers::frame_timer::FrameTimer;
use frame_workers::renderer::Renderer;
use frame_workers::task::Task;
use frame_workers::worker_manager::{WorkerManager, WorkerManagerDefinition};
use frame_workers::worker_queue::{MAIN_QUEUE_NAME, OTHER_QUEUE_NAME, RESOURCE_QUEUE_NAME};
use rand::Rng;
use tracing::{debug, info};

fn simulate_work(base: Duration) {
    let jitter = rand::thread_rng().gen_range(0..4);
    thread::sleep(base + Duration::from_millis(jitter));
}

// A texture-loader-shaped pipeline: disk load on the resource queue, decode
// on the generic pool, and a gpu upload handed to the pre-render drain once
// the decode has run.
fn spawn_asset_pipeline(manager: &WorkerManager, renderer: &Renderer, asset: usize) -> Arc<Task> {
    let load = Arc::new(Task::new(move || {
        simulate_work(Duration::from_millis(8));
        debug!(asset, "loaded from disk");
    }));

    let upload = Arc::new(Task::new(move || {
        simulate_work(Duration::from_millis(2));
        debug!(asset, "uploaded to gpu");
    }));

    let decode = {
        let renderer = renderer.clone();
        let upload = Arc::downgrade(&upload);
        Arc::new(Task::new(move || {
            simulate_work(Duration::from_millis(5));
            debug!(asset, "decoded");
            renderer.register_pre_render_task(upload.clone());
        }))
    };

    assert!(decode.add_dependency(Arc::downgrade(&load)));
    assert!(upload.add_dependency(Arc::downgrade(&decode)));

    assert!(manager.add_task(&load, RESOURCE_QUEUE_NAME));
    assert!(manager.add_task(&decode, OTHER_QUEUE_NAME));

    upload
}

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let mut manager = WorkerManager::new();
    manager
        .init(&WorkerManagerDefinition::default_definition())
        .expect("default worker layout is valid");
    info!(workers = manager.workers_count(), "worker manager started");

    let renderer = Renderer::new();

    let scene_ready = Arc::new(Task::new(|| info!("scene bookkeeping ran on the main thread")));
    assert!(manager.add_task(&scene_ready, MAIN_QUEUE_NAME));

    let uploads = (0..4)
        .map(|asset| spawn_asset_pipeline(&manager, &renderer, asset))
        .collect::<Vec<_>>();

    let mut timer = FrameTimer::new();
    while !uploads.iter().all(|upload| upload.is_done()) {
        manager.execute_main_thread();
        let executed = renderer.drain_pre_render();
        let delta = timer.tick();
        if executed > 0 {
            info!(
                frame = timer.frame_count(),
                delta_ms = delta.as_millis() as u64,
                executed,
                "drained pre-render work"
            );
        }
        thread::sleep(Duration::from_millis(16));
    }

    info!(
        frames = timer.frame_count(),
        elapsed_ms = timer.elapsed().as_millis() as u64,
        "all assets uploaded"
    );
    manager.destroy();
}
