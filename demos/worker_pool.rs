use futures_lease::{ItemFuture, Scheduler, SchedulerOptions};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone)]
struct TrainingWorker {
  pid: usize,
}

type WorkerGenerator = Box<dyn Fn() -> ItemFuture<TrainingWorker, String> + Send + Sync>;

fn spawn_worker(next_pid: Arc<AtomicUsize>) -> WorkerGenerator {
  Box::new(move || -> ItemFuture<TrainingWorker, String> {
    let pid = next_pid.fetch_add(1, Ordering::SeqCst) + 1000;
    Box::pin(async move {
      info!("Booting worker process {}", pid);
      tokio::time::sleep(Duration::from_millis(300)).await;
      Ok(TrainingWorker { pid })
    })
  })
}

async fn train(scheduler: Scheduler<TrainingWorker, WorkerGenerator>, model_id: String) {
  let worker = match scheduler.acquire(&model_id).await {
    Ok(worker) => worker,
    Err(e) => {
      tracing::error!("Model {}: could not get a worker: {}", model_id, e);
      return;
    }
  };
  info!("Model {}: training on worker {}", model_id, worker.pid);
  tokio::time::sleep(Duration::from_millis(500)).await;
  info!("Model {}: done, releasing worker {}", model_id, worker.pid);
  scheduler.release(&model_id, worker);
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  info!("--- Worker Pool Example (2 workers, 6 trainings) ---");

  let scheduler = Scheduler::new(
    spawn_worker(Arc::new(AtomicUsize::new(0))),
    SchedulerOptions::new(2).with_name("training_workers"),
  );

  let mut trainings = Vec::new();
  for i in 0..6 {
    trainings.push(tokio::spawn(train(scheduler.clone(), format!("model-{}", i))));
  }
  for training in trainings {
    training.await.expect("training task panicked");
  }

  info!("Final status: {:?}", scheduler.status());
  scheduler.close();
  let stopped = scheduler.drain_ready(|worker| info!("Terminating worker process {}", worker.pid));
  info!("Stopped {} idle workers.", stopped);
  info!("--- Worker Pool Example End ---");
}
