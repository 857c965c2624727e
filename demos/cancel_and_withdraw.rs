use futures_lease::{ItemFuture, Scheduler, SchedulerError, SchedulerOptions};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone)]
struct Worker {
  pid: usize,
}

type WorkerGenerator = Box<dyn Fn() -> ItemFuture<Worker, String> + Send + Sync>;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  info!("--- Cancel and Withdraw Example ---");

  let next_pid = Arc::new(AtomicUsize::new(100));
  let generator: WorkerGenerator = Box::new(move || -> ItemFuture<Worker, String> {
    let pid = next_pid.fetch_add(1, Ordering::SeqCst);
    Box::pin(async move { Ok(Worker { pid }) })
  });
  let scheduler = Scheduler::new(generator, SchedulerOptions::new(1).with_name("single_worker"));

  scheduler
    .on_event(|event| info!("[event] {:?} for {}", event.kind, event.id))
    .expect("running inside a Tokio runtime");

  let stuck = scheduler.acquire("long-training").await.expect("first worker boots");
  info!("long-training holds worker {}", stuck.pid);

  // Nobody can get a worker until long-training gives its one back.
  let waiting = scheduler.clone();
  let queued = tokio::spawn(async move { waiting.acquire("queued-training").await });
  let impatient = scheduler.clone();
  let bounded = tokio::spawn(async move {
    tokio::time::timeout(Duration::from_millis(100), impatient.acquire("impatient-training")).await
  });

  tokio::time::sleep(Duration::from_millis(50)).await;
  info!("Parked acquisitions: {}", scheduler.waiting_count());

  match bounded.await.expect("task panicked") {
    Ok(result) => info!("impatient-training got {:?}", result),
    Err(_) => info!("impatient-training gave up after its timeout"),
  }

  // The stuck worker is killed; its slot goes to the parked caller, who boots a new one.
  scheduler.cancel("long-training", |worker| info!("Killing stuck worker {}", worker.pid));
  match queued.await.expect("task panicked") {
    Ok(worker) => info!("queued-training now runs on fresh worker {}", worker.pid),
    Err(e) => info!("queued-training failed: {}", e),
  }

  let late = scheduler.clone();
  let late_request = tokio::spawn(async move { late.acquire("late-training").await });
  tokio::time::sleep(Duration::from_millis(20)).await;
  info!("Withdrew {} parked request(s).", scheduler.withdraw("late-training"));
  match late_request.await.expect("task panicked") {
    Err(SchedulerError::Withdrawn) => info!("late-training was withdrawn"),
    other => info!("late-training ended with {:?}", other),
  }

  tokio::time::sleep(Duration::from_millis(20)).await;
  info!("--- Cancel and Withdraw Example End ---");
}
