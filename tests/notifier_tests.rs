use futures_lease::{ItemFuture, Scheduler, SchedulerError, SchedulerEvent, SchedulerEventKind, SchedulerOptions};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, timeout};

// Worker double (same shape as in scheduler_tests.rs, kept standalone here)
#[derive(Debug, Clone, PartialEq)]
struct Worker {
  serial: usize,
}

type WorkerGenerator = Box<dyn Fn() -> ItemFuture<Worker, String> + Send + Sync>;

fn counting_generator(created: Arc<AtomicUsize>) -> WorkerGenerator {
  Box::new(move || -> ItemFuture<Worker, String> {
    let serial = created.fetch_add(1, Ordering::SeqCst) + 1;
    Box::pin(async move { Ok(Worker { serial }) })
  })
}

fn failing_generator() -> WorkerGenerator {
  Box::new(|| -> ItemFuture<Worker, String> { Box::pin(async { Err("out of memory".to_string()) }) })
}

// Helper to initialize tracing for tests
fn setup_tracing_for_test() {
  use std::sync::Once;
  use tracing_subscriber::{fmt, EnvFilter};
  static TRACING_INIT: Once = Once::new();

  TRACING_INIT.call_once(|| {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,futures_lease=trace"));
    fmt::Subscriber::builder()
      .with_env_filter(filter)
      .with_test_writer()
      .try_init()
      .ok();
  });
}

// Helper for collecting events in tests
fn create_collecting_handler() -> (
  Arc<Mutex<Vec<SchedulerEvent>>>,
  impl Fn(SchedulerEvent) + Send + Sync + 'static,
) {
  let collected = Arc::new(Mutex::new(Vec::new()));
  let collected_clone = collected.clone();
  let handler = move |event: SchedulerEvent| {
    tracing::debug!("Test collecting handler: {:?} for id {}", event.kind, event.id);
    collected_clone.lock().unwrap().push(event);
  };
  (collected, handler)
}

fn kinds(events: &Arc<Mutex<Vec<SchedulerEvent>>>) -> Vec<(String, SchedulerEventKind)> {
  events
    .lock()
    .unwrap()
    .iter()
    .map(|event| (event.id.clone(), event.kind.clone()))
    .collect()
}

async fn wait_for_events(events: &Arc<Mutex<Vec<SchedulerEvent>>>, count: usize) {
  timeout(Duration::from_secs(1), async {
    while events.lock().unwrap().len() < count {
      sleep(Duration::from_millis(5)).await;
    }
  })
  .await
  .unwrap_or_else(|_| panic!("Expected {} events, got {:?}", count, kinds(events)));
}

#[tokio::test]
async fn test_events_for_create_release_reuse() {
  setup_tracing_for_test();
  let pool_name = "test_events_basic";
  let scheduler = Scheduler::<Worker, _>::new(
    counting_generator(Arc::new(AtomicUsize::new(0))),
    SchedulerOptions::new(1).with_name(pool_name),
  );
  let (events, handler) = create_collecting_handler();
  scheduler.on_event(handler).unwrap();

  let x = scheduler.acquire("a").await.unwrap();
  scheduler.release("a", x);
  let y = scheduler.acquire("b").await.unwrap();
  scheduler.cancel("b", drop);
  drop(y);

  wait_for_events(&events, 4).await;
  assert_eq!(
    kinds(&events),
    vec![
      ("a".to_string(), SchedulerEventKind::Created),
      ("a".to_string(), SchedulerEventKind::Released),
      ("b".to_string(), SchedulerEventKind::Reused),
      ("b".to_string(), SchedulerEventKind::Cancelled),
    ]
  );
  let collected = events.lock().unwrap();
  assert!(collected.iter().all(|event| &*event.pool_name == pool_name));
  assert!(collected.iter().all(|event| event.time <= std::time::SystemTime::now()));
}

#[tokio::test]
async fn test_events_for_parking_and_handoff() {
  setup_tracing_for_test();
  let scheduler = Scheduler::<Worker, _>::new(
    counting_generator(Arc::new(AtomicUsize::new(0))),
    SchedulerOptions::new(1).with_name("test_events_handoff"),
  );
  let (events, handler) = create_collecting_handler();
  scheduler.on_event(handler).unwrap();

  let x = scheduler.acquire("a").await.unwrap();
  let for_b = scheduler.clone();
  let b = tokio::spawn(async move { for_b.acquire("b").await });
  wait_for_events(&events, 2).await;

  scheduler.release("a", x);
  b.await.unwrap().unwrap();

  let for_c = scheduler.clone();
  let c = tokio::spawn(async move { for_c.acquire("c").await });
  wait_for_events(&events, 5).await;
  let for_c_again = scheduler.clone();
  let c_again = tokio::spawn(async move { for_c_again.acquire("c").await });
  wait_for_events(&events, 6).await;
  assert_eq!(scheduler.withdraw("c"), 2);
  assert_eq!(c.await.unwrap(), Err(SchedulerError::Withdrawn));
  assert_eq!(c_again.await.unwrap(), Err(SchedulerError::Withdrawn));

  wait_for_events(&events, 8).await;
  assert_eq!(
    kinds(&events),
    vec![
      ("a".to_string(), SchedulerEventKind::Created),
      ("b".to_string(), SchedulerEventKind::Parked),
      ("a".to_string(), SchedulerEventKind::Released),
      ("b".to_string(), SchedulerEventKind::HandedOff),
      ("c".to_string(), SchedulerEventKind::Parked),
      ("c".to_string(), SchedulerEventKind::Parked),
      ("c".to_string(), SchedulerEventKind::Withdrawn),
      ("c".to_string(), SchedulerEventKind::Withdrawn),
    ]
  );
}

#[tokio::test]
async fn test_events_for_slot_grant_and_generation_failure() {
  setup_tracing_for_test();
  let created = Arc::new(AtomicUsize::new(0));
  let scheduler = Scheduler::<Worker, _>::new(counting_generator(created), SchedulerOptions::new(1).with_name("test_events_slot"));
  let (events, handler) = create_collecting_handler();
  scheduler.on_event(handler).unwrap();

  scheduler.acquire("a").await.unwrap();
  let for_b = scheduler.clone();
  let b = tokio::spawn(async move { for_b.acquire("b").await });
  wait_for_events(&events, 2).await;

  scheduler.cancel("a", drop);
  b.await.unwrap().unwrap();
  wait_for_events(&events, 5).await;
  assert_eq!(
    kinds(&events)[2..],
    [
      ("a".to_string(), SchedulerEventKind::Cancelled),
      ("b".to_string(), SchedulerEventKind::SlotGranted),
      ("b".to_string(), SchedulerEventKind::Created),
    ]
  );

  let failing = Scheduler::<Worker, _>::new(failing_generator(), SchedulerOptions::new(1).with_name("test_events_failure"));
  let (failure_events, failure_handler) = create_collecting_handler();
  failing.on_event(failure_handler).unwrap();
  assert_eq!(
    failing.acquire("z").await,
    Err(SchedulerError::Generator("out of memory".to_string()))
  );
  wait_for_events(&failure_events, 1).await;
  assert_eq!(
    kinds(&failure_events),
    vec![("z".to_string(), SchedulerEventKind::GenerationFailed)]
  );
}

#[tokio::test]
async fn test_panicking_handler_does_not_stop_delivery() {
  setup_tracing_for_test();
  let scheduler = Scheduler::<Worker, _>::new(
    counting_generator(Arc::new(AtomicUsize::new(0))),
    SchedulerOptions::unbounded().with_name("test_events_panic"),
  );
  scheduler
    .on_event(|event| {
      if event.kind == SchedulerEventKind::Created {
        panic!("handler intentionally panicked");
      }
    })
    .unwrap();
  let (events, handler) = create_collecting_handler();
  scheduler.on_event(handler).unwrap();

  let x = scheduler.acquire("a").await.unwrap();
  scheduler.release("a", x);
  scheduler.acquire("b").await.unwrap();

  wait_for_events(&events, 3).await;
  assert_eq!(
    kinds(&events),
    vec![
      ("a".to_string(), SchedulerEventKind::Created),
      ("a".to_string(), SchedulerEventKind::Released),
      ("b".to_string(), SchedulerEventKind::Reused),
    ]
  );
}

#[test]
fn test_on_event_without_runtime_fails() {
  let scheduler = Scheduler::<Worker, _>::new(
    counting_generator(Arc::new(AtomicUsize::new(0))),
    SchedulerOptions::new(2).with_name("test_events_no_runtime"),
  );
  assert_eq!(scheduler.on_event(|_| {}), Err(SchedulerError::NoRuntime));
}

#[test]
fn test_on_event_with_configured_runtime() {
  let runtime = tokio::runtime::Builder::new_multi_thread()
    .worker_threads(1)
    .enable_all()
    .build()
    .unwrap();
  let scheduler = Scheduler::<Worker, _>::new(
    counting_generator(Arc::new(AtomicUsize::new(0))),
    SchedulerOptions::new(2)
      .with_name("test_events_configured_runtime")
      .with_runtime(runtime.handle().clone()),
  );

  // Registered outside any runtime context.
  let (events, handler) = create_collecting_handler();
  scheduler.on_event(handler).unwrap();

  runtime.block_on(async {
    let x = scheduler.acquire("a").await.unwrap();
    scheduler.release("a", x);
    wait_for_events(&events, 2).await;
  });
  assert_eq!(
    kinds(&events),
    vec![
      ("a".to_string(), SchedulerEventKind::Created),
      ("a".to_string(), SchedulerEventKind::Released),
    ]
  );
}
