use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};
use std::time::SystemTime;

use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle as TokioHandle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, Instrument};

// --- Public Event Structs for Handlers ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEventKind {
  /// An idle item was leased without creating a new one.
  Reused,
  /// The generator produced a new item.
  Created,
  /// No item or slot was available; the acquisition is waiting.
  Parked,
  /// A released item went straight to a parked caller.
  HandedOff,
  /// A freed slot was granted to a parked caller, who now creates an item.
  SlotGranted,
  /// The holder released its item, to the ready pool or a parked caller.
  Released,
  Cancelled,
  Withdrawn,
  GenerationFailed,
}

#[derive(Debug, Clone)]
pub struct SchedulerEvent {
  pub pool_name: Arc<str>,
  /// Caller id the event concerns.
  pub id: String,
  pub kind: SchedulerEventKind,
  pub time: SystemTime,
}

type EventHandler = Arc<dyn Fn(SchedulerEvent) + Send + Sync + 'static>;

struct NotifierInternalState {
  rx_for_init: Option<UnboundedReceiver<SchedulerEvent>>,
  worker_join_handle: Option<JoinHandle<()>>,
}

/// Delivers lifecycle events to registered handlers on a background task.
///
/// The worker is only spawned once the first handler is registered; until then
/// `emit` is a no-op.
pub(crate) struct EventNotifier {
  pool_name: Arc<str>,
  tx: UnboundedSender<SchedulerEvent>,
  handlers: Arc<RwLock<Vec<EventHandler>>>,
  enabled: AtomicBool,
  init_once: Once,
  internal_state: Mutex<NotifierInternalState>,
  closed_token: CancellationToken,
}

impl fmt::Debug for EventNotifier {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("EventNotifier")
      .field("pool_name", &self.pool_name)
      .field("handler_count", &self.handlers.read().len())
      .field("worker_running", &self.is_running())
      .finish()
  }
}

impl EventNotifier {
  pub(crate) fn new(pool_name: Arc<str>, closed_token: CancellationToken) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    Self {
      pool_name,
      tx,
      handlers: Arc::new(RwLock::new(Vec::new())),
      enabled: AtomicBool::new(false),
      init_once: Once::new(),
      internal_state: Mutex::new(NotifierInternalState {
        rx_for_init: Some(rx),
        worker_join_handle: None,
      }),
      closed_token,
    }
  }

  pub(crate) fn emit(&self, id: &str, kind: SchedulerEventKind) {
    if !self.enabled.load(Ordering::Acquire) {
      return;
    }
    let event = SchedulerEvent {
      pool_name: self.pool_name.clone(),
      id: id.to_string(),
      kind,
      time: SystemTime::now(),
    };
    if self.tx.send(event).is_err() {
      trace!(pool_name = %self.pool_name, "Notification worker gone, dropping event.");
    }
  }

  pub(crate) fn add_handler(
    &self,
    runtime: &TokioHandle,
    handler: impl Fn(SchedulerEvent) + Send + Sync + 'static,
  ) {
    self.ensure_worker_initialized(runtime);

    let mut handlers_guard = self.handlers.write();
    handlers_guard.push(Arc::new(handler));
    self.enabled.store(true, Ordering::Release);
    info!(pool_name = %self.pool_name, "Notifier: Added new event handler. Total handlers: {}", handlers_guard.len());
  }

  fn ensure_worker_initialized(&self, runtime: &TokioHandle) {
    self.init_once.call_once(|| {
      let mut state_guard = self.internal_state.lock();
      if let Some(rx) = state_guard.rx_for_init.take() {
        info!(pool_name = %self.pool_name, "First event handler added. Starting notification worker.");
        let worker_jh = runtime.spawn(
          Self::run_notification_worker_loop(rx, self.handlers.clone(), self.closed_token.clone())
            .instrument(info_span!("lease_notification_worker", pool_name = %self.pool_name)),
        );
        state_guard.worker_join_handle = Some(worker_jh);
      }
    });
  }

  async fn run_notification_worker_loop(
    mut rx: UnboundedReceiver<SchedulerEvent>,
    handlers: Arc<RwLock<Vec<EventHandler>>>,
    closed_token: CancellationToken,
  ) {
    info!("Notification worker started.");
    let mut closed_seen = false;

    loop {
      tokio::select! {
        biased;

        received = rx.recv() => {
          match received {
            Some(event) => Self::dispatch(&handlers, event),
            None => {
              info!("Notification worker: all event senders dropped. Terminating.");
              break;
            }
          }
        }

        // Only logged; events emitted after close (releases, cancels) still flow.
        _ = closed_token.cancelled(), if !closed_seen => {
          debug!("Notification worker: scheduler closed, continuing until senders drop.");
          closed_seen = true;
        }
      }
    }
  }

  fn dispatch(handlers: &RwLock<Vec<EventHandler>>, event: SchedulerEvent) {
    // Clone the list so handlers may register further handlers without deadlocking.
    let current: Vec<EventHandler> = handlers.read().clone();
    trace!(id = %event.id, kind = ?event.kind, "Dispatching event to {} handlers.", current.len());

    for handler in current {
      let event_for_handler = event.clone();
      let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(event_for_handler)));
      if result.is_err() {
        error!(
          pool_name = %event.pool_name,
          id = %event.id,
          "An event handler panicked while handling {:?}.",
          event.kind
        );
      }
    }
  }

  /// Whether the notification worker has been started.
  pub(crate) fn is_running(&self) -> bool {
    self
      .internal_state
      .lock()
      .worker_join_handle
      .as_ref()
      .is_some_and(|handle| !handle.is_finished())
  }
}
