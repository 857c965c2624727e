use crate::error::SchedulerError;
use crate::generator::Generator;
use crate::notifier::{EventNotifier, SchedulerEvent, SchedulerEventKind};
use crate::options::{Capacity, SchedulerOptions};
use crate::state::{Admission, PoolState, Recirculation, SchedulerStatus};
use crate::waiter::{CreationPermit, Grant, Retirement, WaitGuard};

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle as TokioHandle;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, debug_span, info, trace, warn, Instrument};

lazy_static::lazy_static! {
  static ref NEXT_WAITER_TICKET: AtomicU64 = AtomicU64::new(0);
}

/// State shared between a scheduler, its clones, and in-flight acquisitions.
pub(crate) struct Core<T> {
  pub(crate) name: Arc<str>,
  state: Mutex<PoolState<T>>,
  notifier: EventNotifier,
  closed_token: CancellationToken,
  runtime: Option<TokioHandle>,
}

impl<T: Clone + Send + 'static> Core<T> {
  pub(crate) fn commit_creation(&self, id: &str, item: T) {
    self.state.lock().commit_creation(id, item);
    self.notifier.emit(id, SchedulerEventKind::Created);
  }

  pub(crate) fn abandon_creation(&self) {
    let granted = self.state.lock().abandon_creation();
    if let Some(waiter_id) = granted {
      debug!(pool_name = %self.name, id = %waiter_id, "Returned creation slot granted to parked acquisition.");
      self.notifier.emit(&waiter_id, SchedulerEventKind::SlotGranted);
    }
  }

  pub(crate) fn finish_cancel(&self, id: &str) {
    let granted = self.state.lock().finish_cancel(id);
    if let Some(waiter_id) = granted {
      debug!(pool_name = %self.name, id = %waiter_id, "Freed slot granted to parked acquisition.");
      self.notifier.emit(&waiter_id, SchedulerEventKind::SlotGranted);
    }
  }

  /// Tears down a parked acquisition whose future was dropped.
  pub(crate) fn abandon_wait(&self, id: &str, ticket: u64, rx: &mut oneshot::Receiver<Grant<T>>) {
    let mut state = self.state.lock();
    // Grants are only sent under this lock, so after `close` the receiver
    // either holds the grant or the waiter is still queued.
    rx.close();
    match rx.try_recv() {
      Ok(Grant::Slot) => {
        let granted = state.abandon_creation();
        drop(state);
        trace!(pool_name = %self.name, %id, "Gave back creation slot granted to a dropped acquisition.");
        if let Some(waiter_id) = granted {
          self.notifier.emit(&waiter_id, SchedulerEventKind::SlotGranted);
        }
      }
      Ok(grant) => {
        let recirculation = state.give_back(id, grant);
        drop(state);
        trace!(pool_name = %self.name, %id, "Gave back grant of a dropped acquisition.");
        if let Some(recirculation) = recirculation {
          self.emit_recirculation(id, recirculation);
        }
      }
      Err(_) => {
        state.remove_waiter(ticket);
      }
    }
  }

  fn emit_recirculation(&self, released_by: &str, recirculation: Recirculation) {
    self.notifier.emit(released_by, SchedulerEventKind::Released);
    if let Recirculation::HandedOff { to } = recirculation {
      self.notifier.emit(&to, SchedulerEventKind::HandedOff);
    }
  }
}

/// A bounded pool of lazily created items leased to callers by id.
///
/// Items come from the `Generator` on demand, never more than the configured
/// capacity at once. Callers that find neither an idle item nor a free slot
/// are parked until a `release` hands them an item. Both idle items and parked
/// callers are served most-recent-first.
///
/// Cloning is cheap; all clones share one pool.
pub struct Scheduler<T, G> {
  core: Arc<Core<T>>,
  generator: Arc<G>,
}

impl<T, G> Clone for Scheduler<T, G> {
  fn clone(&self) -> Self {
    Self {
      core: self.core.clone(),
      generator: self.generator.clone(),
    }
  }
}

impl<T, G> fmt::Debug for Scheduler<T, G>
where
  T: Clone,
{
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Scheduler")
      .field("name", &self.core.name)
      .field("status", &self.core.state.lock().status())
      .field("notifier", &self.core.notifier)
      .finish_non_exhaustive()
  }
}

impl<T, G> Scheduler<T, G>
where
  T: Clone + Send + 'static,
  G: Generator<T>,
{
  pub fn new(generator: G, options: SchedulerOptions) -> Self {
    let name: Arc<str> = Arc::from(options.name.as_str());
    let capacity = options.capacity();
    let closed_token = CancellationToken::new();

    debug!(pool_name = %name, %capacity, "Creating scheduler.");

    Self {
      core: Arc::new(Core {
        name: name.clone(),
        state: Mutex::new(PoolState::new(capacity)),
        notifier: EventNotifier::new(name, closed_token.clone()),
        closed_token,
        runtime: options.runtime,
      }),
      generator: Arc::new(generator),
    }
  }

  pub fn name(&self) -> &str {
    &self.core.name
  }

  pub fn capacity(&self) -> Capacity {
    self.core.state.lock().status().capacity
  }

  /// Leases an item to `id`.
  ///
  /// Reuses the most recently released idle item if there is one, otherwise
  /// creates a new item when capacity allows, otherwise waits until a
  /// `release` hands one over. Waiting has no timeout; wrap the call (e.g. in
  /// `tokio::time::timeout`) for bounded waits. Dropping the returned future
  /// at any point leaks neither items nor capacity.
  ///
  /// Acquiring again under an id that already holds an item replaces that
  /// id's entry in the active set.
  ///
  /// # Errors
  /// Returns `SchedulerError::Generator` if item creation failed; the slot is
  /// freed for a retry.
  /// Returns `SchedulerError::Withdrawn` if the parked request was withdrawn.
  /// Returns `SchedulerError::Closed` if the scheduler is or became closed.
  pub async fn acquire(&self, id: &str) -> Result<T, SchedulerError<G::Error>> {
    let ticket = NEXT_WAITER_TICKET.fetch_add(1, AtomicOrdering::Relaxed);
    let admission = self.core.state.lock().admit(id, ticket);

    match admission {
      Admission::Reused(item) => {
        debug!(pool_name = %self.core.name, %id, "Leased idle item.");
        self.core.notifier.emit(id, SchedulerEventKind::Reused);
        Ok(item)
      }
      Admission::Create => {
        let permit = CreationPermit::reserved(self.core.clone());
        self.create(id, permit).await
      }
      Admission::Park(rx) => {
        debug!(pool_name = %self.core.name, %id, ticket, "No idle item or free slot. Parking acquisition.");
        self.core.notifier.emit(id, SchedulerEventKind::Parked);
        let guard = WaitGuard::new(self.core.clone(), id, ticket, rx);

        match guard.granted().await {
          Grant::Item(item) => {
            debug!(pool_name = %self.core.name, %id, ticket, "Parked acquisition served with a released item.");
            Ok(item)
          }
          Grant::Slot => {
            debug!(pool_name = %self.core.name, %id, ticket, "Parked acquisition granted a freed slot.");
            let permit = CreationPermit::reserved(self.core.clone());
            self.create(id, permit).await
          }
          Grant::Withdrawn => Err(SchedulerError::Withdrawn),
          Grant::Closed => Err(SchedulerError::Closed),
        }
      }
      Admission::Closed => {
        trace!(pool_name = %self.core.name, %id, "Acquire on closed scheduler.");
        Err(SchedulerError::Closed)
      }
    }
  }

  async fn create(&self, id: &str, permit: CreationPermit<T>) -> Result<T, SchedulerError<G::Error>> {
    let created = self
      .generator
      .generate()
      .instrument(debug_span!("generate_item", pool_name = %self.core.name, %id))
      .await;

    match created {
      Ok(item) => {
        permit.commit(id, item.clone());
        debug!(pool_name = %self.core.name, %id, "Created new item.");
        Ok(item)
      }
      Err(e) => {
        // Dropping the uncommitted permit frees the slot.
        drop(permit);
        warn!(pool_name = %self.core.name, %id, "Item generator failed: {}", e);
        self.core.notifier.emit(id, SchedulerEventKind::GenerationFailed);
        Err(SchedulerError::Generator(e))
      }
    }
  }

  /// Returns the item leased to `id` to the pool.
  ///
  /// `id` leaves the active set whether or not `item` is what it held. The
  /// item goes straight to the most recently parked caller if there is one,
  /// otherwise onto the ready pool.
  pub fn release(&self, id: &str, item: T) {
    let recirculation = self.core.state.lock().release(id, item);
    match &recirculation {
      Recirculation::Pooled => debug!(pool_name = %self.core.name, %id, "Item returned to ready pool."),
      Recirculation::HandedOff { to } => {
        debug!(pool_name = %self.core.name, %id, to = %to, "Released item handed to parked acquisition.")
      }
    }
    self.core.emit_recirculation(id, recirculation);
  }

  /// Discards the item leased to `id`, calling `canceller` with it once.
  ///
  /// While `canceller` runs, `id` is still active and the item still counts
  /// against capacity. Afterwards `id` leaves the active set and the slot
  /// goes to the most recently parked caller, who creates a fresh item, or
  /// stays free for a later `acquire`. The item is never reused.
  /// Returns `false` without calling `canceller` if `id` holds nothing.
  pub fn cancel(&self, id: &str, canceller: impl FnOnce(T)) -> bool {
    let item = self.core.state.lock().cancel(id);
    let Some(item) = item else {
      trace!(pool_name = %self.core.name, %id, "Cancel for inactive id ignored.");
      return false;
    };

    debug!(pool_name = %self.core.name, %id, "Cancelling leased item.");
    let retirement = Retirement::new(self.core.clone(), id);
    canceller(item);
    self.core.notifier.emit(id, SchedulerEventKind::Cancelled);
    drop(retirement);
    true
  }

  pub fn is_active(&self, id: &str) -> bool {
    self.core.state.lock().is_active(id)
  }

  /// Dequeues every parked acquisition made under `id`; each fails with
  /// `SchedulerError::Withdrawn`. Returns how many were withdrawn.
  pub fn withdraw(&self, id: &str) -> usize {
    let withdrawn = self.core.state.lock().withdraw(id);
    if withdrawn > 0 {
      debug!(pool_name = %self.core.name, %id, withdrawn, "Withdrew parked acquisitions.");
      for _ in 0..withdrawn {
        self.core.notifier.emit(id, SchedulerEventKind::Withdrawn);
      }
    } else {
      trace!(pool_name = %self.core.name, %id, "Withdraw found no parked acquisitions.");
    }
    withdrawn
  }

  /// Stops leasing. New and parked acquisitions fail with
  /// `SchedulerError::Closed`; items already leased stay with their holders
  /// and may still be released or cancelled.
  pub fn close(&self) {
    let refused = {
      let mut state = self.core.state.lock();
      if state.is_closed() {
        trace!(pool_name = %self.core.name, "Close called on already closed scheduler.");
        return;
      }
      let refused = state.close();
      // Under the lock, so `is_closed` never lags behind a refused acquire.
      self.core.closed_token.cancel();
      refused
    };
    info!(pool_name = %self.core.name, refused, "Scheduler closed.");
  }

  pub fn is_closed(&self) -> bool {
    self.core.closed_token.is_cancelled()
  }

  /// Resolves once `close` has been called.
  pub async fn closed(&self) {
    self.core.closed_token.cancelled().await;
  }

  /// Removes every idle item and tears each down with `canceller`.
  /// Returns how many items were torn down.
  pub fn drain_ready(&self, mut canceller: impl FnMut(T)) -> usize {
    let drained = self.core.state.lock().drain_ready();
    let count = drained.len();
    for item in drained {
      canceller(item);
    }
    if count > 0 {
      info!(pool_name = %self.core.name, count, "Drained idle items.");
    } else {
      trace!(pool_name = %self.core.name, "Drain found no idle items.");
    }
    count
  }

  /// Registers a handler for lifecycle events.
  ///
  /// Handlers run on a background task spawned on the runtime given in
  /// `SchedulerOptions::runtime`, or the current runtime.
  ///
  /// # Errors
  /// Returns `SchedulerError::NoRuntime` if neither runtime is available.
  pub fn on_event(
    &self,
    handler: impl Fn(SchedulerEvent) + Send + Sync + 'static,
  ) -> Result<(), SchedulerError<G::Error>> {
    let runtime = match &self.core.runtime {
      Some(runtime) => runtime.clone(),
      None => match TokioHandle::try_current() {
        Ok(runtime) => runtime,
        Err(_) => {
          warn!(pool_name = %self.core.name, "Cannot register event handler outside a Tokio runtime.");
          return Err(SchedulerError::NoRuntime);
        }
      },
    };
    self.core.notifier.add_handler(&runtime, handler);
    Ok(())
  }

  pub fn status(&self) -> SchedulerStatus {
    self.core.state.lock().status()
  }

  pub fn ready_count(&self) -> usize {
    self.status().ready
  }

  pub fn active_count(&self) -> usize {
    self.status().active
  }

  /// Number of slots reserved for generator calls still running.
  pub fn creating_count(&self) -> usize {
    self.status().creating
  }

  /// Number of parked acquisitions.
  pub fn waiting_count(&self) -> usize {
    self.status().waiting
  }
}
