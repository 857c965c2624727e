use crate::scheduler::Core;

use std::fmt;
use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::{debug, trace};

/// What a parked acquisition is resumed with.
#[derive(Debug)]
pub(crate) enum Grant<T> {
  /// A released item, already recorded under the waiter's id.
  Item(T),
  /// A reserved creation slot; the waiter runs the generator itself.
  Slot,
  /// The request was dequeued through `Scheduler::withdraw`.
  Withdrawn,
  /// The scheduler was closed while the request was parked.
  Closed,
}

/// A parked acquisition request sitting in the waiter queue.
pub(crate) struct Waiter<T> {
  pub(crate) id: String,
  pub(crate) ticket: u64,
  tx: oneshot::Sender<Grant<T>>,
}

impl<T> fmt::Debug for Waiter<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Waiter")
      .field("id", &self.id)
      .field("ticket", &self.ticket)
      .field("abandoned", &self.tx.is_closed())
      .finish()
  }
}

impl<T> Waiter<T> {
  pub(crate) fn new(id: &str, ticket: u64) -> (Self, oneshot::Receiver<Grant<T>>) {
    let (tx, rx) = oneshot::channel();
    (
      Self {
        id: id.to_string(),
        ticket,
        tx,
      },
      rx,
    )
  }

  /// Resumes the parked acquisition. Fails if its receiver is gone.
  pub(crate) fn grant(self, grant: Grant<T>) -> Result<(), Grant<T>> {
    self.tx.send(grant)
  }
}

/// A capacity slot reserved for one generator call.
///
/// Dropping the permit without `commit` returns the slot to the pool, which
/// covers both generator failure and the acquiring future being dropped
/// mid-creation.
pub(crate) struct CreationPermit<T: Clone + Send + 'static> {
  core: Arc<Core<T>>,
  committed: bool,
}

impl<T: Clone + Send + 'static> CreationPermit<T> {
  /// Adopts a slot already counted as in-creation by the pool state.
  pub(crate) fn reserved(core: Arc<Core<T>>) -> Self {
    Self { core, committed: false }
  }

  /// Turns the reservation into an active lease for `id`.
  pub(crate) fn commit(mut self, id: &str, item: T) {
    self.committed = true;
    self.core.commit_creation(id, item);
  }
}

impl<T: Clone + Send + 'static> Drop for CreationPermit<T> {
  fn drop(&mut self) {
    if !self.committed {
      trace!(pool_name = %self.core.name, "Creation permit dropped without commit. Returning slot.");
      self.core.abandon_creation();
    }
  }
}

/// A cancelled item whose canceller is running.
///
/// The id stays active and the slot stays taken until the guard drops, even
/// if the canceller panics.
pub(crate) struct Retirement<T: Clone + Send + 'static> {
  core: Arc<Core<T>>,
  id: String,
}

impl<T: Clone + Send + 'static> Retirement<T> {
  pub(crate) fn new(core: Arc<Core<T>>, id: &str) -> Self {
    Self { core, id: id.to_string() }
  }
}

impl<T: Clone + Send + 'static> Drop for Retirement<T> {
  fn drop(&mut self) {
    self.core.finish_cancel(&self.id);
  }
}

/// The receiving side of a parked acquisition.
///
/// If the acquiring future is dropped before being resumed, the waiter entry
/// is removed from the queue. A grant that raced with the drop is given back
/// to the pool so no item or slot leaks.
pub(crate) struct WaitGuard<T: Clone + Send + 'static> {
  core: Arc<Core<T>>,
  id: String,
  ticket: u64,
  rx: oneshot::Receiver<Grant<T>>,
  settled: bool,
}

impl<T: Clone + Send + 'static> WaitGuard<T> {
  pub(crate) fn new(core: Arc<Core<T>>, id: &str, ticket: u64, rx: oneshot::Receiver<Grant<T>>) -> Self {
    Self {
      core,
      id: id.to_string(),
      ticket,
      rx,
      settled: false,
    }
  }

  /// Waits until a `release`, `cancel`, `withdraw` or `close` resumes this request.
  pub(crate) async fn granted(mut self) -> Grant<T> {
    // The sender lives in the pool state, which this guard keeps alive, so a
    // receive error only happens if the waiter was discarded without a grant.
    let grant = (&mut self.rx).await.unwrap_or(Grant::Closed);
    self.settled = true;
    grant
  }
}

impl<T: Clone + Send + 'static> Drop for WaitGuard<T> {
  fn drop(&mut self) {
    if self.settled {
      return;
    }
    debug!(pool_name = %self.core.name, id = %self.id, ticket = self.ticket, "Parked acquisition dropped before being served.");
    self.core.abandon_wait(&self.id, self.ticket, &mut self.rx);
  }
}
