//! The pool's state block and its transitions.
//!
//! Every method here runs inside one critical section of the scheduler's
//! mutex and never awaits, so each transition is atomic with respect to all
//! other acquisitions, releases and cancellations.

use crate::options::Capacity;
use crate::waiter::{Grant, Waiter};

use std::collections::HashMap;

use tokio::sync::oneshot;

/// Snapshot of a scheduler's bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerStatus {
  pub capacity: Capacity,
  /// Idle items available for immediate reuse.
  pub ready: usize,
  /// Items currently leased to a caller id.
  pub active: usize,
  /// Cancelled items whose canceller is still running; each keeps its slot.
  pub retiring: usize,
  /// Slots reserved for generator calls still in flight.
  pub creating: usize,
  /// Acquisitions parked until an item or slot frees up.
  pub waiting: usize,
  pub closed: bool,
}

/// Outcome of the admission step of an acquisition.
pub(crate) enum Admission<T> {
  /// An idle item was leased without suspending.
  Reused(T),
  /// A slot was reserved; the caller must run the generator.
  Create,
  /// No item and no free slot; the caller waits on the receiver.
  Park(oneshot::Receiver<Grant<T>>),
  Closed,
}

/// Where a returned item went.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Recirculation {
  Pooled,
  HandedOff { to: String },
}

pub(crate) struct PoolState<T> {
  capacity: Capacity,
  ready: Vec<T>,
  active: HashMap<String, T>,
  retiring: Vec<String>,
  waiters: Vec<Waiter<T>>,
  creating: usize,
  closed: bool,
}

impl<T: Clone> PoolState<T> {
  pub(crate) fn new(capacity: Capacity) -> Self {
    Self {
      capacity,
      ready: Vec::new(),
      active: HashMap::new(),
      retiring: Vec::new(),
      waiters: Vec::new(),
      creating: 0,
      closed: false,
    }
  }

  fn total(&self) -> usize {
    self.ready.len() + self.active.len() + self.retiring.len() + self.creating
  }

  pub(crate) fn admit(&mut self, id: &str, ticket: u64) -> Admission<T> {
    if self.closed {
      return Admission::Closed;
    }

    if let Some(item) = self.ready.pop() {
      // A second lease under the same id replaces the first one's entry.
      self.active.insert(id.to_string(), item.clone());
      return Admission::Reused(item);
    }

    if self.capacity.admits(self.total()) {
      self.creating += 1;
      return Admission::Create;
    }

    let (waiter, rx) = Waiter::new(id, ticket);
    self.waiters.push(waiter);
    Admission::Park(rx)
  }

  pub(crate) fn commit_creation(&mut self, id: &str, item: T) {
    self.creating = self.creating.saturating_sub(1);
    self.active.insert(id.to_string(), item);
  }

  /// Returns a reserved slot. Hands it on to the latest parked caller, if any.
  pub(crate) fn abandon_creation(&mut self) -> Option<String> {
    self.creating = self.creating.saturating_sub(1);
    self.grant_free_slot()
  }

  pub(crate) fn release(&mut self, id: &str, item: T) -> Recirculation {
    self.active.remove(id);
    self.recirculate(item)
  }

  /// Moves the item leased to `id` into retirement. The id stays active and
  /// the slot stays taken until `finish_cancel`.
  pub(crate) fn cancel(&mut self, id: &str) -> Option<T> {
    let item = self.active.remove(id)?;
    self.retiring.push(id.to_string());
    Some(item)
  }

  /// Ends one retirement of `id` and hands the freed slot to the latest parked caller, if any.
  pub(crate) fn finish_cancel(&mut self, id: &str) -> Option<String> {
    let position = self.retiring.iter().rposition(|retiring| retiring == id)?;
    self.retiring.swap_remove(position);
    self.grant_free_slot()
  }

  /// Hands `item` to the most recently parked caller, or pools it.
  fn recirculate(&mut self, item: T) -> Recirculation {
    while let Some(waiter) = self.waiters.pop() {
      let id = waiter.id.clone();
      let previous = self.active.insert(id.clone(), item.clone());
      match waiter.grant(Grant::Item(item.clone())) {
        Ok(()) => return Recirculation::HandedOff { to: id },
        Err(_) => match previous {
          Some(previous) => {
            self.active.insert(id, previous);
          }
          None => {
            self.active.remove(&id);
          }
        },
      }
    }
    self.ready.push(item);
    Recirculation::Pooled
  }

  fn grant_free_slot(&mut self) -> Option<String> {
    while self.capacity.admits(self.total()) {
      let waiter = self.waiters.pop()?;
      let id = waiter.id.clone();
      self.creating += 1;
      if waiter.grant(Grant::Slot).is_ok() {
        return Some(id);
      }
      self.creating -= 1;
    }
    None
  }

  /// Takes back whatever a dropped waiter was granted but never consumed.
  pub(crate) fn give_back(&mut self, id: &str, grant: Grant<T>) -> Option<Recirculation> {
    match grant {
      Grant::Item(item) => Some(self.release(id, item)),
      Grant::Slot => {
        self.abandon_creation();
        None
      }
      Grant::Withdrawn | Grant::Closed => None,
    }
  }

  pub(crate) fn remove_waiter(&mut self, ticket: u64) -> bool {
    let before = self.waiters.len();
    self.waiters.retain(|w| w.ticket != ticket);
    self.waiters.len() != before
  }

  /// Dequeues every parked request made under `id`.
  pub(crate) fn withdraw(&mut self, id: &str) -> usize {
    let (withdrawn, kept): (Vec<_>, Vec<_>) = self.waiters.drain(..).partition(|w| w.id == id);
    self.waiters = kept;
    let count = withdrawn.len();
    for waiter in withdrawn {
      let _ = waiter.grant(Grant::Withdrawn);
    }
    count
  }

  /// Stops admission and refuses every parked request. Returns how many were refused.
  pub(crate) fn close(&mut self) -> usize {
    self.closed = true;
    let refused = self.waiters.len();
    for waiter in self.waiters.drain(..) {
      let _ = waiter.grant(Grant::Closed);
    }
    refused
  }

  pub(crate) fn drain_ready(&mut self) -> Vec<T> {
    std::mem::take(&mut self.ready)
  }

  pub(crate) fn is_active(&self, id: &str) -> bool {
    self.active.contains_key(id) || self.retiring.iter().any(|retiring| retiring == id)
  }

  pub(crate) fn is_closed(&self) -> bool {
    self.closed
  }

  pub(crate) fn status(&self) -> SchedulerStatus {
    SchedulerStatus {
      capacity: self.capacity,
      ready: self.ready.len(),
      active: self.active.len(),
      retiring: self.retiring.len(),
      creating: self.creating,
      waiting: self.waiters.len(),
      closed: self.closed,
    }
  }
}
