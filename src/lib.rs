//! A Tokio-based bounded pool of lazily created items (workers, processes,
//! connections) leased to callers by id, with waiter hand-off, cancellation
//! and lifecycle notifications.

mod error;
mod generator;
mod notifier;
mod options;
mod scheduler;
mod state;
mod waiter;

pub use error::SchedulerError;
pub use generator::{Generator, ItemFuture};
pub use notifier::{SchedulerEvent, SchedulerEventKind};
pub use options::{Capacity, SchedulerOptions};
pub use scheduler::Scheduler;
pub use state::SchedulerStatus;
