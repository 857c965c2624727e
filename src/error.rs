use thiserror::Error;

/// Errors that can occur while acquiring an item from a `Scheduler`.
///
/// `E` is the error type of the scheduler's `Generator`.
#[derive(Error, Debug, PartialEq)]
pub enum SchedulerError<E> {
  #[error("Item generator failed: {0}")]
  Generator(E),

  #[error("Pending acquisition was withdrawn before an item became available")]
  Withdrawn,

  #[error("Scheduler is closed, cannot lease items")]
  Closed,

  #[error("No Tokio runtime available to run the event notification worker")]
  NoRuntime,
}

impl<E> SchedulerError<E> {
  /// Returns the generator error, if this is a `Generator` failure.
  pub fn into_generator_error(self) -> Option<E> {
    match self {
      SchedulerError::Generator(e) => Some(e),
      _ => None,
    }
  }
}
