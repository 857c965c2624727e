use std::fmt;
use std::future::Future;

use futures::future::BoxFuture;

/// A boxed creation future, for generators that cannot name their future type.
pub type ItemFuture<T, E> = BoxFuture<'static, Result<T, E>>;

/// Asynchronous factory producing one new pool item per call.
///
/// Implemented for every `Fn() -> Fut` where `Fut` resolves to `Result<T, E>`,
/// so plain closures can be handed to `Scheduler::new`.
pub trait Generator<T>: Send + Sync {
  type Error: fmt::Debug + fmt::Display + Send + 'static;
  type Future: Future<Output = Result<T, Self::Error>> + Send;

  fn generate(&self) -> Self::Future;
}

impl<T, E, F, Fut> Generator<T> for F
where
  F: Fn() -> Fut + Send + Sync,
  Fut: Future<Output = Result<T, E>> + Send,
  E: fmt::Debug + fmt::Display + Send + 'static,
{
  type Error = E;
  type Future = Fut;

  fn generate(&self) -> Self::Future {
    (self)()
  }
}
