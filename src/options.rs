use std::fmt;

use tokio::runtime::Handle as TokioHandle;

/// Ceiling on the number of items that may exist at once
/// (idle + leased + being created).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capacity {
  Unbounded,
  Limited(usize),
}

impl Capacity {
  /// Interprets a signed `max_items`: any negative value means unbounded.
  pub fn from_max_items(max_items: i64) -> Self {
    if max_items < 0 {
      Capacity::Unbounded
    } else {
      Capacity::Limited(usize::try_from(max_items).unwrap_or(usize::MAX))
    }
  }

  /// Whether one more item may be created when `total` items already exist.
  pub fn admits(&self, total: usize) -> bool {
    match self {
      Capacity::Unbounded => true,
      Capacity::Limited(max) => *max > total,
    }
  }
}

impl From<i64> for Capacity {
  fn from(max_items: i64) -> Self {
    Capacity::from_max_items(max_items)
  }
}

impl fmt::Display for Capacity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Capacity::Unbounded => f.write_str("unbounded"),
      Capacity::Limited(max) => write!(f, "{}", max),
    }
  }
}

/// Construction options for a `Scheduler`.
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
  /// Maximum number of items; negative means unbounded.
  pub max_items: i64,
  /// Name used in log lines and lifecycle events.
  pub name: String,
  /// Runtime the event notification worker is spawned on. Falls back to the
  /// runtime current when the first handler is registered.
  pub runtime: Option<TokioHandle>,
}

impl SchedulerOptions {
  pub fn new(max_items: i64) -> Self {
    Self {
      max_items,
      ..Self::default()
    }
  }

  pub fn unbounded() -> Self {
    Self::new(-1)
  }

  pub fn with_name(mut self, name: impl Into<String>) -> Self {
    self.name = name.into();
    self
  }

  pub fn with_runtime(mut self, runtime: TokioHandle) -> Self {
    self.runtime = Some(runtime);
    self
  }

  pub fn capacity(&self) -> Capacity {
    Capacity::from_max_items(self.max_items)
  }
}

impl Default for SchedulerOptions {
  fn default() -> Self {
    Self {
      max_items: -1,
      name: "scheduler".to_string(),
      runtime: None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn negative_max_items_is_unbounded() {
    assert_eq!(Capacity::from(-1), Capacity::Unbounded);
    assert_eq!(Capacity::from(-42), Capacity::Unbounded);
    assert!(Capacity::Unbounded.admits(usize::MAX - 1));
  }

  #[test]
  fn limited_capacity_admits_below_ceiling_only() {
    let capacity = Capacity::from(2);
    assert_eq!(capacity, Capacity::Limited(2));
    assert!(capacity.admits(0));
    assert!(capacity.admits(1));
    assert!(!capacity.admits(2));
    assert!(!Capacity::from(0).admits(0));
  }

  #[test]
  fn options_builder() {
    let options = SchedulerOptions::new(3).with_name("workers");
    assert_eq!(options.capacity(), Capacity::Limited(3));
    assert_eq!(options.name, "workers");
    assert!(options.runtime.is_none());
    assert_eq!(SchedulerOptions::unbounded().capacity(), Capacity::Unbounded);
    assert_eq!(SchedulerOptions::default().name, "scheduler");
  }
}
