//! Per-label test rollups: cache flags and execution strategy.
//!
//! The reducers are pure folds over the ordered attempt records. The summarizer
//! applies `fold` once per incoming attempt; `over` replays a whole sequence and
//! must land on the same state.

use crate::types::{TestResult, TestStatus, TestsCollection};

/// Strategy before any attempt with a status has been seen.
pub const STRATEGY_INITIALIZED: &str = "INITIALIZED";
/// Strategy once two attempts disagree.
pub const STRATEGY_INDETERMINATE: &str = "indeterminate";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rollup {
  pub cached_locally: bool,
  pub cached_remotely: bool,
  pub strategy: String,
}

impl Default for Rollup {
  fn default() -> Self {
    Self {
      cached_locally: true,
      cached_remotely: true,
      strategy: STRATEGY_INITIALIZED.to_string(),
    }
  }
}

impl Rollup {
  pub fn of(collection: &TestsCollection) -> Self {
    Self {
      cached_locally: collection.cached_locally,
      cached_remotely: collection.cached_remotely,
      strategy: collection.strategy.clone(),
    }
  }

  /// Fold one attempt. Attempts without a status do not participate.
  pub fn fold(self, result: &TestResult) -> Self {
    if result.status == TestStatus::NoStatus {
      return self;
    }
    Self {
      cached_locally: self.cached_locally && result.cached_locally,
      cached_remotely: self.cached_remotely && result.execution_info.cached_remotely,
      strategy: fold_strategy(&self.strategy, &result.execution_info.strategy),
    }
  }

  pub fn over<'a>(results: impl IntoIterator<Item = &'a TestResult>) -> Self {
    results.into_iter().fold(Self::default(), Self::fold)
  }

  pub fn apply_to(self, collection: &mut TestsCollection) {
    collection.cached_locally = self.cached_locally;
    collection.cached_remotely = self.cached_remotely;
    collection.strategy = self.strategy;
  }
}

/// The first strategy seen sticks until another one disagrees; after that the
/// rollup stays indeterminate.
pub fn fold_strategy(current: &str, next: &str) -> String {
  if current == STRATEGY_INITIALIZED {
    next.to_string()
  } else if current != next {
    STRATEGY_INDETERMINATE.to_string()
  } else {
    current.to_string()
  }
}
