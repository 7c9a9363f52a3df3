use crate::error::MutationError;
use crate::fetcher::MutationFn;
use crate::invalidation;
use crate::key::QueryKey;
use crate::metrics::Metrics;
use crate::shared::ClientShared;

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

/// Lifecycle state of a mutation, reflecting its most recent run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationState {
  Idle,
  Pending,
  Success,
  Error,
}

type StartHook<I> = Box<dyn Fn(&I) + Send + Sync>;
type SuccessHook<I, R> = Box<dyn Fn(&I, &R) + Send + Sync>;
type ErrorHook<I> = Box<dyn Fn(&I, &MutationError) + Send + Sync>;
type SettledHook<I, R> = Box<dyn Fn(&I, Option<&R>, Option<&MutationError>) + Send + Sync>;
type TargetsFn<I, R> = Box<dyn Fn(&I, &R) -> Vec<QueryKey> + Send + Sync>;

/// A builder for [`Mutation`]. Every hook is optional.
pub struct MutationBuilder<I, R> {
  shared: Arc<ClientShared>,
  mutate: Arc<dyn MutationFn<I, R>>,
  on_start: Option<StartHook<I>>,
  on_success: Option<SuccessHook<I, R>>,
  on_error: Option<ErrorHook<I>>,
  on_settled: Option<SettledHook<I, R>>,
  invalidates: Option<TargetsFn<I, R>>,
  evicts: Option<TargetsFn<I, R>>,
}

impl<I, R> fmt::Debug for MutationBuilder<I, R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MutationBuilder")
      .field("has_on_start", &self.on_start.is_some())
      .field("has_on_success", &self.on_success.is_some())
      .field("has_on_error", &self.on_error.is_some())
      .field("has_on_settled", &self.on_settled.is_some())
      .field("has_invalidates", &self.invalidates.is_some())
      .field("has_evicts", &self.evicts.is_some())
      .finish_non_exhaustive()
  }
}

impl<I, R> MutationBuilder<I, R>
where
  I: Clone + Send + Sync + 'static,
  R: Send + Sync + 'static,
{
  pub(crate) fn new(shared: Arc<ClientShared>, mutate: Arc<dyn MutationFn<I, R>>) -> Self {
    Self {
      shared,
      mutate,
      on_start: None,
      on_success: None,
      on_error: None,
      on_settled: None,
      invalidates: None,
      evicts: None,
    }
  }

  /// Runs before the write is issued.
  pub fn on_start(mut self, hook: impl Fn(&I) + Send + Sync + 'static) -> Self {
    self.on_start = Some(Box::new(hook));
    self
  }

  pub fn on_success(mut self, hook: impl Fn(&I, &R) + Send + Sync + 'static) -> Self {
    self.on_success = Some(Box::new(hook));
    self
  }

  pub fn on_error(mut self, hook: impl Fn(&I, &MutationError) + Send + Sync + 'static) -> Self {
    self.on_error = Some(Box::new(hook));
    self
  }

  /// Runs exactly once per run, after `on_success` or `on_error`.
  pub fn on_settled(
    mut self,
    hook: impl Fn(&I, Option<&R>, Option<&MutationError>) + Send + Sync + 'static,
  ) -> Self {
    self.on_settled = Some(Box::new(hook));
    self
  }

  /// Keys (or prefixes) to invalidate after a successful write.
  pub fn invalidates(
    mut self,
    targets: impl Fn(&I, &R) -> Vec<QueryKey> + Send + Sync + 'static,
  ) -> Self {
    self.invalidates = Some(Box::new(targets));
    self
  }

  /// Keys (or prefixes) whose unobserved entries are removed after a
  /// successful write, e.g. the detail entry of a deleted item. Observed
  /// entries are invalidated instead.
  pub fn evicts(
    mut self,
    targets: impl Fn(&I, &R) -> Vec<QueryKey> + Send + Sync + 'static,
  ) -> Self {
    self.evicts = Some(Box::new(targets));
    self
  }

  pub fn build(self) -> Mutation<I, R> {
    Mutation {
      shared: self.shared,
      mutate: self.mutate,
      on_start: self.on_start,
      on_success: self.on_success,
      on_error: self.on_error,
      on_settled: self.on_settled,
      invalidates: self.invalidates,
      evicts: self.evicts,
      state: Mutex::new(MutationState::Idle),
    }
  }
}

/// A reusable write operation with a fixed lifecycle:
/// `on_start`, the write, then `on_success` or `on_error`, then `on_settled`.
///
/// Invalidation and eviction targets are applied only after a successful write.
pub struct Mutation<I, R> {
  shared: Arc<ClientShared>,
  mutate: Arc<dyn MutationFn<I, R>>,
  on_start: Option<StartHook<I>>,
  on_success: Option<SuccessHook<I, R>>,
  on_error: Option<ErrorHook<I>>,
  on_settled: Option<SettledHook<I, R>>,
  invalidates: Option<TargetsFn<I, R>>,
  evicts: Option<TargetsFn<I, R>>,
  state: Mutex<MutationState>,
}

impl<I, R> fmt::Debug for Mutation<I, R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Mutation")
      .field("state", &*self.state.lock())
      .finish_non_exhaustive()
  }
}

impl<I, R> Mutation<I, R>
where
  I: Clone + Send + Sync + 'static,
  R: Send + Sync + 'static,
{
  /// State of the most recent run.
  pub fn state(&self) -> MutationState {
    *self.state.lock()
  }

  /// Executes the write for `input` through the full lifecycle.
  ///
  /// The error of a failed write is returned here, never swallowed. If the
  /// returned future is dropped before the write finishes, the run settles as
  /// failed with [`MutationError::Cancelled`].
  pub async fn run(&self, input: I) -> Result<R, MutationError> {
    let id = self.shared.next_id();
    *self.state.lock() = MutationState::Pending;
    debug!(mutation_id = id, "mutation started");

    if let Some(hook) = &self.on_start {
      hook(&input);
    }

    let mut cancelled = SettleOnDrop {
      mutation: self,
      input: &input,
      id,
      armed: true,
    };
    let outcome = self.execute(input.clone()).await;
    cancelled.armed = false;

    match &outcome {
      Ok(result) => {
        *self.state.lock() = MutationState::Success;
        Metrics::incr(&self.shared.metrics.mutations_succeeded);
        if let Some(hook) = &self.on_success {
          hook(&input, result);
        }
        self.apply_targets(id, &input, result);
        if let Some(hook) = &self.on_settled {
          hook(&input, Some(result), None);
        }
      }
      Err(err) => self.fail(id, &input, err),
    }

    debug!(mutation_id = id, success = outcome.is_ok(), "mutation settled");
    outcome
  }

  fn fail(&self, id: u64, input: &I, err: &MutationError) {
    *self.state.lock() = MutationState::Error;
    Metrics::incr(&self.shared.metrics.mutations_failed);
    warn!(mutation_id = id, error = %err, "mutation failed");
    if let Some(hook) = &self.on_error {
      hook(input, err);
    }
    if let Some(hook) = &self.on_settled {
      hook(input, None, Some(err));
    }
  }

  async fn execute(&self, input: I) -> Result<R, MutationError> {
    if self.shared.is_closed() {
      return Err(MutationError::Shutdown);
    }
    let write = self.mutate.mutate(input);
    match self.shared.config.fetch_timeout {
      Some(limit) => tokio::time::timeout(limit, write)
        .await
        .unwrap_or(Err(MutationError::Timeout(limit))),
      None => write.await,
    }
  }

  fn apply_targets(&self, id: u64, input: &I, result: &R) {
    if let Some(targets) = &self.invalidates {
      let keys = targets(input, result);
      let matched = invalidation::invalidate(&self.shared, &keys);
      debug!(mutation_id = id, targets = ?keys, matched, "mutation invalidated queries");
    }
    if let Some(targets) = &self.evicts {
      let keys = targets(input, result);
      let removed = invalidation::remove(&self.shared, &keys);
      debug!(mutation_id = id, targets = ?keys, removed, "mutation evicted queries");
    }
  }
}

/// Settles a run whose future was dropped while the write was in flight.
struct SettleOnDrop<'a, I, R>
where
  I: Clone + Send + Sync + 'static,
  R: Send + Sync + 'static,
{
  mutation: &'a Mutation<I, R>,
  input: &'a I,
  id: u64,
  armed: bool,
}

impl<I, R> Drop for SettleOnDrop<'_, I, R>
where
  I: Clone + Send + Sync + 'static,
  R: Send + Sync + 'static,
{
  fn drop(&mut self) {
    if self.armed {
      self.mutation.fail(self.id, self.input, &MutationError::Cancelled);
    }
  }
}
