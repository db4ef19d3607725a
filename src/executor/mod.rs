//! Executor: orchestration of virtual users over time.
//!
//! The `Executor` trait is the runtime that executes a `Scenario`. Different
//! executors provide different execution strategies.
//!
//! stampede ships [`RampingVusExecutor`], which tracks a concurrency target
//! described by a list of [`Stage`]s: a scheduler loop compares the number of
//! live virtual users with the interpolated target on every tick and spawns
//! or retires workers to follow it.
pub mod ramping;
pub mod stage;

pub use ramping::{RampingVusExecutor, RunState};
pub use stage::{Stage, target_at, total_duration, vus_at};

use crate::{aggregate::Aggregate, scenario::Scenario};
use std::future::Future;

/// The runtime hook that executes a `Scenario`.
///
/// This trait is generic over the aggregate, action, and future types to remain
/// flexible and composable.
pub trait Executor<A, F, Fut>
where
    Self: Send + Sync + Sized,
    A: Aggregate,
    F: Fn() -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = A::Metric> + Send + 'static,
{
    type Error;
    /// Execute the scenario and return the final, merged aggregate.
    fn exec(
        &self,
        scenario: &Scenario<A, F, Fut>,
    ) -> impl Future<Output = Result<A, Self::Error>> + Send;
}
