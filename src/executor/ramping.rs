//! The `RampingVusExecutor` and its components, providing a closed-model,
//! stage-based execution where concurrency (not request rate) is ramped.
//!
//! # High-level flow
//! 1. A shared [`RunContext`] is created holding the run-state channel and
//!    the live virtual-user counter.
//! 2. The scheduler loop ticks every `tick`. On each tick it computes the
//!    interpolated target (see [`super::stage`]) and:
//!    - retires the most recently spawned ones while more are active.
//!      A retired virtual user finishes its current iteration and exits,
//!    - reactivates retired users still finishing an iteration, then spawns
//!      new ones while fewer than the target are live.
//! 3. Each virtual user repeatedly calls the scenario `action`, consuming
//!    every returned `Metric` into its own `Aggregate`, optionally pausing
//!    between iterations.
//! 4. Once the last stage ends the run state moves to `Stopping`: workers
//!    exit after their current iteration. Workers still busy after
//!    `graceful_stop` are interrupted (`Aborted`) and their in-flight iteration
//!    is dropped. Every worker aggregate is then merged into the result.
//!
//! # Tuning knobs
//! - `tick`: scheduler granularity. Smaller ticks follow the ramp more closely
//!   at the cost of more wakeups.
//! - `graceful_stop`: how long in-flight iterations may run after the last stage.
//! - `pause`: optional sleep between two iterations of one virtual user.
use tokio::sync::Notify;
use tokio::sync::watch::{Receiver, Sender, channel};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use typed_builder::TypedBuilder;

use super::{
    Executor,
    stage::{Stage, stage_index_at, total_duration, vus_at},
};
use crate::{aggregate::Aggregate, error::Error, scenario::Scenario};
use internals::*;

use futures::future::join_all;
use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU8, AtomicU64, Ordering},
    },
    time::Duration,
};

/// Scheduler ticks shorter than this are rounded up to it.
pub const MIN_TICK: Duration = Duration::from_millis(1);

/// Lifecycle of a run, broadcast to every virtual user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Stages are still being executed.
    Running,
    /// Finish the current iteration, then exit.
    Stopping,
    /// Drop the in-flight iteration and exit now.
    Aborted,
}

/// Executor that ramps the number of concurrently looping virtual users
/// through a list of [`Stage`]s.
///
/// ```rust,no_run
/// use std::time::Duration;
/// use stampede::{
///     Executor, Scenario,
///     aggregate::SampleAggregate,
///     executor::{RampingVusExecutor, Stage},
///     metric::{Iteration, MetricSample},
/// };
///
/// # async fn run() -> Result<(), stampede::Error> {
/// let results: SampleAggregate = RampingVusExecutor::builder()
///     .stages(vec![
///         Stage::new(Duration::from_secs(10), 20),
///         Stage::new(Duration::from_secs(10), 0),
///     ])
///     .build()
///     .exec(
///         &Scenario::<SampleAggregate, _, _>::builder()
///             .name("noop")
///             .action(|| async {
///                 let mut it = Iteration::new();
///                 it.push(MetricSample::counter("noops", 1.0));
///                 it
///             })
///             .build(),
///     )
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, TypedBuilder)]
pub struct RampingVusExecutor {
    /// The sequence of ramp stages to execute.
    pub stages: Vec<Stage>,
    /// How often the scheduler re-evaluates the target, at least [`MIN_TICK`].
    #[builder(default = Duration::from_millis(100))]
    pub tick: Duration,
    /// Upper bound on waiting for in-flight iterations once the stages end.
    #[builder(default = Duration::from_secs(30))]
    pub graceful_stop: Duration,
    /// Sleep between two iterations of the same virtual user.
    #[builder(default, setter(strip_option))]
    pub pause: Option<Duration>,
}

impl<A, F, Fut> Executor<A, F, Fut> for RampingVusExecutor
where
    Self: Send + Sync + Sized,
    A: Aggregate + 'static,
    F: Fn() -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = A::Metric> + Send + 'static,
{
    type Error = Error;

    async fn exec(&self, scenario: &Scenario<A, F, Fut>) -> Result<A, Self::Error> {
        let (ctx, state_tx) = RunContext::new();

        if self.stages.iter().all(|s| s.target == 0) {
            tracing::info!("No stage targets any virtual users, nothing to run");
            return Ok(A::new());
        }

        tracing::info!("Running scenario: {}!", scenario.name);
        let mut pool = VuPool::new(ctx.clone(), scenario.action.clone(), self.pause);
        let total = total_duration(&self.stages);
        let stage_count = self.stages.len();
        let mut current_stage = None;

        let mut ticker = tokio::time::interval(self.tick.max(MIN_TICK));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let elapsed = ctx.elapsed();

            let stage = stage_index_at(&self.stages, elapsed);
            if stage != current_stage {
                if let Some(i) = current_stage {
                    tracing::info!("Finishing stage: {}/{stage_count}", i + 1);
                }
                if let Some(i) = stage {
                    tracing::info!("Starting stage: {}/{stage_count}", i + 1);
                }
                current_stage = stage;
            }

            pool.scale_to(vus_at(&self.stages, elapsed));
            if elapsed >= total {
                break;
            }
        }

        tracing::info!("All stages finished, stopping {} virtual users...", ctx.live_vus());
        state_tx.send(RunState::Stopping)?;

        let drain = join_all(pool.into_handles());
        tokio::pin!(drain);
        let results = match tokio::time::timeout(self.graceful_stop, &mut drain).await {
            Ok(results) => results,
            Err(_) => {
                tracing::warn!(
                    "Graceful stop of {:?} expired, interrupting {} virtual users",
                    self.graceful_stop,
                    ctx.live_vus()
                );
                state_tx.send(RunState::Aborted)?;
                drain.await
            }
        };

        tracing::info!("Processing results...");
        let mut final_agg = A::new();
        for res in results {
            match res {
                Ok(agg) => final_agg.merge(agg),
                // Keep everyone else's data when one worker panics.
                Err(e) => tracing::error!("Virtual user panicked with error: {e}"),
            }
        }

        tracing::info!("Done running scenario: {}!", scenario.name);
        Ok(final_agg)
    }
}

#[cfg(feature = "internals")]
pub use internals::*;

/// Internal components for the `RampingVusExecutor`.
mod internals {
    use super::*;

    /// Shared run state for the scheduler and every virtual user.
    #[derive(Clone)]
    pub struct RunContext {
        /// Broadcasts run lifecycle changes.
        pub state: Receiver<RunState>,
        /// Virtual users whose task is still executing (including retired ones
        /// finishing their last iteration).
        pub live: Arc<AtomicU64>,
        pub started_at: Instant,
    }

    impl RunContext {
        pub fn new() -> (Self, Sender<RunState>) {
            let (tx, rx) = channel(RunState::Running);
            (
                Self {
                    state: rx,
                    live: Arc::new(AtomicU64::new(0)),
                    started_at: Instant::now(),
                },
                tx,
            )
        }

        pub fn elapsed(&self) -> Duration {
            self.started_at.elapsed()
        }

        pub fn is_running(&self) -> bool {
            *self.state.borrow() == RunState::Running
        }

        pub fn live_vus(&self) -> u64 {
            self.live.load(Ordering::Relaxed)
        }
    }

    const ACTIVE: u8 = 0;
    const RETIRED: u8 = 1;
    const EXITED: u8 = 2;

    /// Lifecycle of one virtual user, shared between it and the scheduler.
    ///
    /// `Active -> Retired` and back are driven by the scheduler. Only the
    /// virtual user moves `Retired -> Exited`, between two iterations, so a
    /// retirement can be undone until the user actually leaves its loop.
    pub struct VuSignal {
        state: AtomicU8,
        wake: Notify,
    }

    impl VuSignal {
        fn new() -> Self {
            Self {
                state: AtomicU8::new(ACTIVE),
                wake: Notify::new(),
            }
        }

        pub fn is_active(&self) -> bool {
            self.state.load(Ordering::SeqCst) == ACTIVE
        }

        pub fn is_exited(&self) -> bool {
            self.state.load(Ordering::SeqCst) == EXITED
        }

        fn retire(&self) {
            if self
                .state
                .compare_exchange(ACTIVE, RETIRED, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                // Cut a pause short.
                self.wake.notify_one();
            }
        }

        fn reactivate(&self) -> bool {
            self.state
                .compare_exchange(RETIRED, ACTIVE, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        }

        /// Checked between iterations. `false` once retired, and the user is
        /// then marked as exited.
        fn keep_going(&self) -> bool {
            match self
                .state
                .compare_exchange(RETIRED, EXITED, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => false,
                Err(state) => state == ACTIVE,
            }
        }

        fn exit(&self) {
            self.state.store(EXITED, Ordering::SeqCst);
        }
    }

    /// Keeps the live counter and the exit state accurate on every exit path,
    /// panics included.
    struct LiveGuard {
        live: Arc<AtomicU64>,
        signal: Arc<VuSignal>,
    }

    impl LiveGuard {
        fn enter(live: &Arc<AtomicU64>, signal: &Arc<VuSignal>) -> Self {
            live.fetch_add(1, Ordering::Relaxed);
            Self {
                live: live.clone(),
                signal: signal.clone(),
            }
        }
    }

    impl Drop for LiveGuard {
        fn drop(&mut self) {
            self.signal.exit();
            self.live.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Handle on one spawned virtual user.
    pub struct VirtualUser<A> {
        pub id: u64,
        signal: Arc<VuSignal>,
        handle: JoinHandle<A>,
    }

    impl<A> VirtualUser<A> {
        pub fn is_active(&self) -> bool {
            self.signal.is_active()
        }

        /// Still inside its loop, possibly finishing a last iteration.
        pub fn is_live(&self) -> bool {
            !self.signal.is_exited() && !self.handle.is_finished()
        }

        /// Ask the virtual user to exit after its current iteration.
        pub fn retire(&self) {
            self.signal.retire();
        }

        /// Cancel a retirement the virtual user has not acted on yet.
        pub fn reactivate(&self) -> bool {
            self.is_live() && self.signal.reactivate()
        }

        pub fn into_handle(self) -> JoinHandle<A> {
            self.handle
        }
    }

    /// Spawns one virtual user looping over `action` until retired or stopped.
    ///
    /// Retirement is only observed between iterations, so a request in
    /// progress is never cut short by a ramp-down. Only `RunState::Aborted`
    /// interrupts an iteration.
    pub fn spawn_vu<A, F, Fut>(
        ctx: &RunContext,
        id: u64,
        action: F,
        pause: Option<Duration>,
    ) -> VirtualUser<A>
    where
        A: Aggregate + 'static,
        F: Fn() -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = A::Metric> + Send + 'static,
    {
        let signal = Arc::new(VuSignal::new());
        let vu_signal = signal.clone();
        let ctx = ctx.clone();
        let handle = tokio::spawn(async move {
            let _live = LiveGuard::enter(&ctx.live, &vu_signal);
            let mut agg = A::new();
            let mut pause_rx = ctx.state.clone();
            let mut abort_rx = ctx.state.clone();
            tracing::debug!("Virtual user {id} started.");

            let main_task = async {
                while ctx.is_running() && vu_signal.keep_going() {
                    let metric = action().await;
                    agg.consume(&metric);

                    if let Some(pause) = pause {
                        let sleep = tokio::time::sleep(pause);
                        tokio::pin!(sleep);
                        loop {
                            tokio::select! {
                                _ = &mut sleep => break,
                                Ok(_) = pause_rx.wait_for(|s| *s != RunState::Running) => break,
                                _ = vu_signal.wake.notified() => {
                                    if !vu_signal.is_active() {
                                        break;
                                    }
                                }
                            }
                        }
                    }
                }
            };

            tokio::select! {
                _ = main_task => {}
                Ok(_) = abort_rx.wait_for(|s| *s == RunState::Aborted) => {
                    tracing::debug!("Virtual user {id} interrupted mid-iteration.");
                }
            };

            tracing::debug!("Virtual user {id} shutting down.");
            agg
        });

        VirtualUser { id, signal, handle }
    }

    /// The set of virtual users owned by the scheduler.
    pub struct VuPool<A, F> {
        ctx: RunContext,
        action: F,
        pause: Option<Duration>,
        next_id: u64,
        /// Spawn order; the back is retired first.
        active: Vec<VirtualUser<A>>,
        /// Retirement order; the back is reactivated first.
        retired: Vec<VirtualUser<A>>,
    }

    impl<A, F, Fut> VuPool<A, F>
    where
        A: Aggregate + 'static,
        F: Fn() -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = A::Metric> + Send + 'static,
    {
        pub fn new(ctx: RunContext, action: F, pause: Option<Duration>) -> Self {
            Self {
                ctx,
                action,
                pause,
                next_id: 0,
                active: Vec::new(),
                retired: Vec::new(),
            }
        }

        /// Virtual users that have not been asked to retire.
        pub fn active(&self) -> usize {
            self.active.len()
        }

        /// Active virtual users plus retired ones still finishing an iteration.
        pub fn live(&self) -> usize {
            self.active.len() + self.retired.iter().filter(|vu| vu.is_live()).count()
        }

        /// Converge on `target` active virtual users without ever having more
        /// than `target` live ones.
        ///
        /// Retired users that are still live are reactivated before anything
        /// new is spawned, and spawning stops once the live count reaches the
        /// target.
        pub fn scale_to(&mut self, target: u64) {
            let target = target as usize;
            while self.active.len() < target {
                let Some(pos) = self.retired.iter().rposition(VirtualUser::reactivate) else {
                    break;
                };
                let vu = self.retired.remove(pos);
                tracing::debug!("Reactivated virtual user {}.", vu.id);
                self.active.push(vu);
            }

            let mut live = self.live();
            while self.active.len() < target && live < target {
                let vu = spawn_vu(&self.ctx, self.next_id, self.action.clone(), self.pause);
                tracing::debug!("Spawned virtual user {}.", vu.id);
                self.next_id += 1;
                self.active.push(vu);
                live += 1;
            }

            while self.active.len() > target {
                let Some(vu) = self.active.pop() else { break };
                vu.retire();
                tracing::debug!("Retired virtual user {}.", vu.id);
                self.retired.push(vu);
            }
        }

        pub fn into_handles(self) -> Vec<JoinHandle<A>> {
            self.active
                .into_iter()
                .chain(self.retired)
                .map(VirtualUser::into_handle)
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        aggregate::SampleAggregate,
        metric::{ITERATIONS, Iteration, MetricSample},
    };
    use std::sync::atomic::AtomicUsize;

    fn counting_action(
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        work: Duration,
    ) -> impl Fn() -> futures::future::BoxFuture<'static, Iteration> + Send + Sync + Clone + 'static
    {
        move || {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            Box::pin(async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(work).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                let mut it = Iteration::new();
                it.push(MetricSample::counter(ITERATIONS, 1.0));
                it
            })
        }
    }

    fn iterations(agg: &SampleAggregate) -> u64 {
        agg.metric(ITERATIONS)
            .map(|m| m.matching(&Default::default()).count())
            .unwrap_or(0)
    }

    #[tokio::test(start_paused = true)]
    async fn follows_the_ramp_and_merges_every_worker() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let scenario = Scenario::<SampleAggregate, _, _>::builder()
            .name("ramp")
            .action(counting_action(
                in_flight.clone(),
                peak.clone(),
                Duration::from_millis(50),
            ))
            .build();

        let agg: SampleAggregate = RampingVusExecutor::builder()
            .stages(vec![
                Stage::new(Duration::from_secs(1), 4),
                Stage::new(Duration::from_secs(1), 4),
                Stage::new(Duration::from_secs(1), 0),
            ])
            .build()
            .exec(&scenario)
            .await
            .unwrap();

        assert_eq!(peak.load(Ordering::SeqCst), 4);
        assert_eq!(in_flight.load(Ordering::SeqCst), 0);
        // 4 VUs for the whole hold stage at 50ms per iteration alone give 80.
        assert!(iterations(&agg) >= 80, "got {}", iterations(&agg));
    }

    #[tokio::test(start_paused = true)]
    async fn all_zero_stages_finish_immediately() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let scenario = Scenario::<SampleAggregate, _, _>::builder()
            .name("idle")
            .action(counting_action(in_flight, peak.clone(), Duration::from_millis(1)))
            .build();

        let start = Instant::now();
        let agg: SampleAggregate = RampingVusExecutor::builder()
            .stages(vec![
                Stage::new(Duration::from_secs(30), 0),
                Stage::new(Duration::from_secs(30), 0),
            ])
            .build()
            .exec(&scenario)
            .await
            .unwrap();

        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(agg.is_empty());
        assert_eq!(peak.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_iterations_finish_within_graceful_stop() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let scenario = Scenario::<SampleAggregate, _, _>::builder()
            .name("slow")
            .action(counting_action(in_flight, peak, Duration::from_secs(2)))
            .build();

        let agg: SampleAggregate = RampingVusExecutor::builder()
            .stages(vec![Stage::new(Duration::ZERO, 1), Stage::new(Duration::from_secs(1), 1)])
            .graceful_stop(Duration::from_secs(5))
            .build()
            .exec(&scenario)
            .await
            .unwrap();

        // The iteration started at t=0 completes at t=2s, after the stages ended.
        assert_eq!(iterations(&agg), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stragglers_are_abandoned_after_graceful_stop() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let scenario = Scenario::<SampleAggregate, _, _>::builder()
            .name("stuck")
            .action(counting_action(
                in_flight.clone(),
                peak,
                Duration::from_secs(3600),
            ))
            .build();

        let start = Instant::now();
        let agg: SampleAggregate = RampingVusExecutor::builder()
            .stages(vec![Stage::new(Duration::ZERO, 2), Stage::new(Duration::from_secs(1), 2)])
            .graceful_stop(Duration::from_secs(2))
            .build()
            .exec(&scenario)
            .await
            .unwrap();

        assert!(start.elapsed() < Duration::from_secs(10));
        assert_eq!(iterations(&agg), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_spaces_out_iterations() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let scenario = Scenario::<SampleAggregate, _, _>::builder()
            .name("paced")
            .action(counting_action(in_flight, peak, Duration::ZERO))
            .build();

        let agg: SampleAggregate = RampingVusExecutor::builder()
            .stages(vec![Stage::new(Duration::ZERO, 1), Stage::new(Duration::from_secs(10), 1)])
            .pause(Duration::from_secs(1))
            .build()
            .exec(&scenario)
            .await
            .unwrap();

        let n = iterations(&agg);
        assert!((10..=11).contains(&n), "got {n}");
    }

    #[tokio::test(start_paused = true)]
    async fn dip_and_recovery_never_exceeds_the_target() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let scenario = Scenario::<SampleAggregate, _, _>::builder()
            .name("dip")
            .action(counting_action(
                in_flight.clone(),
                peak.clone(),
                Duration::from_secs(5),
            ))
            .build();

        let agg: SampleAggregate = RampingVusExecutor::builder()
            .stages(vec![
                Stage::new(Duration::ZERO, 4),
                Stage::new(Duration::from_millis(100), 0),
                Stage::new(Duration::from_secs(1), 4),
                Stage::new(Duration::from_secs(1), 4),
            ])
            .build()
            .exec(&scenario)
            .await
            .unwrap();

        assert!(peak.load(Ordering::SeqCst) <= 4, "peak {}", peak.load(Ordering::SeqCst));
        assert_eq!(in_flight.load(Ordering::SeqCst), 0);
        // The first four iterations were never cut short and nothing else started.
        assert_eq!(iterations(&agg), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_tick_is_rounded_up() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let scenario = Scenario::<SampleAggregate, _, _>::builder()
            .name("zero tick")
            .action(counting_action(in_flight, peak.clone(), Duration::from_millis(10)))
            .build();

        let agg: SampleAggregate = RampingVusExecutor::builder()
            .stages(vec![Stage::new(Duration::ZERO, 1), Stage::new(Duration::from_millis(50), 1)])
            .tick(Duration::ZERO)
            .build()
            .exec(&scenario)
            .await
            .unwrap();

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert!(iterations(&agg) >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pool_reactivates_retired_users_before_spawning() {
        let (ctx, _state_tx) = RunContext::new();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut pool: VuPool<SampleAggregate, _> = VuPool::new(
            ctx.clone(),
            counting_action(in_flight, peak.clone(), Duration::from_secs(1)),
            None,
        );

        pool.scale_to(3);
        tokio::time::sleep(Duration::from_millis(10)).await;
        pool.scale_to(0);
        assert_eq!(pool.active(), 0);
        assert_eq!(pool.live(), 3);

        pool.scale_to(3);
        assert_eq!(pool.active(), 3);
        assert_eq!(pool.live(), 3);

        // Long after the first iterations, the same three users keep looping.
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(ctx.live_vus(), 3);
        assert_eq!(peak.load(Ordering::SeqCst), 3);

        let handles = pool.into_handles();
        assert_eq!(handles.len(), 3);
        for h in handles {
            h.abort();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn partial_recovery_waits_for_retired_users_to_leave() {
        let (ctx, _state_tx) = RunContext::new();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut pool: VuPool<SampleAggregate, _> = VuPool::new(
            ctx.clone(),
            counting_action(in_flight, peak.clone(), Duration::from_secs(1)),
            None,
        );

        pool.scale_to(4);
        tokio::time::sleep(Duration::from_millis(10)).await;
        pool.scale_to(0);
        pool.scale_to(2);
        // Two users are back, two are still finishing: nothing new starts.
        assert_eq!(pool.active(), 2);
        assert_eq!(pool.live(), 4);
        pool.scale_to(3);
        assert_eq!(pool.active(), 3);
        assert_eq!(pool.live(), 4);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(pool.live(), 3);
        assert_eq!(ctx.live_vus(), 3);
        assert_eq!(peak.load(Ordering::SeqCst), 4);

        let handles = pool.into_handles();
        assert_eq!(handles.len(), 4);
        for h in handles {
            h.abort();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retiring_cuts_a_pause_short() {
        let (ctx, _state_tx) = RunContext::new();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut pool: VuPool<SampleAggregate, _> = VuPool::new(
            ctx.clone(),
            counting_action(in_flight, peak, Duration::ZERO),
            Some(Duration::from_secs(60)),
        );

        pool.scale_to(1);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(ctx.live_vus(), 1);

        pool.scale_to(0);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(ctx.live_vus(), 0);
        assert_eq!(pool.live(), 0);

        let agg = pool.into_handles().pop().unwrap().await.unwrap();
        assert_eq!(iterations(&agg), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pool_retires_newest_first_without_interrupting() {
        let (ctx, _state_tx) = RunContext::new();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut pool: VuPool<SampleAggregate, _> = VuPool::new(
            ctx.clone(),
            counting_action(in_flight, peak, Duration::from_millis(100)),
            None,
        );

        pool.scale_to(3);
        assert_eq!(pool.active(), 3);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(ctx.live_vus(), 3);

        pool.scale_to(1);
        assert_eq!(pool.active(), 1);
        // Retired users are still finishing their first iteration.
        assert_eq!(ctx.live_vus(), 3);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(ctx.live_vus(), 1);

        let handles = pool.into_handles();
        assert_eq!(handles.len(), 3);
        for h in handles {
            h.abort();
        }
    }
}
