//! Drives a whole load test: run the stages, evaluate the thresholds, report.
use std::{future::Future, time::Duration};

use reqwest::Client;
use tokio::time::Instant;

use crate::{
    Executor,
    aggregate::SampleAggregate,
    config::Options,
    error::{ConfigError, Error},
    executor::RampingVusExecutor,
    http::HttpAction,
    metric::Iteration,
    report::Summary,
    scenario::Scenario,
    threshold::{Evaluation, evaluate},
};

/// Exit code of a run whose thresholds were crossed.
pub const THRESHOLDS_FAILED_EXIT_CODE: i32 = 99;

/// A configured load test.
#[derive(Debug, Clone)]
pub struct LoadTest {
    options: Options,
}

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub aggregate: SampleAggregate,
    pub summary: Summary,
    pub evaluation: Evaluation,
    pub elapsed: Duration,
}

impl RunOutcome {
    pub fn passed(&self) -> bool {
        self.evaluation.passed()
    }

    /// `0` when every threshold passed.
    pub fn exit_code(&self) -> i32 {
        if self.passed() {
            0
        } else {
            THRESHOLDS_FAILED_EXIT_CODE
        }
    }
}

impl LoadTest {
    pub fn new(options: Options) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn executor(&self) -> RampingVusExecutor {
        self.options.executor()
    }

    /// Runs `scenario` through every stage and evaluates the thresholds
    /// against the merged results.
    pub async fn run<F, Fut>(
        &self,
        scenario: &Scenario<SampleAggregate, F, Fut>,
    ) -> Result<RunOutcome, Error>
    where
        F: Fn() -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = Iteration> + Send + 'static,
    {
        let started = Instant::now();
        let aggregate = self.executor().exec(scenario).await?;
        let elapsed = started.elapsed();

        let evaluation = evaluate(&self.options.thresholds, &aggregate, self.options.no_data);
        let summary = Summary::from(&aggregate);
        if evaluation.passed() {
            tracing::info!(
                samples = aggregate.sample_count(),
                elapsed = ?elapsed,
                "All thresholds passed"
            );
        } else {
            tracing::warn!(
                samples = aggregate.sample_count(),
                failed = evaluation.failures().count(),
                "Some thresholds have failed"
            );
        }

        Ok(RunOutcome {
            aggregate,
            summary,
            evaluation,
            elapsed,
        })
    }

    /// Runs the configured request. Fails before the run when no request is
    /// configured.
    pub async fn run_http(&self, client: Client) -> Result<RunOutcome, Error> {
        let request = self
            .options
            .request
            .as_ref()
            .ok_or_else(|| ConfigError::Validation {
                message: "no request configured".to_owned(),
            })?;
        let action = HttpAction::from_options(client, request);
        let scenario = Scenario::<SampleAggregate, _, _>::builder()
            .name(format!("{} {}", request.method, request.url))
            .action(move || {
                let action = action.clone();
                async move { action.execute().await }
            })
            .build();
        self.run(&scenario).await
    }
}
