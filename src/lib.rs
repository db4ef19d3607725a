//! Stampede: ramping virtual-user load tests with k6-style thresholds.
//!
//! A run ramps a pool of looping virtual users through a list of stages, lets
//! every virtual user collect its own samples, merges them once the run is
//! over and evaluates pass/fail thresholds such as `p(99)<500` against the
//! result.
//!
//! # Architecture
//!
//! - [`Scenario`]: names the action every virtual user repeats.
//! - [`Executor`]: runs a scenario. [`RampingVusExecutor`] follows a
//!   piecewise-linear concurrency target described by [`Stage`]s.
//! - [`Metric`]: what one execution of the action produces. The built-in
//!   metric is [`metric::Iteration`], a bundle of named, tagged samples.
//! - [`Aggregate`]: a mergeable collector of metrics, one per virtual user.
//! - [`threshold`]: parses selectors like `http_req_duration{staticAsset:yes}`
//!   and expressions like `rate<0.001`, then evaluates them against the merged
//!   aggregate.
//! - [`Report`] / [`Reporter`]: turn an aggregate into output and send it
//!   somewhere.
//! - [`LoadTest`]: glues [`Options`], the executor and the evaluation together.
//!
//! # Example
//!
//! ```rust,no_run
//! use stampede::{LoadTest, Options, Reporter, report::StdoutReporter};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let options = Options::from_json(r#"{
//!     "stages": [
//!         { "duration": "30s", "target": 100 },
//!         { "duration": "1m", "target": 100 },
//!         { "duration": "30s", "target": 0 }
//!     ],
//!     "thresholds": { "http_req_duration": ["p(99)<500"] },
//!     "request": { "url": "http://localhost:8881/timestamp" }
//! }"#)?;
//!
//! let outcome = LoadTest::new(options).run_http(reqwest::Client::new()).await?;
//! StdoutReporter.report(&outcome.summary).await?;
//! std::process::exit(outcome.exit_code());
//! # }
//! ```
//!
//! # Feature flags
//! - `internals`: expose the executor's scheduling internals (unstable)

/// Metric aggregators
pub mod aggregate;
/// Load test options
pub mod config;
pub mod error;
/// Orchestrators that define how things will actually run
pub mod executor;
pub mod http;
/// Single metrics
pub mod metric;
/// Reports and Reporters
pub mod report;
pub mod runner;
/// Names the action a virtual user repeats
pub mod scenario;
/// Pass/fail criteria evaluated after a run
pub mod threshold;

/// Attribute macros for custom metrics and aggregates
pub mod macros {
    pub use stampede_macros::*;
}

pub use aggregate::Aggregate;
pub use config::Options;
pub use error::{ConfigError, Error, RequestError};
pub use executor::{Executor, RampingVusExecutor, Stage};
pub use metric::Metric;
pub use report::{Report, Reporter};
pub use runner::{LoadTest, RunOutcome};
pub use scenario::Scenario;
