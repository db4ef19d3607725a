//! An HTTP request action producing k6-style samples.
//!
//! ```rust,no_run
//! use stampede::{Scenario, aggregate::SampleAggregate, http::HttpAction};
//!
//! let action = HttpAction::builder()
//!     .client(reqwest::Client::new())
//!     .url("http://localhost:8881/timestamp")
//!     .build();
//!
//! let scenario = Scenario::<SampleAggregate, _, _>::builder()
//!     .name("timestamp")
//!     .action(move || {
//!         let action = action.clone();
//!         async move { action.execute().await }
//!     })
//!     .build();
//! ```
use std::time::{Duration, Instant};

use reqwest::{Client, Method};
use typed_builder::TypedBuilder;

use crate::{
    config::RequestOptions,
    error::RequestError,
    metric::{
        HTTP_REQ_DURATION, HTTP_REQ_FAILED, HTTP_REQS, ITERATION_DURATION, ITERATIONS, Iteration,
        MetricSample, Tags,
    },
};

/// Name of the status check recorded on every request.
pub const STATUS_CHECK: &str = "is status 200";

/// One request, repeated by every virtual user.
///
/// Cloning is cheap: `reqwest::Client` shares its connection pool.
#[derive(Debug, Clone, TypedBuilder)]
pub struct HttpAction {
    client: Client,
    #[builder(setter(into))]
    url: String,
    #[builder(default = Method::GET)]
    method: Method,
    /// Extra tags attached to every sample.
    #[builder(default)]
    tags: Tags,
    #[builder(default = Duration::from_secs(60))]
    timeout: Duration,
}

impl HttpAction {
    pub fn from_options(client: Client, options: &RequestOptions) -> Self {
        Self {
            client,
            url: options.url.clone(),
            method: options.method.clone(),
            tags: options.tags.clone(),
            timeout: options.timeout,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Sends the request and records its samples. Failures never escape:
    /// they end up as `http_req_failed` samples tagged with the error category.
    pub async fn execute(&self) -> Iteration {
        let started = Instant::now();
        let outcome = self.send().await;
        let duration = started.elapsed();

        let mut tags = self
            .tags
            .clone()
            .with("method", self.method.as_str())
            .with("url", &self.url)
            .with("name", &self.url);
        let status = match &outcome {
            Ok(status) => *status,
            Err(err) => {
                tracing::debug!(url = %self.url, error = %err, "Request failed");
                tags.insert("error", err.category());
                0
            }
        };
        tags.insert("status", status.to_string());

        let mut it = Iteration::new();
        it.push(MetricSample::counter(HTTP_REQS, 1.0).with_tags(tags.clone()));
        it.push(MetricSample::millis(HTTP_REQ_DURATION, duration).with_tags(tags.clone()));
        it.push(
            MetricSample::rate(HTTP_REQ_FAILED, !(200..=399).contains(&status))
                .with_tags(tags.clone()),
        );
        it.check(STATUS_CHECK, status == 200, &tags);
        it.push(MetricSample::counter(ITERATIONS, 1.0).with_tags(self.tags.clone()));
        it.push(
            MetricSample::millis(ITERATION_DURATION, started.elapsed()).with_tags(self.tags.clone()),
        );
        it
    }

    /// The response status, once the body has been read.
    async fn send(&self) -> Result<u16, RequestError> {
        let response = self
            .client
            .request(self.method.clone(), &self.url)
            .timeout(self.timeout)
            .send()
            .await?;
        let status = response.status().as_u16();
        response.bytes().await?;
        Ok(status)
    }
}
