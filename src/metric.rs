use std::{
    collections::BTreeMap,
    fmt::{self, Debug},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::macros::metric;

/// Total number of HTTP requests issued.
pub const HTTP_REQS: &str = "http_reqs";
/// Time spent on a single HTTP request, in milliseconds.
pub const HTTP_REQ_DURATION: &str = "http_req_duration";
/// Whether a request failed (transport error or unexpected status).
pub const HTTP_REQ_FAILED: &str = "http_req_failed";
/// Outcome of named checks.
pub const CHECKS: &str = "checks";
/// Number of completed action iterations.
pub const ITERATIONS: &str = "iterations";
/// Wall time of one action iteration, in milliseconds.
pub const ITERATION_DURATION: &str = "iteration_duration";

/// A `Metric` is whatever a scenario action produces for one execution.
///
/// Metrics are collected by an [`crate::Aggregate`], then further analyzed
/// by a [`crate::Report`] and [`crate::Reporter`]. The built-in metric is
/// [`Iteration`], a bundle of [`MetricSample`]s.
///
/// Use the [`crate::macros::metric`] attribute to derive everything at once:
///
/// ```rust
/// use stampede::{Metric, macros::metric};
///
/// #[metric]
/// struct Latency(u64);
/// ```
pub trait Metric
where
    Self: Serialize + DeserializeOwned + PartialOrd + PartialEq + Send + Sync + Debug + Clone,
{
}

/// How samples of one metric are summarized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Values are added up (`http_reqs`).
    Counter,
    /// Values are 0/1 and summarized as the share of non-zero samples.
    Rate,
    /// Values form a distribution (`http_req_duration`).
    Trend,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Counter => "counter",
            Self::Rate => "rate",
            Self::Trend => "trend",
        })
    }
}

/// Ordered string tags attached to a sample.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Tags(BTreeMap<String, String>);

impl Tags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// `true` when every pair of `filter` is present in `self`.
    pub fn contains_all(&self, filter: &Tags) -> bool {
        filter.iter().all(|(k, v)| self.get(k) == Some(v))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Tags {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl fmt::Display for Tags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (k, v)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{k}:{v}")?;
        }
        f.write_str("}")
    }
}

/// A single observation. Booleans are stored as `0.0`/`1.0`.
///
/// `timestamp` is the wall-clock time the sample was taken, relative to the
/// UNIX epoch.
#[metric]
pub struct MetricSample {
    pub name: String,
    pub kind: MetricKind,
    pub value: f64,
    pub tags: Tags,
    pub timestamp: Duration,
}

impl MetricSample {
    pub fn new(name: impl Into<String>, kind: MetricKind, value: f64) -> Self {
        Self {
            name: name.into(),
            kind,
            value,
            tags: Tags::new(),
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default(),
        }
    }

    pub fn counter(name: impl Into<String>, value: f64) -> Self {
        Self::new(name, MetricKind::Counter, value)
    }

    pub fn rate(name: impl Into<String>, hit: bool) -> Self {
        Self::new(name, MetricKind::Rate, if hit { 1.0 } else { 0.0 })
    }

    pub fn trend(name: impl Into<String>, value: f64) -> Self {
        Self::new(name, MetricKind::Trend, value)
    }

    /// Trend sample of a duration, in milliseconds.
    pub fn millis(name: impl Into<String>, elapsed: Duration) -> Self {
        Self::trend(name, elapsed.as_secs_f64() * 1000.0)
    }

    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }
}

/// Every sample emitted by one execution of a scenario action.
///
/// ```rust
/// use stampede::metric::{Iteration, MetricSample, Tags};
///
/// let mut it = Iteration::new();
/// it.push(MetricSample::counter("logins", 1.0));
/// assert!(it.check("has session", true, &Tags::new()));
/// assert_eq!(it.len(), 2);
/// ```
#[metric]
#[derive(Default)]
pub struct Iteration {
    pub samples: Vec<MetricSample>,
}

impl Iteration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sample: MetricSample) {
        self.samples.push(sample);
    }

    /// Records a `checks` sample tagged with `check: name` and returns `passed`.
    pub fn check(&mut self, name: &str, passed: bool, tags: &Tags) -> bool {
        self.push(MetricSample::rate(CHECKS, passed).with_tags(tags.clone().with("check", name)));
        passed
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetricSample> {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
