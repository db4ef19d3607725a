use std::collections::BTreeMap;
use std::fmt::Debug;

use serde::{Serialize, de::DeserializeOwned};

use crate::{
    Metric,
    macros::aggregate,
    metric::{Iteration, MetricKind, MetricSample, Tags},
    threshold::MetricSelector,
};

/// The `Aggregate` trait defines how raw [`Metric`] values are collected and combined
/// into an intermediate, mergeable representation that preserves the information
/// necessary for later analysis.
///
/// Aggregates do **not** compute final statistics such as averages or percentiles.
/// Those derived values belong in a [`crate::Report`] (see [`crate::report::Stats`]),
/// or in threshold evaluation, both of which read from the aggregate.
///
/// # Role
///
/// - Collect individual [`Metric`] values produced by a scenario action.
/// - Be cheaply mergeable so worker-local aggregates can be combined into a
///   global view once the run is over. Each virtual user owns one aggregate,
///   so recording never contends on a lock.
///
/// # Implementor notes
/// - `merge` must be **associative** and **commutative**; worker aggregates are
///   merged in arbitrary order.
///
/// # Example
/// ```rust
/// use stampede::{Aggregate, Metric, macros::*};
///
/// #[metric]
/// struct MyMetric(u64);
///
/// #[aggregate]
/// struct MyAggregate {
///     count: u64,
///     sum: u128,
/// }
///
/// impl Aggregate for MyAggregate {
///     type Metric = MyMetric;
///
///     fn new() -> Self {
///         Self { count: 0, sum: 0 }
///     }
///
///     fn consume(&mut self, metric: &Self::Metric) {
///         self.count += 1;
///         self.sum += metric.0 as u128;
///     }
///
///     fn merge(&mut self, other: Self) {
///         self.count += other.count;
///         self.sum += other.sum;
///     }
/// }
/// ```
pub trait Aggregate
where
    Self: Serialize + DeserializeOwned + PartialOrd + PartialEq + Send + Sync + Debug + Clone,
{
    /// The metric type this aggregate summarizes.
    type Metric: Metric;

    /// Create a new, empty instance of the aggregate.
    fn new() -> Self;

    /// Aggregate multiple metrics into the current instance.
    fn aggregate(&mut self, metrics: &[Self::Metric]) {
        metrics.iter().for_each(|m| self.consume(m));
    }

    /// Incorporate a single metric into the aggregate.
    fn consume(&mut self, metric: &Self::Metric);

    /// Combine two different aggregates into one.
    fn merge(&mut self, other: Self);
}

/// Raw values of one metric under one tag set.
///
/// Every value is retained so percentiles can be computed exactly at report
/// time; memory grows linearly with the number of samples (8 bytes each).
#[aggregate]
#[derive(Default)]
pub struct Series {
    pub values: Vec<f64>,
    pub sum: f64,
    /// Samples whose value was non-zero, the numerator of a rate.
    pub nonzero: u64,
}

impl Series {
    pub fn record(&mut self, value: f64) {
        self.values.push(value);
        self.sum += value;
        if value != 0.0 {
            self.nonzero += 1;
        }
    }

    pub fn merge(&mut self, other: Series) {
        self.values.extend(other.values);
        self.sum += other.sum;
        self.nonzero += other.nonzero;
    }

    pub fn count(&self) -> u64 {
        self.values.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[aggregate]
pub struct TaggedSeries {
    pub tags: Tags,
    pub series: Series,
}

/// Everything recorded for one metric name.
#[aggregate]
pub struct MetricSeries {
    pub kind: MetricKind,
    /// One entry per distinct tag set, in first-seen order.
    pub tagged: Vec<TaggedSeries>,
}

impl MetricSeries {
    fn new(kind: MetricKind) -> Self {
        Self {
            kind,
            tagged: Vec::new(),
        }
    }

    fn series_mut(&mut self, tags: &Tags) -> &mut Series {
        let idx = match self.tagged.iter().position(|t| &t.tags == tags) {
            Some(idx) => idx,
            None => {
                self.tagged.push(TaggedSeries {
                    tags: tags.clone(),
                    series: Series::default(),
                });
                self.tagged.len() - 1
            }
        };
        &mut self.tagged[idx].series
    }

    /// All values of this metric whose tags contain `filter`.
    pub fn matching(&self, filter: &Tags) -> Series {
        let mut out = Series::default();
        for tagged in self.tagged.iter().filter(|t| t.tags.contains_all(filter)) {
            out.merge(tagged.series.clone());
        }
        out
    }
}

/// Built-in [`Aggregate`] for [`Iteration`]s: keeps a [`Series`] per metric name
/// and tag set, which is enough to answer any threshold selector later.
#[aggregate]
#[derive(Default)]
pub struct SampleAggregate {
    pub metrics: BTreeMap<String, MetricSeries>,
}

impl SampleAggregate {
    pub fn record(&mut self, sample: &MetricSample) {
        self.metrics
            .entry(sample.name.clone())
            .or_insert_with(|| MetricSeries::new(sample.kind))
            .series_mut(&sample.tags)
            .record(sample.value);
    }

    pub fn metric(&self, name: &str) -> Option<&MetricSeries> {
        self.metrics.get(name)
    }

    /// Values matching a threshold selector; empty when nothing matched.
    pub fn select(&self, selector: &MetricSelector) -> Series {
        self.metric(&selector.name)
            .map(|m| m.matching(&selector.filter))
            .unwrap_or_default()
    }

    /// Number of samples recorded across all metrics.
    pub fn sample_count(&self) -> u64 {
        self.metrics
            .values()
            .flat_map(|m| m.tagged.iter())
            .map(|t| t.series.count())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

impl Aggregate for SampleAggregate {
    type Metric = Iteration;

    fn new() -> Self {
        SampleAggregate::default()
    }

    fn consume(&mut self, metric: &Self::Metric) {
        metric.iter().for_each(|s| self.record(s));
    }

    fn merge(&mut self, other: Self) {
        for (name, incoming) in other.metrics {
            match self.metrics.get_mut(&name) {
                Some(existing) => {
                    for tagged in incoming.tagged {
                        existing.series_mut(&tagged.tags).merge(tagged.series);
                    }
                }
                None => {
                    self.metrics.insert(name, incoming);
                }
            }
        }
    }
}
