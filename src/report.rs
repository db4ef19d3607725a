use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fmt::{self, Debug};
use std::future::Future;

use crate::{
    Aggregate,
    aggregate::{SampleAggregate, Series},
    metric::MetricKind,
    threshold::AggregateKind,
};

/// A [`Report`] represents the processed form of an [`Aggregate`].
///
/// Reports transform raw aggregated data into meaningful insights such as
/// averages, percentiles, ratios and totals. They are *pure data structures*,
/// free of side effects and I/O.
///
/// Implementors define how to construct the report from an [`Aggregate`]
/// through a [`From<A>`] implementation. Once created, a report can be
/// serialized, logged, or consumed by a [`Reporter`].
///
/// See also: [`Reporter`].
pub trait Report<A>
where
    Self: Send + Sync + Debug + From<A> + Serialize + DeserializeOwned,
    A: Aggregate,
{
}

/// A [`Reporter`] consumes a [`Report`] and performs side effects: displaying
/// it, sending it to a service, or persisting it somewhere.
///
/// # Example
/// ```rust
/// use stampede::{Aggregate, Report, Reporter};
///
/// struct DebugReporter;
///
/// impl<A: Aggregate, R: Report<A>> Reporter<A, R> for DebugReporter {
///     type Error = std::convert::Infallible;
///
///     async fn report(&self, report: &R) -> Result<(), Self::Error> {
///         println!("{report:?}");
///         Ok(())
///     }
/// }
/// ```
pub trait Reporter<A: Aggregate, R: Report<A>> {
    type Error;

    fn report(&self, report: &R) -> impl Future<Output = Result<(), Self::Error>>;
}

/// Order statistics derived from a [`Series`].
///
/// Percentiles are exact: for `p` in `[0, 100]` over `n` sorted values the
/// rank is `p / 100 * (n - 1)` and the result interpolates linearly between the
/// two values bracketing that rank. The estimate therefore always lies between
/// two adjacent order statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct Stats {
    sorted: Vec<f64>,
    sum: f64,
    nonzero: u64,
}

impl From<&Series> for Stats {
    fn from(series: &Series) -> Self {
        let mut sorted = series.values.clone();
        sorted.sort_by(f64::total_cmp);
        Self {
            sorted,
            sum: series.sum,
            nonzero: series.nonzero,
        }
    }
}

impl Stats {
    pub fn count(&self) -> u64 {
        self.sorted.len() as u64
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn min(&self) -> Option<f64> {
        self.sorted.first().copied()
    }

    pub fn max(&self) -> Option<f64> {
        self.sorted.last().copied()
    }

    pub fn avg(&self) -> Option<f64> {
        (!self.sorted.is_empty()).then(|| self.sum / self.sorted.len() as f64)
    }

    pub fn med(&self) -> Option<f64> {
        self.percentile(50.0)
    }

    pub fn rate(&self) -> Option<f64> {
        (!self.sorted.is_empty()).then(|| self.nonzero as f64 / self.sorted.len() as f64)
    }

    pub fn percentile(&self, p: f64) -> Option<f64> {
        let n = self.sorted.len();
        if n == 0 {
            return None;
        }
        let rank = (p / 100.0).clamp(0.0, 1.0) * (n - 1) as f64;
        let lo = rank.floor() as usize;
        let hi = rank.ceil() as usize;
        let (a, b) = (self.sorted[lo], self.sorted[hi]);
        Some(a + (b - a) * (rank - lo as f64))
    }

    /// The value a threshold aggregation compares against.
    pub fn value(&self, kind: AggregateKind) -> Option<f64> {
        match kind {
            AggregateKind::Avg => self.avg(),
            AggregateKind::Min => self.min(),
            AggregateKind::Max => self.max(),
            AggregateKind::Med => self.med(),
            AggregateKind::Count => Some(self.count() as f64),
            AggregateKind::Sum => Some(self.sum),
            AggregateKind::Rate => self.rate(),
            AggregateKind::Percentile(p) => self.percentile(p),
        }
    }
}

/// Summary line for one metric, across every tag set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub name: String,
    pub kind: MetricKind,
    pub count: u64,
    pub sum: f64,
    pub rate: Option<f64>,
    pub avg: Option<f64>,
    pub min: Option<f64>,
    pub med: Option<f64>,
    pub max: Option<f64>,
    pub p90: Option<f64>,
    pub p95: Option<f64>,
}

/// End-of-test summary, one entry per metric in name order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub metrics: Vec<MetricSummary>,
}

impl From<SampleAggregate> for Summary {
    fn from(value: SampleAggregate) -> Self {
        Summary::from(&value)
    }
}

impl From<&SampleAggregate> for Summary {
    fn from(value: &SampleAggregate) -> Self {
        let metrics = value
            .metrics
            .iter()
            .map(|(name, metric)| {
                let stats = Stats::from(&metric.matching(&Default::default()));
                MetricSummary {
                    name: name.clone(),
                    kind: metric.kind,
                    count: stats.count(),
                    sum: stats.sum(),
                    rate: stats.rate(),
                    avg: stats.avg(),
                    min: stats.min(),
                    med: stats.med(),
                    max: stats.max(),
                    p90: stats.percentile(90.0),
                    p95: stats.percentile(95.0),
                }
            })
            .collect();
        Self { metrics }
    }
}

impl Report<SampleAggregate> for Summary {}

impl Summary {
    pub fn metric(&self, name: &str) -> Option<&MetricSummary> {
        self.metrics.iter().find(|m| m.name == name)
    }
}

fn opt(v: Option<f64>) -> String {
    v.map_or_else(|| "-".to_owned(), |v| format!("{v:.2}"))
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for m in &self.metrics {
            let label = format!("{:.<32}:", m.name);
            match m.kind {
                MetricKind::Counter => writeln!(f, "  {label} {}", m.sum)?,
                MetricKind::Rate => {
                    let hits = m.rate.map_or(0, |r| (r * m.count as f64).round() as u64);
                    writeln!(
                        f,
                        "  {label} {:.2}% {} out of {}",
                        m.rate.unwrap_or_default() * 100.0,
                        hits,
                        m.count
                    )?
                }
                MetricKind::Trend => writeln!(
                    f,
                    "  {label} avg={} min={} med={} max={} p(90)={} p(95)={}",
                    opt(m.avg),
                    opt(m.min),
                    opt(m.med),
                    opt(m.max),
                    opt(m.p90),
                    opt(m.p95)
                )?,
            }
        }
        Ok(())
    }
}

/// Prints a human-readable summary to stdout.
pub struct StdoutReporter;

impl Reporter<SampleAggregate, Summary> for StdoutReporter {
    type Error = std::convert::Infallible;

    async fn report(&self, report: &Summary) -> Result<(), Self::Error> {
        println!("{report}");
        Ok(())
    }
}

/// Prints the summary as a single JSON document.
pub struct JsonReporter;

impl Reporter<SampleAggregate, Summary> for JsonReporter {
    type Error = serde_json::Error;

    async fn report(&self, report: &Summary) -> Result<(), Self::Error> {
        let value = serde_json::to_string(report)?;
        println!("{value}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::{HTTP_REQ_DURATION, HTTP_REQ_FAILED, HTTP_REQS, MetricSample};

    fn stats(values: &[f64]) -> Stats {
        let mut s = Series::default();
        values.iter().for_each(|v| s.record(*v));
        Stats::from(&s)
    }

    #[test]
    fn percentiles_interpolate_between_ranks() {
        let s = stats(&[40.0, 10.0, 30.0, 20.0]);
        assert_eq!(s.percentile(0.0), Some(10.0));
        assert_eq!(s.percentile(100.0), Some(40.0));
        assert_eq!(s.med(), Some(25.0));
        assert_eq!(s.percentile(50.0), s.value(AggregateKind::Med));
    }

    #[test]
    fn single_sample_is_every_percentile() {
        let s = stats(&[7.0]);
        for p in [0.0, 50.0, 99.0, 100.0] {
            assert_eq!(s.percentile(p), Some(7.0));
        }
    }

    #[test]
    fn empty_stats_have_no_values_but_a_zero_count() {
        let s = stats(&[]);
        assert_eq!(s.avg(), None);
        assert_eq!(s.rate(), None);
        assert_eq!(s.percentile(99.0), None);
        assert_eq!(s.value(AggregateKind::Count), Some(0.0));
    }

    #[test]
    fn aggregation_values() {
        let s = stats(&[1.0, 0.0, 1.0, 0.0]);
        assert_eq!(s.value(AggregateKind::Rate), Some(0.5));
        assert_eq!(s.value(AggregateKind::Sum), Some(2.0));
        assert_eq!(s.value(AggregateKind::Avg), Some(0.5));
        assert_eq!(s.value(AggregateKind::Min), Some(0.0));
        assert_eq!(s.value(AggregateKind::Max), Some(1.0));
        assert_eq!(s.value(AggregateKind::Count), Some(4.0));
    }

    #[test]
    fn summary_covers_every_metric() {
        let mut agg = SampleAggregate::default();
        for ms in [10.0, 20.0, 30.0] {
            agg.record(&MetricSample::trend(HTTP_REQ_DURATION, ms));
            agg.record(&MetricSample::counter(HTTP_REQS, 1.0));
            agg.record(&MetricSample::rate(HTTP_REQ_FAILED, ms > 25.0));
        }
        let summary = Summary::from(agg);
        assert_eq!(summary.metrics.len(), 3);

        let reqs = summary.metric(HTTP_REQS).unwrap();
        assert_eq!(reqs.sum, 3.0);
        let duration = summary.metric(HTTP_REQ_DURATION).unwrap();
        assert_eq!(duration.med, Some(20.0));
        let failed = summary.metric(HTTP_REQ_FAILED).unwrap();
        assert_eq!(failed.kind, MetricKind::Rate);

        let text = summary.to_string();
        assert!(text.contains("http_req_failed"));
        assert!(text.contains("33.33% 1 out of 3"));
        assert!(text.contains("med=20.00"));
    }
}
