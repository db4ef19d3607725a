//! Pass/fail conditions over aggregated metrics.
//!
//! A threshold pairs a [`MetricSelector`] (`http_req_duration{staticAsset:yes}`)
//! with one or more expressions (`p(99)<500`). Both are parsed once, when the
//! configuration is loaded, into typed values; evaluation never touches the
//! source strings again.
//!
//! # Expressions
//!
//! `<aggregation> <operator> <number>`, whitespace optional.
//!
//! | aggregation | value                                               |
//! |-------------|-----------------------------------------------------|
//! | `avg`       | arithmetic mean                                      |
//! | `min`/`max` | smallest / largest value                             |
//! | `med`       | median, same as `p(50)`                              |
//! | `p(N)`      | N-th percentile, `0 <= N <= 100`                     |
//! | `count`     | number of matching samples                           |
//! | `sum`       | sum of matching values                               |
//! | `rate`      | share of matching samples whose value is non-zero    |
//!
//! Operators are `<`, `<=`, `>`, `>=`, `==` and `!=`. `<` and `>` are strict:
//! `rate<0.001` fails when the observed rate is exactly `0.001`.
//!
//! # Missing data
//!
//! An expression whose selector matched no sample evaluates to
//! [`ThresholdStatus::NoData`]. Under the default [`NoDataPolicy::Fail`] that
//! fails the run; [`NoDataPolicy::Pass`] is the explicit opt-out.
use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    aggregate::SampleAggregate,
    error::ConfigError,
    metric::Tags,
    report::Stats,
};

/// Metric name plus an optional tag filter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricSelector {
    pub name: String,
    pub filter: Tags,
}

impl MetricSelector {
    pub fn matches(&self, name: &str, tags: &Tags) -> bool {
        self.name == name && tags.contains_all(&self.filter)
    }
}

impl FromStr for MetricSelector {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |reason: &str| ConfigError::Selector {
            selector: s.to_owned(),
            reason: reason.to_owned(),
        };
        let s_trim = s.trim();
        let (name, filter) = match s_trim.split_once('{') {
            None => (s_trim, Tags::new()),
            Some((name, rest)) => {
                let inner = rest
                    .strip_suffix('}')
                    .ok_or_else(|| err("tag filter must end with '}'"))?;
                let mut filter = Tags::new();
                for pair in inner.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                    let (key, value) = pair
                        .split_once(':')
                        .ok_or_else(|| err("tag filters are written as key:value"))?;
                    let key = unquote(key.trim());
                    if key.is_empty() {
                        return Err(err("empty tag name"));
                    }
                    filter.insert(key, unquote(value.trim()));
                }
                (name.trim(), filter)
            }
        };
        if name.is_empty() {
            return Err(err("missing metric name"));
        }
        if name.contains(|c: char| c.is_whitespace() || c == '}') {
            return Err(err("metric names cannot contain whitespace or '}'"));
        }
        Ok(Self {
            name: name.to_owned(),
            filter,
        })
    }
}

fn unquote(s: &str) -> &str {
    s.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .or_else(|| s.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
        .unwrap_or(s)
}

impl fmt::Display for MetricSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if !self.filter.is_empty() {
            write!(f, "{}", self.filter)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AggregateKind {
    Avg,
    Min,
    Max,
    Med,
    Count,
    Sum,
    Rate,
    Percentile(f64),
}

impl FromStr for AggregateKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s {
            "avg" => Self::Avg,
            "min" => Self::Min,
            "max" => Self::Max,
            "med" => Self::Med,
            "count" => Self::Count,
            "sum" => Self::Sum,
            "rate" => Self::Rate,
            other => {
                let inner = other
                    .strip_prefix("p(")
                    .and_then(|s| s.strip_suffix(')'))
                    .ok_or_else(|| format!("unknown aggregation '{other}'"))?;
                let p: f64 = inner
                    .trim()
                    .parse()
                    .map_err(|_| format!("invalid percentile '{inner}'"))?;
                if !(0.0..=100.0).contains(&p) {
                    return Err(format!("percentile {p} is outside 0..=100"));
                }
                Self::Percentile(p)
            }
        };
        Ok(kind)
    }
}

impl fmt::Display for AggregateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Avg => f.write_str("avg"),
            Self::Min => f.write_str("min"),
            Self::Max => f.write_str("max"),
            Self::Med => f.write_str("med"),
            Self::Count => f.write_str("count"),
            Self::Sum => f.write_str("sum"),
            Self::Rate => f.write_str("rate"),
            Self::Percentile(p) => write!(f, "p({p})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Operator {
    // Two-character operators first so `<=` is not read as `<`.
    const TOKENS: [(&'static str, Operator); 6] = [
        ("<=", Operator::Le),
        (">=", Operator::Ge),
        ("==", Operator::Eq),
        ("!=", Operator::Ne),
        ("<", Operator::Lt),
        (">", Operator::Gt),
    ];

    pub fn compare(self, observed: f64, limit: f64) -> bool {
        match self {
            Self::Lt => observed < limit,
            Self::Le => observed <= limit,
            Self::Gt => observed > limit,
            Self::Ge => observed >= limit,
            Self::Eq => observed == limit,
            Self::Ne => observed != limit,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Eq => "==",
            Self::Ne => "!=",
        }
    }
}

/// A parsed expression such as `p(99)<500`.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdExpr {
    pub aggregation: AggregateKind,
    pub operator: Operator,
    pub limit: f64,
    source: String,
}

impl ThresholdExpr {
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluates against a non-empty set of statistics.
    fn check(&self, stats: &Stats) -> (Option<f64>, ThresholdStatus) {
        match stats.value(self.aggregation) {
            None => (None, ThresholdStatus::NoData),
            Some(observed) if self.operator.compare(observed, self.limit) => {
                (Some(observed), ThresholdStatus::Pass)
            }
            Some(observed) => (Some(observed), ThresholdStatus::Fail),
        }
    }
}

impl FromStr for ThresholdExpr {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |reason: String| ConfigError::Expression {
            expression: s.to_owned(),
            reason,
        };
        let pos = s
            .find(['<', '>', '=', '!'])
            .ok_or_else(|| err("missing comparison operator".into()))?;
        let (lhs, rest) = s.split_at(pos);
        let (token, operator) = Operator::TOKENS
            .iter()
            .find(|(token, _)| rest.starts_with(token))
            .copied()
            .ok_or_else(|| err(format!("unknown operator in '{rest}'")))?;
        let aggregation = lhs.trim().parse::<AggregateKind>().map_err(err)?;
        let literal = rest[token.len()..].trim();
        let limit: f64 = literal
            .parse()
            .map_err(|_| err(format!("'{literal}' is not a number")))?;
        if !limit.is_finite() {
            return Err(err(format!("'{literal}' is not a finite number")));
        }
        Ok(Self {
            aggregation,
            operator,
            limit,
            source: s.trim().to_owned(),
        })
    }
}

impl fmt::Display for ThresholdExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.aggregation, self.operator.as_str(), self.limit)
    }
}

/// Every expression configured for one selector.
#[derive(Debug, Clone, PartialEq)]
pub struct Threshold {
    pub selector: MetricSelector,
    pub expressions: Vec<ThresholdExpr>,
}

impl Threshold {
    pub fn parse<S: AsRef<str>>(selector: &str, expressions: &[S]) -> Result<Self, ConfigError> {
        let selector: MetricSelector = selector.parse()?;
        let expressions = expressions
            .iter()
            .map(|e| e.as_ref().parse())
            .collect::<Result<Vec<ThresholdExpr>, _>>()?;
        if expressions.is_empty() {
            return Err(ConfigError::Validation {
                message: format!("threshold '{selector}' has no expressions"),
            });
        }
        Ok(Self {
            selector,
            expressions,
        })
    }

    pub fn evaluate(&self, aggregate: &SampleAggregate) -> ThresholdResult {
        let series = aggregate.select(&self.selector);
        let stats = (!series.is_empty()).then(|| Stats::from(&series));
        let results = self
            .expressions
            .iter()
            .map(|expr| {
                let (observed, status) = match &stats {
                    Some(stats) => expr.check(stats),
                    None => (None, ThresholdStatus::NoData),
                };
                ExpressionResult {
                    expression: expr.source.clone(),
                    observed,
                    status,
                }
            })
            .collect();
        ThresholdResult {
            selector: self.selector.to_string(),
            samples: series.count(),
            results,
        }
    }
}

/// What to do with a threshold whose selector matched nothing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoDataPolicy {
    /// Treat missing data as a failure.
    #[default]
    Fail,
    /// Treat missing data as a pass. Still reported as `NoData`.
    Pass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdStatus {
    Pass,
    Fail,
    NoData,
}

impl ThresholdStatus {
    pub fn passed(self, policy: NoDataPolicy) -> bool {
        match self {
            Self::Pass => true,
            Self::Fail => false,
            Self::NoData => policy == NoDataPolicy::Pass,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpressionResult {
    pub expression: String,
    /// The aggregated value the expression was compared against.
    pub observed: Option<f64>,
    pub status: ThresholdStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdResult {
    pub selector: String,
    /// Samples matched by the selector.
    pub samples: u64,
    pub results: Vec<ExpressionResult>,
}

impl ThresholdResult {
    pub fn passed(&self, policy: NoDataPolicy) -> bool {
        self.results.iter().all(|r| r.status.passed(policy))
    }
}

/// Outcome of every threshold of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub policy: NoDataPolicy,
    pub thresholds: Vec<ThresholdResult>,
}

impl Evaluation {
    /// The run passes iff every expression of every threshold passes.
    pub fn passed(&self) -> bool {
        self.thresholds.iter().all(|t| t.passed(self.policy))
    }

    pub fn failures(&self) -> impl Iterator<Item = (&ThresholdResult, &ExpressionResult)> {
        self.thresholds.iter().flat_map(move |t| {
            t.results
                .iter()
                .filter(move |r| !r.status.passed(self.policy))
                .map(move |r| (t, r))
        })
    }
}

impl fmt::Display for Evaluation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for threshold in &self.thresholds {
            writeln!(f, "  {}", threshold.selector)?;
            for r in &threshold.results {
                let mark = if r.status.passed(self.policy) { '✓' } else { '✗' };
                match (r.status, r.observed) {
                    (ThresholdStatus::NoData, _) | (_, None) => {
                        writeln!(f, "  {mark} '{}' no data", r.expression)?
                    }
                    (_, Some(observed)) => {
                        writeln!(f, "  {mark} '{}' observed={observed:.4}", r.expression)?
                    }
                }
            }
        }
        Ok(())
    }
}

/// Evaluates every threshold against the merged run aggregate.
pub fn evaluate(
    thresholds: &[Threshold],
    aggregate: &SampleAggregate,
    policy: NoDataPolicy,
) -> Evaluation {
    let evaluation = Evaluation {
        policy,
        thresholds: thresholds.iter().map(|t| t.evaluate(aggregate)).collect(),
    };
    for (threshold, result) in evaluation.failures() {
        tracing::warn!(
            selector = %threshold.selector,
            expression = %result.expression,
            status = ?result.status,
            "threshold crossed"
        );
    }
    evaluation
}
