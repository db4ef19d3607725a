//! Load test options, read from JSON or TOML.
//!
//! The JSON shape mirrors a k6 `options` object:
//!
//! ```json
//! {
//!   "stages": [
//!     { "duration": "30s", "target": 100 },
//!     { "duration": "1m", "target": 100 },
//!     { "duration": "30s", "target": 0 }
//!   ],
//!   "thresholds": {
//!     "http_req_duration": ["p(99)<500"],
//!     "http_req_duration{staticAsset:yes}": ["p(99)<300"],
//!     "http_req_failed": ["rate<0.001"]
//!   },
//!   "request": { "url": "http://localhost:8881/timestamp" }
//! }
//! ```
//!
//! The same document in TOML uses `[[stages]]`, `[thresholds]` and `[request]`
//! tables. Durations are humantime strings (`"1m30s"`, `"250ms"`), a single
//! fractional component (`"1.5s"`) or a bare number of seconds. Threshold strings are parsed here, once.
use std::path::Path;
use std::time::Duration;

use indexmap::IndexMap;
use reqwest::Method;
use serde::{Deserialize, Serialize};

use crate::{
    error::ConfigError,
    executor::{RampingVusExecutor, Stage},
    metric::Tags,
    threshold::{NoDataPolicy, Threshold},
};

const DEFAULT_TICK: Duration = Duration::from_millis(100);
const DEFAULT_GRACEFUL_STOP: Duration = Duration::from_secs(30);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawStage {
    pub duration: String,
    pub target: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRequest {
    #[serde(default = "default_method")]
    pub method: String,
    pub url: String,
    pub timeout: Option<String>,
    #[serde(default)]
    pub tags: Tags,
}

fn default_method() -> String {
    "GET".to_owned()
}

/// Options exactly as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawOptions {
    pub stages: Vec<RawStage>,
    /// Selector to expressions, in declaration order.
    #[serde(default)]
    pub thresholds: IndexMap<String, Vec<String>>,
    pub request: Option<RawRequest>,
    /// Sleep between iterations of a virtual user.
    pub pause: Option<String>,
    pub graceful_stop: Option<String>,
    pub tick: Option<String>,
    #[serde(default)]
    pub no_data: NoDataPolicy,
}

/// The request every virtual user repeats.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOptions {
    pub method: Method,
    pub url: String,
    pub timeout: Duration,
    pub tags: Tags,
}

/// Validated, typed options.
#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    pub stages: Vec<Stage>,
    pub thresholds: Vec<Threshold>,
    pub request: Option<RequestOptions>,
    pub pause: Option<Duration>,
    pub graceful_stop: Duration,
    pub tick: Duration,
    pub no_data: NoDataPolicy,
}

impl Options {
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let raw: RawOptions = serde_json::from_str(content)?;
        raw.try_into()
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let raw: RawOptions = toml::from_str(content)?;
        raw.try_into()
    }

    /// Reads `path`, parsing it as TOML for a `.toml` extension and as JSON
    /// otherwise.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            source,
            path: path.display().to_string(),
        })?;
        let is_toml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
        let options = if is_toml {
            Self::from_toml(&content)?
        } else {
            Self::from_json(&content)?
        };
        tracing::debug!(
            path = %path.display(),
            stages = options.stages.len(),
            thresholds = options.thresholds.len(),
            "Loaded options"
        );
        Ok(options)
    }

    /// An executor configured from these options.
    pub fn executor(&self) -> RampingVusExecutor {
        RampingVusExecutor {
            stages: self.stages.clone(),
            tick: self.tick,
            graceful_stop: self.graceful_stop,
            pause: self.pause,
        }
    }
}

impl TryFrom<RawOptions> for Options {
    type Error = ConfigError;

    fn try_from(raw: RawOptions) -> Result<Self, Self::Error> {
        if raw.stages.is_empty() {
            return Err(ConfigError::Validation {
                message: "at least one stage is required".to_owned(),
            });
        }
        let stages = raw
            .stages
            .iter()
            .map(|s| Ok(Stage::new(parse_duration(&s.duration)?, s.target)))
            .collect::<Result<Vec<_>, ConfigError>>()?;

        let thresholds = raw
            .thresholds
            .iter()
            .map(|(selector, exprs)| Threshold::parse(selector, exprs))
            .collect::<Result<Vec<_>, _>>()?;

        let request = raw.request.map(RequestOptions::try_from).transpose()?;

        let tick = parse_optional(raw.tick.as_deref())?.unwrap_or(DEFAULT_TICK);
        if tick.is_zero() {
            return Err(ConfigError::Validation {
                message: "tick must be greater than zero".to_owned(),
            });
        }

        Ok(Self {
            stages,
            thresholds,
            request,
            pause: parse_optional(raw.pause.as_deref())?.filter(|p| !p.is_zero()),
            graceful_stop: parse_optional(raw.graceful_stop.as_deref())?
                .unwrap_or(DEFAULT_GRACEFUL_STOP),
            tick,
            no_data: raw.no_data,
        })
    }
}

impl TryFrom<RawRequest> for RequestOptions {
    type Error = ConfigError;

    fn try_from(raw: RawRequest) -> Result<Self, Self::Error> {
        let method = Method::from_bytes(raw.method.to_ascii_uppercase().as_bytes()).map_err(
            |_| ConfigError::Validation {
                message: format!("invalid HTTP method '{}'", raw.method),
            },
        )?;
        if raw.url.trim().is_empty() {
            return Err(ConfigError::Validation {
                message: "request url must not be empty".to_owned(),
            });
        }
        Ok(Self {
            method,
            url: raw.url,
            timeout: parse_optional(raw.timeout.as_deref())?.unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            tags: raw.tags,
        })
    }
}

fn parse_optional(input: Option<&str>) -> Result<Option<Duration>, ConfigError> {
    input.map(parse_duration).transpose()
}

/// Parses humantime strings (`"1m30s"`, `"250ms"`), a single fractional
/// component (`"1.5s"`) or a bare number of seconds.
pub fn parse_duration(input: &str) -> Result<Duration, ConfigError> {
    let err = |reason: String| ConfigError::Duration {
        input: input.to_owned(),
        reason,
    };
    let s = input.trim();
    if let Ok(secs) = s.parse::<f64>() {
        return Duration::try_from_secs_f64(secs).map_err(|e| err(e.to_string()));
    }
    humantime::parse_duration(s)
        .or_else(|e| fractional_duration(s).ok_or_else(|| err(e.to_string())))
}

/// `<float><unit>`, which humantime does not accept.
fn fractional_duration(s: &str) -> Option<Duration> {
    let (value, unit) = s.split_at(s.find(|c: char| c.is_ascii_alphabetic())?);
    let value: f64 = value.parse().ok()?;
    let scale = match unit {
        "ms" => 1e-3,
        "s" => 1.0,
        "m" => 60.0,
        "h" => 3600.0,
        _ => return None,
    };
    Duration::try_from_secs_f64(value * scale).ok()
}
