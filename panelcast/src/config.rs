//! Pipeline configuration.
//!
//! Every field has a default; the environment overrides them. Values are
//! read through a lookup function so tests can supply their own variables.
//!
//! | Env var                            | Default                      |
//! |------------------------------------|------------------------------|
//! | `PANELCAST_API_KEY`                | `OPENAI_API_KEY`, else unset |
//! | `PANELCAST_API_BASE`               | `https://api.openai.com/v1`  |
//! | `PANELCAST_MODEL`                  | `gpt-4o`                     |
//! | `PANELCAST_TARGET_DURATION`        | `75`                         |
//! | `PANELCAST_CALL_TIMEOUT_SECS`      | `120`                        |
//! | `PANELCAST_<STAGE>_TIMEOUT_SECS`   | call timeout                 |
//! | `PANELCAST_<STAGE>_DEADLINE_SECS`  | `600`                        |
//! | `PANELCAST_MAX_RETRIES`            | `2`                          |
//! | `PANELCAST_MAX_CONCURRENT_CALLS`   | `4`                          |
//! | `PANELCAST_CALLS_PER_MINUTE`       | `60`                         |
//! | `PANELCAST_ARTIFACT_DIR`           | `panelcast-runs`             |
//! | `PANELCAST_WORDS_PER_MINUTE`       | `175`                        |
//! | `PANELCAST_DURATION_TOLERANCE`     | `0.2`                        |
//! | `PANELCAST_MAX_SAMPLED_PAGES`      | `4`                          |
//! | `PANELCAST_LOG_FORMAT`             | `text`                       |

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::archive::SamplingPolicy;
use crate::contracts::TimingPolicy;
use crate::core::{StageName, DEFAULT_TARGET_DURATION_SECS};
use crate::inference::GateConfig;
#[cfg(feature = "http")]
use crate::inference::OpenAiConfig;
use crate::pipeline::{BackoffPolicy, StageSpec, DEFAULT_MAX_RETRIES};

const ENV_PREFIX: &str = "PANELCAST_";

/// Default OpenAI-compatible endpoint.
pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// Default model name.
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Configuration failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A variable is set but cannot be parsed.
    #[error("invalid value '{value}' for {key}: {message}")]
    Invalid {
        /// Variable name.
        key: String,
        /// Raw value.
        value: String,
        /// Parser message.
        message: String,
    },

    /// Values parse but are inconsistent.
    #[error("invalid configuration: {0}")]
    Inconsistent(String),
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("expected 'text' or 'json', got '{other}'")),
        }
    }
}

/// Per-stage timeout overrides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageOverrides {
    /// Per-call timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_timeout_secs: Option<u64>,
    /// Cumulative stage deadline in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_secs: Option<u64>,
}

/// Everything the coordinator and the CLI need to know.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// API key for the inference endpoint.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    /// Base URL of the inference endpoint.
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Model name.
    #[serde(default = "default_model")]
    pub model: String,
    /// Target video length.
    #[serde(default = "default_target_duration_secs")]
    pub target_duration_secs: u32,
    /// Default per-call timeout.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    /// Default cumulative stage deadline.
    #[serde(default = "default_stage_deadline_secs")]
    pub stage_deadline_secs: u64,
    /// Per-stage overrides.
    #[serde(default)]
    pub stage_overrides: BTreeMap<StageName, StageOverrides>,
    /// Retries after the first attempt for transient errors.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Backoff between retries.
    #[serde(default)]
    pub backoff: BackoffPolicy,
    /// Shared admission limits.
    #[serde(default)]
    pub gate: GateConfig,
    /// Narration pace and tolerance.
    #[serde(default)]
    pub timing: TimingPolicy,
    /// Page sampling.
    #[serde(default)]
    pub sampling: SamplingPolicy,
    /// Root directory of the filesystem store.
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,
    /// Log output format.
    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_target_duration_secs() -> u32 {
    DEFAULT_TARGET_DURATION_SECS
}

fn default_call_timeout_secs() -> u64 {
    120
}

fn default_stage_deadline_secs() -> u64 {
    600
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from("panelcast-runs")
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: default_api_base(),
            model: default_model(),
            target_duration_secs: default_target_duration_secs(),
            call_timeout_secs: default_call_timeout_secs(),
            stage_deadline_secs: default_stage_deadline_secs(),
            stage_overrides: BTreeMap::new(),
            max_retries: default_max_retries(),
            backoff: BackoffPolicy::default(),
            gate: GateConfig::default(),
            timing: TimingPolicy::default(),
            sampling: SamplingPolicy::default(),
            artifact_dir: default_artifact_dir(),
            log_format: LogFormat::default(),
        }
    }
}

fn parse_var<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
        message: e.to_string(),
    })
}

impl PipelineConfig {
    /// Loads configuration from the process environment.
    ///
    /// Call `dotenvy::dotenv()` first to honour a `.env` file.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            let key = format!("{ENV_PREFIX}{name}");
            lookup(&key)
                .filter(|v| !v.trim().is_empty())
                .map(|v| (key, v))
        };
        let mut config = Self::default();

        config.api_key = var("API_KEY")
            .map(|(_, v)| v)
            .or_else(|| lookup("OPENAI_API_KEY").filter(|v| !v.trim().is_empty()));
        if let Some((_, v)) = var("API_BASE") {
            config.api_base = v.trim().trim_end_matches('/').to_string();
        }
        if let Some((_, v)) = var("MODEL") {
            config.model = v.trim().to_string();
        }
        if let Some((k, v)) = var("TARGET_DURATION") {
            config.target_duration_secs = parse_var(&k, &v)?;
        }
        if let Some((k, v)) = var("CALL_TIMEOUT_SECS") {
            config.call_timeout_secs = parse_var(&k, &v)?;
        }
        for stage in StageName::ALL {
            let upper = stage.as_str().to_ascii_uppercase();
            let mut overrides = StageOverrides::default();
            if let Some((k, v)) = var(&format!("{upper}_TIMEOUT_SECS")) {
                overrides.call_timeout_secs = Some(parse_var(&k, &v)?);
            }
            if let Some((k, v)) = var(&format!("{upper}_DEADLINE_SECS")) {
                overrides.deadline_secs = Some(parse_var(&k, &v)?);
            }
            if overrides != StageOverrides::default() {
                config.stage_overrides.insert(stage, overrides);
            }
        }
        if let Some((k, v)) = var("MAX_RETRIES") {
            config.max_retries = parse_var(&k, &v)?;
        }
        if let Some((k, v)) = var("MAX_CONCURRENT_CALLS") {
            config.gate.max_concurrent = parse_var(&k, &v)?;
        }
        if let Some((k, v)) = var("CALLS_PER_MINUTE") {
            config.gate.calls_per_interval = parse_var(&k, &v)?;
            config.gate.interval = Duration::from_secs(60);
        }
        if let Some((_, v)) = var("ARTIFACT_DIR") {
            config.artifact_dir = PathBuf::from(v.trim());
        }
        if let Some((k, v)) = var("WORDS_PER_MINUTE") {
            config.timing.words_per_minute = parse_var(&k, &v)?;
        }
        if let Some((k, v)) = var("DURATION_TOLERANCE") {
            config.timing.tolerance = parse_var(&k, &v)?;
        }
        if let Some((k, v)) = var("MAX_SAMPLED_PAGES") {
            config.sampling.max_pages = parse_var(&k, &v)?;
        }
        if let Some((k, v)) = var("LOG_FORMAT") {
            config.log_format = parse_var(&k, &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Rejects values the pipeline cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |msg: &str| Err(ConfigError::Inconsistent(msg.to_string()));
        if self.target_duration_secs == 0 {
            return fail("target duration must be positive");
        }
        if self.call_timeout_secs == 0 || self.stage_deadline_secs == 0 {
            return fail("timeouts must be positive");
        }
        if self
            .stage_overrides
            .values()
            .any(|o| o.call_timeout_secs == Some(0) || o.deadline_secs == Some(0))
        {
            return fail("stage timeouts must be positive");
        }
        if self.gate.max_concurrent == 0 || self.gate.calls_per_interval == 0 {
            return fail("gate limits must be positive");
        }
        if !self.timing.words_per_minute.is_finite() || self.timing.words_per_minute <= 0.0 {
            return fail("words per minute must be positive");
        }
        if !(0.0..1.0).contains(&self.timing.tolerance) {
            return fail("duration tolerance must be in [0, 1)");
        }
        if self.sampling.max_pages == 0 {
            return fail("at least one page must be sampled");
        }
        Ok(())
    }

    /// Returns a copy with a different target duration.
    #[must_use]
    pub fn with_target_duration(mut self, secs: u32) -> Self {
        self.target_duration_secs = secs;
        self
    }

    /// Returns a copy with an explicit API key.
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Returns a copy with a different store root.
    #[must_use]
    pub fn with_artifact_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifact_dir = dir.into();
        self
    }

    /// Timeout and retry limits for a stage.
    #[must_use]
    pub fn stage_spec(&self, stage: StageName) -> StageSpec {
        let overrides = self
            .stage_overrides
            .get(&stage)
            .copied()
            .unwrap_or_default();
        StageSpec::new(stage)
            .with_call_timeout(Duration::from_secs(
                overrides.call_timeout_secs.unwrap_or(self.call_timeout_secs),
            ))
            .with_stage_deadline(Duration::from_secs(
                overrides.deadline_secs.unwrap_or(self.stage_deadline_secs),
            ))
            .with_max_retries(self.max_retries)
            .with_backoff(self.backoff)
    }

    /// Connection settings for the HTTP inference client.
    ///
    /// The transport timeout is the longest per-call timeout of any stage.
    #[cfg(feature = "http")]
    pub fn openai_config(&self) -> Result<OpenAiConfig, ConfigError> {
        let key = self.api_key.clone().ok_or_else(|| {
            ConfigError::Inconsistent(
                "no API key: set PANELCAST_API_KEY or OPENAI_API_KEY".to_string(),
            )
        })?;
        let longest_call = StageName::ALL
            .into_iter()
            .map(|s| self.stage_spec(s).call_timeout)
            .max()
            .unwrap_or(Duration::from_secs(self.call_timeout_secs));
        Ok(OpenAiConfig::new(key)
            .with_api_base(&self.api_base)
            .with_model(&self.model)
            .with_request_timeout(longest_call))
    }
}
