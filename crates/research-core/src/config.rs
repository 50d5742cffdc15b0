//! Engine configuration, loaded from the environment with explicit defaults
//! matching the configuration surface: `maxSupervisorIterations`,
//! `maxSubResearcherIterations`, `maxConcurrentResearchers`, `maxTokens`,
//! `foldThreshold`, `summaryLevels`, `workingMemorySize`, `workerTimeout`,
//! `requestTimeout`, plus the ambient operational knobs a running instance
//! needs (event store path, log level/format, LLM provider selection).

use crate::error::ResearchError;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub max_supervisor_iterations: u32,
    pub max_sub_researcher_iterations: u32,
    pub max_concurrent_researchers: usize,
    pub max_tokens: usize,
    pub fold_threshold: f64,
    pub summary_levels: usize,
    pub working_memory_size: usize,
    pub worker_timeout: Duration,
    pub request_timeout: Duration,

    pub event_store_path: String,
    pub log_level: String,
    pub log_format: LogFormat,
    pub llm_provider: String,
    pub llm_model: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = ResearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "compact" | "" => Ok(LogFormat::Compact),
            other => Err(ResearchError::Configuration(format!(
                "unknown LOG_FORMAT '{other}', expected 'compact' or 'json'"
            ))),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_supervisor_iterations: 15,
            max_sub_researcher_iterations: 5,
            max_concurrent_researchers: 3,
            max_tokens: 40_000,
            fold_threshold: 0.75,
            summary_levels: 3,
            working_memory_size: 5,
            worker_timeout: Duration::from_secs(120),
            request_timeout: Duration::from_secs(60),
            event_store_path: "research_engine.sqlite".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Compact,
            llm_provider: "openai".to_string(),
            llm_model: "gpt-4o-mini".to_string(),
        }
    }
}

fn env_or_default<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ResearchError> {
    match env::var(key) {
        Ok(v) if !v.is_empty() => v
            .parse::<T>()
            .map_err(|_| ResearchError::Configuration(format!("invalid value for {key}: '{v}'"))),
        _ => Ok(default),
    }
}

fn env_string_or_default(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

impl EngineConfig {
    /// Loads configuration from the environment, falling back to the
    /// defaults listed in the configuration surface for anything unset.
    pub fn from_env() -> Result<Self, ResearchError> {
        let defaults = EngineConfig::default();

        let worker_timeout_secs: u64 = env_or_default(
            "WORKER_TIMEOUT_SECS",
            defaults.worker_timeout.as_secs(),
        )?;
        let request_timeout_secs: u64 = env_or_default(
            "REQUEST_TIMEOUT_SECS",
            defaults.request_timeout.as_secs(),
        )?;

        let config = EngineConfig {
            max_supervisor_iterations: env_or_default(
                "MAX_SUPERVISOR_ITERATIONS",
                defaults.max_supervisor_iterations,
            )?,
            max_sub_researcher_iterations: env_or_default(
                "MAX_SUB_RESEARCHER_ITERATIONS",
                defaults.max_sub_researcher_iterations,
            )?,
            max_concurrent_researchers: env_or_default(
                "MAX_CONCURRENT_RESEARCHERS",
                defaults.max_concurrent_researchers,
            )?,
            max_tokens: env_or_default("MAX_TOKENS", defaults.max_tokens)?,
            fold_threshold: env_or_default("FOLD_THRESHOLD", defaults.fold_threshold)?,
            summary_levels: env_or_default("SUMMARY_LEVELS", defaults.summary_levels)?,
            working_memory_size: env_or_default(
                "WORKING_MEMORY_SIZE",
                defaults.working_memory_size,
            )?,
            worker_timeout: Duration::from_secs(worker_timeout_secs),
            request_timeout: Duration::from_secs(request_timeout_secs),
            event_store_path: env_string_or_default(
                "EVENT_STORE_PATH",
                &defaults.event_store_path,
            ),
            log_level: env_string_or_default("LOG_LEVEL", &defaults.log_level),
            log_format: env_string_or_default("LOG_FORMAT", "compact").parse()?,
            llm_provider: env_string_or_default("LLM_PROVIDER", &defaults.llm_provider),
            llm_model: env_string_or_default("LLM_MODEL", &defaults.llm_model),
        };

        config.validate()?;
        Ok(config)
    }

    /// Enforces cross-field business rules beyond individual parseability.
    pub fn validate(&self) -> Result<(), ResearchError> {
        if self.max_concurrent_researchers == 0 {
            return Err(ResearchError::Configuration(
                "max_concurrent_researchers must be >= 1".into(),
            ));
        }
        if self.summary_levels == 0 {
            return Err(ResearchError::Configuration(
                "summary_levels must be >= 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.fold_threshold) || self.fold_threshold == 0.0 {
            return Err(ResearchError::Configuration(
                "fold_threshold must be in (0.0, 1.0]".into(),
            ));
        }
        if self.max_supervisor_iterations == 0 {
            return Err(ResearchError::Configuration(
                "max_supervisor_iterations must be >= 1".into(),
            ));
        }
        if self.max_sub_researcher_iterations == 0 {
            return Err(ResearchError::Configuration(
                "max_sub_researcher_iterations must be >= 1".into(),
            ));
        }
        Ok(())
    }

    /// `true` iff a session should fold given the current token count,
    /// matching `ShouldFold`'s contract (`max_tokens == 0` disables folding).
    pub fn should_fold(&self, current_tokens: usize) -> bool {
        self.max_tokens > 0
            && (current_tokens as f64) >= (self.max_tokens as f64) * self.fold_threshold
    }
}
