//! Pipeline and model configuration
//!
//! Defaults carry the production limits. `from_env` overrides them from
//! `DILIGENCE_*` variables (dotenvy loads `.env` in the binary before this
//! runs).

use crate::ai::retry::RetryPolicy;
use crate::error::PipelineError;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Per-entry uncompressed size ceiling (25 MiB)
pub const MAX_FILE_SIZE_BYTES: u64 = 25 * 1024 * 1024;

/// Maximum number of entries admitted from one archive
pub const MAX_FILES: usize = 50;

/// Extracted text ceiling in characters
pub const MAX_TEXT_CHARS: usize = 15_000;

/// Characters of extracted text handed to the classifier
pub const CLASSIFIER_PREFIX_CHARS: usize = 300;

/// Row ceiling for spreadsheets (across all sheets) and CSV files
pub const MAX_TABLE_ROWS: usize = 200;

/// Simultaneous per-file pipelines
pub const MAX_CONCURRENT_FILES: usize = 10;

/// Item bounds for a finding's lists
pub const MAX_FACTS: usize = 5;
pub const MAX_RED_FLAGS: usize = 5;
pub const MAX_FINDING_ITEM_CHARS: usize = 300;

/// Word window the narrative summary must land in
pub const NARRATIVE_MIN_WORDS: usize = 300;
pub const NARRATIVE_MAX_WORDS: usize = 400;

/// Word ceiling applied again when rendering the summary
pub const REPORT_SUMMARY_MAX_WORDS: usize = 550;

/// Limits and budgets for one pipeline run
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_file_size_bytes: u64,
    pub max_files: usize,
    pub max_text_chars: usize,
    pub max_table_rows: usize,
    pub max_concurrent_files: usize,
    /// Wall-clock budget for the whole run, measured from unpack start
    pub run_timeout: Duration,
    /// Outer retry policy wrapped around each per-document analysis
    pub retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_file_size_bytes: MAX_FILE_SIZE_BYTES,
            max_files: MAX_FILES,
            max_text_chars: MAX_TEXT_CHARS,
            max_table_rows: MAX_TABLE_ROWS,
            max_concurrent_files: MAX_CONCURRENT_FILES,
            run_timeout: Duration::from_secs(180),
            retry: RetryPolicy::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, PipelineError> {
        let defaults = Self::default();
        let retry = RetryPolicy {
            max_attempts: env_or("DILIGENCE_RETRY_ATTEMPTS", defaults.retry.max_attempts)?,
            base_delay: env_millis_or("DILIGENCE_RETRY_BASE_MS", defaults.retry.base_delay)?,
            max_delay: env_millis_or("DILIGENCE_RETRY_MAX_MS", defaults.retry.max_delay)?,
            ..defaults.retry.clone()
        };

        let config = Self {
            max_file_size_bytes: env_or("DILIGENCE_MAX_FILE_BYTES", defaults.max_file_size_bytes)?,
            max_files: env_or("DILIGENCE_MAX_FILES", defaults.max_files)?,
            max_text_chars: env_or("DILIGENCE_MAX_TEXT_CHARS", defaults.max_text_chars)?,
            max_table_rows: env_or("DILIGENCE_MAX_TABLE_ROWS", defaults.max_table_rows)?,
            max_concurrent_files: env_or("DILIGENCE_CONCURRENCY", defaults.max_concurrent_files)?,
            run_timeout: env_secs_or("DILIGENCE_RUN_TIMEOUT_SECS", defaults.run_timeout)?,
            retry,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.max_concurrent_files == 0 {
            return Err(PipelineError::Configuration(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.max_files == 0 {
            return Err(PipelineError::Configuration(
                "file limit must be at least 1".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(PipelineError::Configuration(
                "retry attempts must be at least 1".to_string(),
            ));
        }
        // Ellipsis needs room
        if self.max_text_chars < 4 {
            return Err(PipelineError::Configuration(
                "text ceiling must be at least 4 characters".to_string(),
            ));
        }
        Ok(())
    }
}

/// Language-model settings
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// API key; resolved through `ai::credentials` when built from env
    pub api_key: String,

    /// Base URL for an OpenAI-compatible chat completions API
    pub base_url: String,

    pub model: String,

    /// Output budget for per-document analysis
    pub analysis_max_tokens: u32,

    /// Output budget for the narrative summary
    pub narrative_max_tokens: u32,

    pub analysis_timeout: Duration,
    pub narrative_timeout: Duration,

    /// Directory with prompt overrides; compiled-in templates otherwise
    pub prompt_dir: Option<PathBuf>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com".to_string(),
            model: "gpt-4o-mini".to_string(),
            analysis_max_tokens: 700,
            narrative_max_tokens: 700,
            analysis_timeout: Duration::from_secs(30),
            narrative_timeout: Duration::from_secs(20),
            prompt_dir: None,
        }
    }
}

impl LlmConfig {
    /// Build from the environment. A missing credential is fatal here and
    /// never retried.
    pub fn from_env() -> Result<Self, PipelineError> {
        let defaults = Self::default();
        let api_key = crate::ai::credentials::resolve_api_key()?;

        Ok(Self {
            api_key,
            base_url: std::env::var("DILIGENCE_BASE_URL").unwrap_or(defaults.base_url),
            model: std::env::var("DILIGENCE_MODEL").unwrap_or(defaults.model),
            analysis_max_tokens: env_or("DILIGENCE_ANALYSIS_MAX_TOKENS", defaults.analysis_max_tokens)?,
            narrative_max_tokens: env_or(
                "DILIGENCE_NARRATIVE_MAX_TOKENS",
                defaults.narrative_max_tokens,
            )?,
            analysis_timeout: env_secs_or("DILIGENCE_ANALYSIS_TIMEOUT_SECS", defaults.analysis_timeout)?,
            narrative_timeout: env_secs_or(
                "DILIGENCE_NARRATIVE_TIMEOUT_SECS",
                defaults.narrative_timeout,
            )?,
            prompt_dir: std::env::var("DILIGENCE_PROMPT_DIR").ok().map(PathBuf::from),
        })
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T, PipelineError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| PipelineError::Configuration(format!("{}={:?}: {}", key, raw, e))),
        _ => Ok(default),
    }
}

fn env_secs_or(key: &str, default: Duration) -> Result<Duration, PipelineError> {
    env_or(key, default.as_secs()).map(Duration::from_secs)
}

fn env_millis_or(key: &str, default: Duration) -> Result<Duration, PipelineError> {
    env_or(key, default.as_millis() as u64).map(Duration::from_millis)
}
