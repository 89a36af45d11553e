//! Runtime settings loaded from environment variables.
//!
//! Secrets and tunables live here; everything describing the researched
//! concept lives in [`crate::concept::ConceptConfig`].

use crate::error::ConfigError;
use crate::retry::RetryConfig;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

pub const DEFAULT_OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Bounds applied while collecting threads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionLimits {
    pub post_limit_per_query: usize,
    pub comment_limit_per_post: usize,
    pub max_replies_per_comment: usize,
    pub reply_fetch_depth: u32,
    pub top_posts_count: usize,
    /// Upper bound on `morechildren` expansions per post. Zero disables them.
    pub more_comments_limit: usize,
    /// Time filters for top listings. Empty disables top listings.
    pub top_time_filters: Vec<String>,
}

impl Default for CollectionLimits {
    fn default() -> Self {
        Self {
            post_limit_per_query: 150,
            comment_limit_per_post: 50,
            max_replies_per_comment: 10,
            reply_fetch_depth: 1,
            top_posts_count: 100,
            more_comments_limit: 10,
            top_time_filters: vec!["all".to_string(), "year".to_string()],
        }
    }
}

const TIME_FILTERS: [&str; 6] = ["hour", "day", "week", "month", "year", "all"];

impl CollectionLimits {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("POST_LIMIT_PER_QUERY", self.post_limit_per_query),
            ("COMMENT_LIMIT_PER_POST", self.comment_limit_per_post),
            ("MAX_REPLIES_PER_COMMENT", self.max_replies_per_comment),
            ("REPLY_FETCH_DEPTH", self.reply_fetch_depth as usize),
            ("TOP_POSTS_COUNT", self.top_posts_count),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::invalid_value(field, value));
            }
        }
        for filter in &self.top_time_filters {
            if !TIME_FILTERS.contains(&filter.as_str()) {
                return Err(ConfigError::invalid_value("TOP_TIME_FILTERS", filter));
            }
        }
        Ok(())
    }
}

/// Pacing, timeout and retry policy of one outbound client.
#[derive(Debug, Clone, PartialEq)]
pub struct PacingConfig {
    pub min_interval: Duration,
    pub timeout: Duration,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionSettings {
    pub filter_model: String,
    pub analysis_model: String,
    pub max_comments_per_post: usize,
    pub max_tokens_for_analysis: usize,
    pub progress_save_interval: usize,
    /// Attempts per LLM step when the reply cannot be parsed.
    pub max_attempts: u32,
    /// Backoff between unparsable replies.
    pub retry: RetryConfig,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            filter_model: "mistralai/mistral-nemo".to_string(),
            analysis_model: "gpt-4o-mini".to_string(),
            max_comments_per_post: 30,
            max_tokens_for_analysis: 16000,
            progress_save_interval: 5,
            max_attempts: 3,
            retry: RetryConfig::llm(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisSettings {
    pub synthesis_model: String,
    pub clustering_min_findings: usize,
    pub max_examples_per_theme: usize,
}

impl Default for SynthesisSettings {
    fn default() -> Self {
        Self {
            synthesis_model: "gpt-4o-mini".to_string(),
            clustering_min_findings: 3,
            max_examples_per_theme: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedditCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub user_agent: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRouterSettings {
    pub api_key: String,
    pub api_url: String,
    pub app_name: String,
}

#[derive(Debug, Clone)]
pub struct Settings {
    reddit: Option<RedditCredentials>,
    openrouter_api_key: Option<String>,
    pub openrouter_api_url: String,
    pub collection: CollectionLimits,
    pub reddit_pacing: PacingConfig,
    pub llm_pacing: PacingConfig,
    pub extraction: ExtractionSettings,
    pub synthesis: SynthesisSettings,
    pub output_dir: PathBuf,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let settings = Self::from_lookup(|key| std::env::var(key).ok())?;
        settings.log_summary();
        Ok(settings)
    }

    /// Builds settings from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let reddit = match (
            get("REDDIT_CLIENT_ID"),
            get("REDDIT_CLIENT_SECRET"),
            get("REDDIT_USER_AGENT"),
        ) {
            (Some(client_id), Some(client_secret), Some(user_agent)) => Some(RedditCredentials {
                client_id,
                client_secret,
                user_agent,
            }),
            _ => None,
        };

        let openrouter_api_url =
            get("OPENROUTER_API_URL").unwrap_or_else(|| DEFAULT_OPENROUTER_API_URL.to_string());
        url::Url::parse(&openrouter_api_url)
            .map_err(|e| ConfigError::invalid_value("OPENROUTER_API_URL", e))?;

        let defaults = CollectionLimits::default();
        let top_time_filters = match lookup("TOP_TIME_FILTERS") {
            Some(raw) => raw
                .split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
            None => defaults.top_time_filters.clone(),
        };
        let collection = CollectionLimits {
            post_limit_per_query: parse_or(&get, "POST_LIMIT_PER_QUERY", defaults.post_limit_per_query)?,
            comment_limit_per_post: parse_or(&get, "COMMENT_LIMIT_PER_POST", defaults.comment_limit_per_post)?,
            max_replies_per_comment: parse_or(&get, "MAX_REPLIES_PER_COMMENT", defaults.max_replies_per_comment)?,
            reply_fetch_depth: parse_or(&get, "REPLY_FETCH_DEPTH", defaults.reply_fetch_depth)?,
            top_posts_count: parse_or(&get, "TOP_POSTS_COUNT", defaults.top_posts_count)?,
            more_comments_limit: parse_or(&get, "REDDIT_MORE_COMMENTS_LIMIT", defaults.more_comments_limit)?,
            top_time_filters,
        };

        let api_timeout = parse_seconds(&get, "API_TIMEOUT", 180.0)?;
        if api_timeout.is_zero() {
            return Err(ConfigError::invalid_value("API_TIMEOUT", 0));
        }
        let reddit_pacing = PacingConfig {
            min_interval: parse_seconds(&get, "REDDIT_REQUEST_DELAY", 0.25)?,
            timeout: api_timeout,
            retry: RetryConfig::reddit(),
        };
        let llm_pacing = PacingConfig {
            min_interval: parse_seconds(&get, "RATE_LIMIT_DELAY", 0.5)?,
            timeout: api_timeout,
            retry: RetryConfig::llm(),
        };

        let extraction_defaults = ExtractionSettings::default();
        let extraction = ExtractionSettings {
            filter_model: get("ANALYSIS_FILTER_MODEL").unwrap_or(extraction_defaults.filter_model),
            analysis_model: get("ANALYSIS_MODEL").unwrap_or(extraction_defaults.analysis_model),
            max_comments_per_post: parse_or(&get, "MAX_COMMENTS_PER_POST", extraction_defaults.max_comments_per_post)?,
            max_tokens_for_analysis: parse_or(&get, "MAX_TOKENS_FOR_ANALYSIS", extraction_defaults.max_tokens_for_analysis)?,
            progress_save_interval: parse_or(&get, "PROGRESS_SAVE_INTERVAL", extraction_defaults.progress_save_interval)?
                .max(1),
            max_attempts: parse_or(&get, "EXTRACTION_MAX_ATTEMPTS", extraction_defaults.max_attempts)?,
            retry: extraction_defaults.retry,
        };
        if extraction.max_attempts == 0 {
            return Err(ConfigError::invalid_value("EXTRACTION_MAX_ATTEMPTS", 0));
        }

        let synthesis_defaults = SynthesisSettings::default();
        let synthesis = SynthesisSettings {
            synthesis_model: get("SYNTHESIS_MODEL").unwrap_or(synthesis_defaults.synthesis_model),
            clustering_min_findings: parse_or(&get, "CLUSTERING_MIN_FINDINGS", synthesis_defaults.clustering_min_findings)?,
            max_examples_per_theme: synthesis_defaults.max_examples_per_theme,
        };

        Ok(Self {
            reddit,
            openrouter_api_key: get("OPENROUTER_API_KEY"),
            openrouter_api_url,
            collection,
            reddit_pacing,
            llm_pacing,
            extraction,
            synthesis,
            output_dir: get("OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("results")),
        })
    }

    /// Reddit credentials, required only by the fetch step.
    pub fn require_reddit(&self) -> Result<RedditCredentials, ConfigError> {
        self.reddit.clone().ok_or_else(|| {
            let missing = ["REDDIT_CLIENT_ID", "REDDIT_CLIENT_SECRET", "REDDIT_USER_AGENT"].join(", ");
            ConfigError::MissingEnvironmentVariable { var_name: missing }
        })
    }

    /// OpenRouter settings, required by the analyze and synthesize steps.
    pub fn require_openrouter(&self) -> Result<OpenRouterSettings, ConfigError> {
        let api_key = self
            .openrouter_api_key
            .clone()
            .ok_or_else(|| ConfigError::MissingEnvironmentVariable {
                var_name: "OPENROUTER_API_KEY".to_string(),
            })?;
        Ok(OpenRouterSettings {
            api_key,
            api_url: self.openrouter_api_url.clone(),
            app_name: "threadscope".to_string(),
        })
    }

    fn log_summary(&self) {
        fn preview(value: Option<&str>) -> String {
            match value {
                Some(v) => {
                    let n = v.char_indices().nth(4).map(|(i, _)| i).unwrap_or(v.len());
                    format!("{}...({} chars)", &v[..n], v.chars().count())
                }
                None => "<not set>".to_string(),
            }
        }

        info!("Settings loaded:");
        info!(
            "  REDDIT_CLIENT_ID: {}",
            preview(self.reddit.as_ref().map(|r| r.client_id.as_str()))
        );
        info!(
            "  OPENROUTER_API_KEY: {}",
            preview(self.openrouter_api_key.as_deref())
        );
        info!(
            "  models: filter={}, analysis={}, synthesis={}",
            self.extraction.filter_model, self.extraction.analysis_model, self.synthesis.synthesis_model
        );
        info!("  output dir: {}", self.output_dir.display());
    }
}

fn parse_or<G, T>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    G: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::invalid_value(key, raw)),
        None => Ok(default),
    }
}

fn parse_seconds<G>(get: &G, key: &str, default: f64) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let seconds: f64 = parse_or(get, key, default)?;
    if seconds < 0.0 {
        return Err(ConfigError::invalid_value(key, seconds));
    }
    Duration::try_from_secs_f64(seconds).map_err(|_| ConfigError::invalid_value(key, seconds))
}
