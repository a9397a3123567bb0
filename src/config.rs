use crate::error::{AppError, Result};

pub const UPSTREAM_API_URL: &str = "https://ifgames.win";
pub const PREDICTOR_URL: &str = "http://127.0.0.1:8100/forecast";

/// Background refresh interval (seconds): how often to re-pull events and re-forecast.
pub const REFRESH_INTERVAL_SECS: u64 = 300;

/// Events older than this many days are not requested from upstream.
pub const EVENT_LOOKBACK_DAYS: i64 = 7;

/// HTTP timeout for upstream and predictor calls (seconds).
pub const HTTP_TIMEOUT_SECS: u64 = 30;

/// Neutral probability for events that arrive without one.
pub const DEFAULT_PROBABILITY: f64 = 0.5;

/// Named blending presets.
///
/// `Standard` matches the aggregate-blending forecaster (0.3 feedback weight);
/// `Cautious` keeps the 0.1 weight the adjuster-style miner config shipped with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackPreset {
    Standard,
    Cautious,
}

impl FeedbackPreset {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "standard" => Some(FeedbackPreset::Standard),
            "cautious" => Some(FeedbackPreset::Cautious),
            _ => None,
        }
    }
}

impl std::fmt::Display for FeedbackPreset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedbackPreset::Standard => write!(f, "standard"),
            FeedbackPreset::Cautious => write!(f, "cautious"),
        }
    }
}

/// Everything the blender and the admission policy need to turn votes into probabilities.
#[derive(Debug, Clone, PartialEq)]
pub struct BlendConfig {
    pub use_feedback: bool,
    /// Share of the final probability taken from the feedback aggregate, in [0,1].
    pub feedback_weight: f64,
    /// Votes required before the aggregate may influence the published estimate.
    pub min_feedback_count: usize,
    /// Per-day exponential decay applied to vote weights.
    pub decay_rate: f64,
    /// Adjustment applied per admitted vote before multipliers.
    pub base_rate: f64,
    /// Upper bound on a single vote's adjustment.
    pub max_adjustment: f64,
}

impl BlendConfig {
    pub fn preset(preset: FeedbackPreset) -> Self {
        let standard = Self {
            use_feedback: true,
            feedback_weight: 0.3,
            min_feedback_count: 3,
            decay_rate: 0.1,
            base_rate: 0.1,
            max_adjustment: 0.3,
        };
        match preset {
            FeedbackPreset::Standard => standard,
            FeedbackPreset::Cautious => Self { feedback_weight: 0.1, ..standard },
        }
    }
}

impl Default for BlendConfig {
    fn default() -> Self {
        Self::preset(FeedbackPreset::Standard)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub upstream_api_url: String,
    pub predictor_url: String,
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    /// Seconds between background refresh cycles (REFRESH_INTERVAL_SECS)
    pub refresh_interval_secs: u64,
    /// Days of history requested from upstream (EVENT_LOOKBACK_DAYS)
    pub event_lookback_days: i64,
    /// Page size for upstream event listing (UPSTREAM_PAGE_SIZE)
    pub upstream_page_size: usize,
    /// Hard cap on pages fetched per refresh (UPSTREAM_MAX_PAGES)
    pub upstream_max_pages: usize,
    /// Events forecast concurrently (MAX_CONCURRENT_FORECASTS)
    pub max_concurrent_forecasts: usize,
    /// Forwarded to the base predictor (EXTREMIZE)
    pub extremize: bool,
    /// Republish probabilities upstream after refresh and feedback (PUBLISH_PREDICTIONS)
    pub publish_predictions: bool,
    pub feedback_preset: FeedbackPreset,
    pub blend: BlendConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let feedback_preset = match std::env::var("FEEDBACK_PRESET") {
            Ok(s) => FeedbackPreset::parse(&s).ok_or_else(|| {
                AppError::Config(format!("FEEDBACK_PRESET must be standard or cautious, got {s:?}"))
            })?,
            Err(_) => FeedbackPreset::Standard,
        };

        let mut blend = BlendConfig::preset(feedback_preset);
        if let Some(w) = env_parse::<f64>("FEEDBACK_WEIGHT") {
            if !(0.0..=1.0).contains(&w) {
                return Err(AppError::Config("FEEDBACK_WEIGHT must be within [0, 1]".to_string()));
            }
            blend.feedback_weight = w;
        }
        if let Some(n) = env_parse::<usize>("MIN_FEEDBACK_COUNT") {
            blend.min_feedback_count = n;
        }
        if let Some(b) = env_parse::<bool>("USE_FEEDBACK") {
            blend.use_feedback = b;
        }

        Ok(Self {
            upstream_api_url: std::env::var("UPSTREAM_API_URL")
                .unwrap_or_else(|_| UPSTREAM_API_URL.to_string()),
            predictor_url: std::env::var("PREDICTOR_URL")
                .unwrap_or_else(|_| PREDICTOR_URL.to_string()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "forecaster.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            refresh_interval_secs: env_parse("REFRESH_INTERVAL_SECS")
                .unwrap_or(REFRESH_INTERVAL_SECS),
            event_lookback_days: env_parse("EVENT_LOOKBACK_DAYS").unwrap_or(EVENT_LOOKBACK_DAYS),
            upstream_page_size: env_parse("UPSTREAM_PAGE_SIZE").unwrap_or(100),
            upstream_max_pages: env_parse("UPSTREAM_MAX_PAGES").unwrap_or(10),
            max_concurrent_forecasts: env_parse::<usize>("MAX_CONCURRENT_FORECASTS")
                .unwrap_or(4)
                .max(1),
            extremize: env_parse("EXTREMIZE").unwrap_or(true),
            publish_predictions: env_parse("PUBLISH_PREDICTIONS").unwrap_or(true),
            feedback_preset,
            blend,
        })
    }
}

/// Reads and parses an env var, treating unset and unparsable values alike.
fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_differ_only_in_feedback_weight() {
        let standard = BlendConfig::preset(FeedbackPreset::Standard);
        let cautious = BlendConfig::preset(FeedbackPreset::Cautious);
        assert!((standard.feedback_weight - 0.3).abs() < 1e-12);
        assert!((cautious.feedback_weight - 0.1).abs() < 1e-12);
        assert_eq!(
            BlendConfig { feedback_weight: 0.3, ..cautious },
            standard,
        );
        assert_eq!(standard.min_feedback_count, 3);
    }

    #[test]
    fn preset_names_parse_case_insensitively() {
        assert_eq!(FeedbackPreset::parse("Standard"), Some(FeedbackPreset::Standard));
        assert_eq!(FeedbackPreset::parse(" cautious "), Some(FeedbackPreset::Cautious));
        assert_eq!(FeedbackPreset::parse("aggressive"), None);
    }
}
