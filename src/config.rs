//! Validated pipeline configuration.
//!
//! Construction is the validation boundary: a value that reaches the
//! forwarding or replay pipeline has already been checked, so the
//! pipelines themselves never re-validate.

use std::path::PathBuf;

/// Bounded forward queue capacity.
pub const MAX_QUEUE_SIZE: usize = 1000;

/// Default total delivery attempts per event.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default maximum concurrent forward deliveries.
pub const DEFAULT_FORWARD_CONCURRENCY: usize = 5;

/// Default replay rate limit, requests per second.
pub const DEFAULT_MAX_RPS: f64 = 100.0;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

// ---------------------------------------------------------------------------
// ForwardConfig
// ---------------------------------------------------------------------------

/// Configuration for the live forwarding pipeline.
#[derive(Debug, Clone)]
pub struct ForwardConfig {
    /// Literal downstream URL every captured event is re-sent to.
    pub url: String,
    /// Total delivery attempts per event (first try included).
    pub max_retries: u32,
    /// Maximum in-flight deliveries.
    pub concurrency: usize,
}

impl ForwardConfig {
    pub fn new(url: String, max_retries: u32, concurrency: usize) -> Result<Self, ConfigError> {
        if url.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "forward URL must not be empty".to_owned(),
            ));
        }
        if max_retries == 0 {
            return Err(ConfigError::InvalidValue(
                "forward retries must be at least 1".to_owned(),
            ));
        }
        if concurrency == 0 {
            return Err(ConfigError::InvalidValue(
                "forward concurrency must be at least 1".to_owned(),
            ));
        }
        Ok(ForwardConfig {
            url,
            max_retries,
            concurrency,
        })
    }
}

// ---------------------------------------------------------------------------
// ReplayConfig
// ---------------------------------------------------------------------------

/// Configuration for one replay run.
///
/// Timing mode selection mirrors the CLI: `fixed_delay > 0` wins, then
/// `replay_once`, otherwise as-fast-as-possible (rate limit only).
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// NDJSON source, one Event Record per line.
    pub events_file: PathBuf,
    /// Target base URL; `None` means dry run (timing only, no sends).
    pub target_url: Option<String>,
    /// Playback rate multiplier for original-timing mode.
    pub rate: f64,
    /// Fixed inter-event delay in seconds; 0 disables the mode.
    pub fixed_delay: f64,
    /// Preserve the recorded inter-event gaps.
    pub replay_once: bool,
    /// Rate limit applied in every mode.
    pub max_rps: f64,
    /// Total delivery attempts per event.
    pub max_retries: u32,
}

impl ReplayConfig {
    pub fn new(
        events_file: PathBuf,
        target_url: Option<String>,
        rate: f64,
        fixed_delay: f64,
        replay_once: bool,
        max_rps: f64,
    ) -> Result<Self, ConfigError> {
        if rate <= 0.0 || rate.is_nan() {
            return Err(ConfigError::InvalidValue(format!(
                "rate must be positive, got {rate}"
            )));
        }
        if fixed_delay < 0.0 || fixed_delay.is_nan() {
            return Err(ConfigError::InvalidValue(format!(
                "delay must not be negative, got {fixed_delay}"
            )));
        }
        if max_rps <= 0.0 || max_rps.is_nan() {
            return Err(ConfigError::InvalidValue(format!(
                "max-rps must be positive, got {max_rps}"
            )));
        }
        Ok(ReplayConfig {
            events_file,
            target_url,
            rate,
            fixed_delay,
            replay_once,
            max_rps,
            max_retries: DEFAULT_MAX_RETRIES,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_config_rejects_zero_retries_and_concurrency() {
        assert!(ForwardConfig::new("http://x".to_owned(), 0, 5).is_err());
        assert!(ForwardConfig::new("http://x".to_owned(), 3, 0).is_err());
        assert!(ForwardConfig::new(String::new(), 3, 5).is_err());
        assert!(ForwardConfig::new("http://x".to_owned(), 3, 5).is_ok());
    }

    #[test]
    fn replay_config_rejects_non_positive_rate_and_rps() {
        let file = PathBuf::from("events.ndjson");
        assert!(ReplayConfig::new(file.clone(), None, 0.0, 0.0, false, 100.0).is_err());
        assert!(ReplayConfig::new(file.clone(), None, -1.0, 0.0, false, 100.0).is_err());
        assert!(ReplayConfig::new(file.clone(), None, 1.0, -0.5, false, 100.0).is_err());
        assert!(ReplayConfig::new(file.clone(), None, 1.0, 0.0, false, 0.0).is_err());
        assert!(ReplayConfig::new(file.clone(), None, f64::NAN, 0.0, false, 100.0).is_err());
        assert!(ReplayConfig::new(file, None, 1.0, 0.0, false, 100.0).is_ok());
    }
}
