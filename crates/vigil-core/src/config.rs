use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use vigil_types::error::{Result, VigilError};

/// Directory under the cache root holding the durable action queue.
pub const ACTION_QUEUE_DIR: &str = "ActionQueue";

fn default_consolidation_delay() -> String {
    "10s".to_string()
}

fn default_retry_delay_ms() -> u64 {
    5000
}

/// Retry behavior for the action worker. Attempts never stop; a failing
/// action stays queued until it succeeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

/// Configuration consumed by the remote file state cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Root directory for local cache state. Batch files live directly
    /// under it; the action queue lives at `<root>/ActionQueue`.
    pub cache_path: String,
    /// Debounce window before the current batch is sealed and uploaded
    /// (e.g. "10s", "2m").
    #[serde(default = "default_consolidation_delay")]
    pub batch_upload_consolidation_delay: String,
    /// Optional append-only diagnostic log.
    #[serde(default)]
    pub debug_log_path: Option<String>,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl CacheConfig {
    pub fn new(cache_path: impl Into<String>) -> Self {
        Self {
            cache_path: cache_path.into(),
            batch_upload_consolidation_delay: default_consolidation_delay(),
            debug_log_path: None,
            retry: RetryConfig::default(),
        }
    }

    pub fn consolidation_delay(&self) -> Result<Duration> {
        parse_human_duration(&self.batch_upload_consolidation_delay)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry.retry_delay_ms)
    }

    pub fn cache_root(&self) -> PathBuf {
        PathBuf::from(&self.cache_path)
    }

    pub fn action_queue_path(&self) -> PathBuf {
        Path::new(&self.cache_path).join(ACTION_QUEUE_DIR)
    }

    /// Reject unusable configurations up front.
    pub fn validate(&self) -> Result<()> {
        if self.cache_path.trim().is_empty() {
            return Err(VigilError::Config("cache_path must not be empty".into()));
        }
        self.consolidation_delay()?;
        if self.retry.retry_delay_ms == 0 {
            return Err(VigilError::Config(
                "retry_delay_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Parse a simple duration string like "30s", "5m", or "2h".
/// A plain number is taken as seconds.
pub fn parse_human_duration(raw: &str) -> Result<Duration> {
    let input = raw.trim();
    if input.is_empty() {
        return Err(VigilError::Config("duration must not be empty".into()));
    }

    let (num_part, unit) = match input.chars().last() {
        Some(c) if c.is_ascii_alphabetic() => (&input[..input.len() - 1], Some(c)),
        Some(_) => (input, None),
        None => return Err(VigilError::Config("duration must not be empty".into())),
    };

    let value: u64 = num_part
        .parse()
        .map_err(|_| VigilError::Config(format!("invalid duration value: '{raw}'")))?;

    let secs = match unit {
        None | Some('s') | Some('S') => value,
        Some('m') | Some('M') => value.saturating_mul(60),
        Some('h') | Some('H') => value.saturating_mul(60 * 60),
        Some('d') | Some('D') => value.saturating_mul(24 * 60 * 60),
        Some(other) => {
            return Err(VigilError::Config(format!(
                "unknown duration unit '{other}' in '{raw}'"
            )))
        }
    };

    if secs == 0 {
        return Err(VigilError::Config(
            "duration must be greater than zero".into(),
        ));
    }

    Ok(Duration::from_secs(secs))
}
