use crate::types::Sdk;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Application configuration
/// Provides defaults with environment variable overrides
#[derive(Debug, Clone)]
pub struct Config {
    pub redis_url: String,
    pub working_dir: PathBuf,
    pub pipeline_timeout_ms: u64,
    pub job_expiry_secs: u64,
    pub cancel_poll_ms: u64,
    pub enabled_sdks: Vec<Sdk>,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            working_dir: env::var("WORKING_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| env::temp_dir().join("kiln")),
            pipeline_timeout_ms: env::var("PIPELINE_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(600_000),
            job_expiry_secs: env::var("JOB_EXPIRY_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(900),
            cancel_poll_ms: env::var("CANCEL_POLL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(100),
            enabled_sdks: env::var("ENABLED_SDKS")
                .ok()
                .map(|v| parse_sdk_list(&v))
                .filter(|sdks| !sdks.is_empty())
                .unwrap_or_else(|| Sdk::all_variants().to_vec()),
        }
    }

    pub fn new() -> Self {
        Self::from_env()
    }

    pub fn pipeline_timeout(&self) -> Duration {
        Duration::from_millis(self.pipeline_timeout_ms)
    }

    pub fn job_expiry(&self) -> Duration {
        Duration::from_secs(self.job_expiry_secs)
    }

    pub fn cancel_poll(&self) -> Duration {
        Duration::from_millis(self.cancel_poll_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a comma-separated SDK list; unknown names are ignored
fn parse_sdk_list(raw: &str) -> Vec<Sdk> {
    raw.split(',').filter_map(|s| Sdk::from_str(s.trim())).collect()
}
