//! Client configuration.

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "http://localhost:5000/api";

/// Upper bound for one-shot calls (login, CRUD, reports).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Runtime configuration for the client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the ledger REST API, without a trailing slash.
    pub api_base: String,

    /// Delay before the sync loop polls again after a failed poll.
    pub retry_delay: Duration,

    /// Timeout for one-shot calls. The `/updates` long-poll never gets one.
    /// `None` disables it.
    pub request_timeout: Option<Duration>,

    /// Where the TUI writes its log.
    pub log_file: PathBuf,
}

impl ClientConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let api_base = var("FINANCE_API_BASE")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());

        // zero would retry a failing server in a tight loop
        let retry_secs: u64 = var("FINANCE_RETRY_DELAY_SECS")
            .and_then(|s| s.parse().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(5);

        let request_timeout = match var("FINANCE_HTTP_TIMEOUT_SECS").map(|s| s.parse::<u64>()) {
            Some(Ok(0)) => None,
            Some(Ok(secs)) => Some(Duration::from_secs(secs)),
            _ => Some(DEFAULT_REQUEST_TIMEOUT),
        };

        let log_file = var("FINANCE_LOG_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("finance-client.log"));

        Self {
            api_base: normalize_base(&api_base),
            retry_delay: Duration::from_secs(retry_secs),
            request_timeout,
            log_file,
        }
    }

    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = normalize_base(api_base);
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            retry_delay: Duration::from_secs(5),
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
            log_file: PathBuf::from("finance-client.log"),
        }
    }
}

fn normalize_base(s: &str) -> String {
    s.trim().trim_end_matches('/').to_string()
}
