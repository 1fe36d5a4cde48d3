//! Static configuration shared by the service handles.

use std::path::PathBuf;

use crate::retry::{DEFAULT_LOGGER, RetryPolicy};

/// Settings common to every integration.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    /// Path to the service-account JSON key file.
    pub key_file: PathBuf,
    /// Namespace attached to log events (the `logger` field).
    pub logger: String,
    pub retry: RetryPolicy,
    /// Overrides the Google API host, e.g. to point at a proxy or a test server.
    pub api_base: Option<String>,
}

impl ServiceConfig {
    pub fn new(key_file: impl Into<PathBuf>) -> Self {
        Self {
            key_file: key_file.into(),
            logger: DEFAULT_LOGGER.to_string(),
            retry: RetryPolicy::default(),
            api_base: None,
        }
    }

    pub fn with_logger(mut self, logger: impl Into<String>) -> Self {
        self.logger = logger.into();
        self
    }

    /// Overrides the delay before the first retry.
    pub fn with_retry_delay(mut self, seconds: f64) -> Self {
        self.retry = self.retry.with_initial_delay(seconds);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_api_base(mut self, api_base: Option<String>) -> Self {
        self.api_base = api_base.map(|base| base.trim_end_matches('/').to_string());
        self
    }

    /// The configured API host, or `default` when none was set.
    pub fn api_base_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.api_base.as_deref().unwrap_or(default)
    }
}
