//! Client configuration with environment overrides.

use std::time::Duration;

use crate::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Upstream base URL. Required for the HTTP source.
    pub base_url: Option<String>,

    // Pagination
    pub page_size: u32,
    pub max_pages: u32,

    // Retry budgets (retries after the first attempt)
    pub retry_budget: u32,
    pub enrichment_retry_budget: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,

    // Cache
    pub page_stale: Duration,
    pub enrichment_stale: Duration,
    pub cache_max_entries: usize,

    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,

            page_size: 200,
            max_pages: 200,

            retry_budget: 2,
            enrichment_retry_budget: 1,
            backoff_base_ms: 1_000,
            backoff_max_ms: 30_000,

            // Pages go stale after 5 minutes, enrichment after 30
            page_stale: Duration::from_secs(5 * 60),
            enrichment_stale: Duration::from_secs(30 * 60),
            cache_max_entries: 4_096,

            request_timeout: Duration::from_secs(30),
        }
    }
}

impl ClientConfig {
    /// Load from environment with defaults. Unparseable values keep the default.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("TRADE_API_URL") {
            let v = v.trim();
            if !v.is_empty() {
                config.base_url = Some(v.trim_end_matches('/').to_string());
            }
        }
        if let Ok(v) = std::env::var("TRADE_PAGE_SIZE") {
            config.page_size = v.parse().unwrap_or(config.page_size);
        }
        if let Ok(v) = std::env::var("TRADE_MAX_PAGES") {
            config.max_pages = v.parse().unwrap_or(config.max_pages);
        }
        if let Ok(v) = std::env::var("TRADE_RETRY_BUDGET") {
            config.retry_budget = v.parse().unwrap_or(config.retry_budget);
        }
        if let Ok(v) = std::env::var("TRADE_ENRICHMENT_RETRY_BUDGET") {
            config.enrichment_retry_budget = v.parse().unwrap_or(config.enrichment_retry_budget);
        }
        if let Ok(v) = std::env::var("TRADE_BACKOFF_BASE_MS") {
            config.backoff_base_ms = v.parse().unwrap_or(config.backoff_base_ms);
        }
        if let Ok(v) = std::env::var("TRADE_BACKOFF_MAX_MS") {
            config.backoff_max_ms = v.parse().unwrap_or(config.backoff_max_ms);
        }
        if let Ok(v) = std::env::var("TRADE_PAGE_STALE_SECS") {
            if let Ok(secs) = v.parse() {
                config.page_stale = Duration::from_secs(secs);
            }
        }
        if let Ok(v) = std::env::var("TRADE_ENRICHMENT_STALE_SECS") {
            if let Ok(secs) = v.parse() {
                config.enrichment_stale = Duration::from_secs(secs);
            }
        }
        if let Ok(v) = std::env::var("TRADE_CACHE_MAX_ENTRIES") {
            config.cache_max_entries = v.parse().unwrap_or(config.cache_max_entries);
        }
        if let Ok(v) = std::env::var("TRADE_REQUEST_TIMEOUT_SECS") {
            if let Ok(secs) = v.parse() {
                config.request_timeout = Duration::from_secs(secs);
            }
        }

        config.normalized()
    }

    /// Clamp values that must be at least 1.
    pub fn normalized(mut self) -> Self {
        self.page_size = self.page_size.max(1);
        self.max_pages = self.max_pages.max(1);
        self.cache_max_entries = self.cache_max_entries.max(1);
        self
    }

    pub fn page_retry(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_budget, self.backoff_base_ms, self.backoff_max_ms)
    }

    pub fn enrichment_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.enrichment_retry_budget,
            self.backoff_base_ms,
            self.backoff_max_ms,
        )
    }
}
