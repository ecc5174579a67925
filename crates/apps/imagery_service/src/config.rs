//! Service configuration, read from the environment with defaults.

use std::env;

use serde::{Deserialize, Serialize};
use streaming::{LoaderConfig, RetryPolicy, SITE_BASE};

pub const DEFAULT_OFFSETS_URL: &str = "http://offsets.textual.ru/get";
const DEFAULT_RETRY_BACKOFF_MS: u64 = 500;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Base URL of the catalog API and image host.
    #[serde(default = "default_api_base")]
    pub api_base: String,

    #[serde(default = "default_offsets_url")]
    pub offsets_url: String,

    #[serde(default)]
    pub loader: LoaderConfig,
}

fn default_api_base() -> String {
    SITE_BASE.to_string()
}

fn default_offsets_url() -> String {
    DEFAULT_OFFSETS_URL.to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            offsets_url: default_offsets_url(),
            loader: LoaderConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Read `OSC_*` variables, falling back to defaults for anything unset or
    /// unparseable.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = LoaderConfig::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        let retry = match parsed("OSC_RETRY_ATTEMPTS") {
            None | Some(0) => RetryPolicy::Never,
            Some(attempts) => RetryPolicy::Retry {
                max_retries: u32::try_from(attempts).unwrap_or(u32::MAX),
                backoff_ms: parsed("OSC_RETRY_BACKOFF_MS").unwrap_or(DEFAULT_RETRY_BACKOFF_MS),
            },
        };

        let loader = LoaderConfig {
            page_size: parsed("OSC_PAGE_SIZE")
                .and_then(|v| u32::try_from(v).ok())
                .filter(|&v| v > 0)
                .unwrap_or(defaults.page_size),
            max_concurrent_fetches: parsed("OSC_MAX_CONCURRENT")
                .and_then(|v| usize::try_from(v).ok())
                .filter(|&v| v > 0)
                .unwrap_or(defaults.max_concurrent_fetches),
            retry,
            ..defaults
        };

        Self {
            api_base: lookup("OSC_API_BASE").unwrap_or_else(default_api_base),
            offsets_url: lookup("OSC_OFFSETS_URL").unwrap_or_else(default_offsets_url),
            loader,
        }
    }
}
