//! Engine configuration
//!
//! Calendar and explorer endpoints are read-only configuration injected at
//! construction time.

use std::time::Duration;

/// Public OpenTimestamps calendar servers
pub const DEFAULT_CALENDAR_URLS: &[&str] = &[
    "https://alice.btc.calendar.opentimestamps.org",
    "https://bob.btc.calendar.opentimestamps.org",
    "https://finney.calendar.eternitywall.com",
    "https://ots.btc.catallaxy.com",
    "https://b.pool.opentimestamps.org",
];

/// Esplora-compatible block explorers (tried in order)
pub const DEFAULT_EXPLORER_URLS: &[&str] = &["https://blockstream.info", "https://mempool.space"];

/// Default per-request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// OpenTimestamps engine configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtsConfig {
    /// Calendar server base URLs
    pub calendar_urls: Vec<String>,

    /// Block explorer base URLs (without `/api`)
    pub explorer_urls: Vec<String>,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for OtsConfig {
    fn default() -> Self {
        Self {
            calendar_urls: to_strings(DEFAULT_CALENDAR_URLS),
            explorer_urls: to_strings(DEFAULT_EXPLORER_URLS),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl OtsConfig {
    /// Create with custom calendar URLs
    #[must_use]
    pub fn with_calendars(urls: Vec<String>) -> Self {
        Self {
            calendar_urls: urls,
            ..Self::default()
        }
    }

    /// Per-request timeout
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Create config from environment variables
    ///
    /// Environment variables:
    /// - `OTS_CALENDAR_URLS`: Comma-separated list of calendar URLs
    /// - `OTS_EXPLORER_URLS`: Comma-separated list of block explorer URLs
    /// - `OTS_TIMEOUT_SECS`: HTTP timeout in seconds (default: 30)
    #[must_use]
    pub fn from_env() -> Self {
        let calendar_urls = std::env::var("OTS_CALENDAR_URLS")
            .map(|s| split_urls(&s))
            .unwrap_or_else(|_| to_strings(DEFAULT_CALENDAR_URLS));

        let explorer_urls = std::env::var("OTS_EXPLORER_URLS")
            .map(|s| split_urls(&s))
            .unwrap_or_else(|_| to_strings(DEFAULT_EXPLORER_URLS));

        let timeout_secs = std::env::var("OTS_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        Self {
            calendar_urls,
            explorer_urls,
            timeout_secs,
        }
    }
}

/// Split a comma-separated URL list, dropping empty entries and trailing slashes
pub fn split_urls(s: &str) -> Vec<String> {
    s.split(',')
        .map(|u| u.trim().trim_end_matches('/').to_string())
        .filter(|u| !u.is_empty())
        .collect()
}

fn to_strings(urls: &[&str]) -> Vec<String> {
    urls.iter().map(|u| (*u).to_string()).collect()
}
