//! Configuration types for cmr-fetch
//!
//! A [`Config`] is built once at startup and passed down explicitly; nothing
//! in the crate reads process-wide mutable state.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default CMR search endpoint
pub const DEFAULT_SEARCH_URL: &str = "https://cmr.earthdata.nasa.gov/search";

/// Environment variable overriding [`SearchConfig::base_url`]
pub const ENV_SEARCH_URL: &str = "EARTHDATA_CMR_API";

/// Environment variable supplying a bearer token for file downloads
pub const ENV_TOKEN: &str = "EARTHDATA_TOKEN";

/// Largest page size the search server accepts
pub const MAX_PAGE_SIZE: usize = 2000;

/// Search client configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Base URL of the search API (default: "https://cmr.earthdata.nasa.gov/search")
    #[serde(default = "default_search_url")]
    pub base_url: String,

    /// Records requested per page (default: 200)
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Overall timeout for each page request (default: 60 seconds)
    #[serde(default = "default_search_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Records buffered between the paging task and the consumer (default: 1)
    ///
    /// The paging task stops issuing requests while this buffer is full, so
    /// memory stays proportional to one page regardless of result size.
    #[serde(default = "default_buffer")]
    pub buffer: usize,

    /// User-Agent header sent with every search request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            base_url: default_search_url(),
            page_size: default_page_size(),
            timeout: default_search_timeout(),
            buffer: default_buffer(),
            user_agent: default_user_agent(),
        }
    }
}

/// How file downloads authenticate
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum AuthConfig {
    /// Anonymous downloads
    #[default]
    None,
    /// Basic credentials from a netrc file, injected on redirect by hostname
    Netrc {
        /// Explicit netrc path (default: `$NETRC`, then `~/.netrc`)
        #[serde(default)]
        path: Option<PathBuf>,
    },
    /// Bearer token attached to the initial request (TLS only)
    Bearer {
        /// The token
        token: String,
    },
}

/// Fetch pool configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Number of concurrent download workers (default: 4)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Overall timeout for each download request (default: 20 minutes)
    #[serde(default = "default_fetch_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Write buffer used while streaming a body to disk (default: 1 MiB)
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,

    /// Maximum redirects followed per download (default: 10)
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,

    /// Authentication mode
    #[serde(default)]
    pub auth: AuthConfig,

    /// Overwrite existing destination files (default: false)
    #[serde(default)]
    pub clobber: bool,

    /// Compare checksums of existing files before skipping them (default: true)
    #[serde(default = "default_true")]
    pub verify_checksums: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            timeout: default_fetch_timeout(),
            read_buffer_size: default_read_buffer_size(),
            max_redirects: default_max_redirects(),
            auth: AuthConfig::default(),
            clobber: false,
            verify_checksums: true,
        }
    }
}

/// Main configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Search client settings
    #[serde(default)]
    pub search: SearchConfig,

    /// Download settings
    #[serde(default)]
    pub fetch: FetchConfig,
}

impl Config {
    /// Apply environment overrides using the given lookup function.
    ///
    /// `EARTHDATA_CMR_API` replaces the search base URL and `EARTHDATA_TOKEN`
    /// switches downloads to bearer-token auth. Call once at startup, usually
    /// as `config.with_env_overrides(|k| std::env::var(k).ok())`.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_SEARCH_URL).filter(|s| !s.trim().is_empty()) {
            tracing::debug!(url = %url, "search base url overridden from environment");
            self.search.base_url = url;
        }
        if let Some(token) = lookup(ENV_TOKEN).filter(|s| !s.trim().is_empty()) {
            self.fetch.auth = AuthConfig::Bearer { token };
        }
        self
    }

    /// Check the configuration for values the client cannot work with
    pub fn validate(&self) -> Result<()> {
        self.search.validate()?;
        self.fetch.validate()
    }
}

impl SearchConfig {
    /// Check search settings
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.base_url).map_err(|e| Error::Config {
            message: format!("invalid search url {}: {}", self.base_url, e),
            key: Some("search.base_url".to_string()),
        })?;
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(Error::Config {
                message: format!(
                    "page size must be between 1 and {}, got {}",
                    MAX_PAGE_SIZE, self.page_size
                ),
                key: Some("search.page_size".to_string()),
            });
        }
        if self.buffer == 0 {
            return Err(Error::Config {
                message: "record buffer must hold at least one record".to_string(),
                key: Some("search.buffer".to_string()),
            });
        }
        Ok(())
    }
}

impl FetchConfig {
    /// Check fetch settings
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(Error::Config {
                message: "concurrency must be at least 1".to_string(),
                key: Some("fetch.concurrency".to_string()),
            });
        }
        if self.read_buffer_size == 0 {
            return Err(Error::Config {
                message: "read buffer size must be non-zero".to_string(),
                key: Some("fetch.read_buffer_size".to_string()),
            });
        }
        Ok(())
    }
}

fn default_search_url() -> String {
    DEFAULT_SEARCH_URL.to_string()
}

fn default_page_size() -> usize {
    200
}

fn default_search_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_buffer() -> usize {
    1
}

fn default_user_agent() -> String {
    format!("cmr-fetch/{}", env!("CARGO_PKG_VERSION"))
}

fn default_concurrency() -> usize {
    4
}

fn default_fetch_timeout() -> Duration {
    Duration::from_secs(20 * 60)
}

fn default_read_buffer_size() -> usize {
    1 << 20
}

fn default_max_redirects() -> usize {
    10
}

fn default_true() -> bool {
    true
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_empty_json_uses_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.search.base_url, DEFAULT_SEARCH_URL);
        assert_eq!(config.search.page_size, 200);
        assert_eq!(config.fetch.concurrency, 4);
        assert_eq!(config.fetch.timeout, Duration::from_secs(1200));
        assert_eq!(config.fetch.auth, AuthConfig::None);
        assert!(!config.fetch.clobber);
        assert!(config.fetch.verify_checksums);
    }

    #[test]
    fn test_durations_serialize_as_seconds() {
        let config = Config::default();
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["search"]["timeout"], 60);
        assert_eq!(json["fetch"]["timeout"], 1200);
    }

    #[test]
    fn test_auth_modes_deserialize_from_tagged_form() {
        let fetch: FetchConfig =
            serde_json::from_str(r#"{"auth": {"mode": "bearer", "token": "t0k"}}"#).unwrap();
        assert_eq!(
            fetch.auth,
            AuthConfig::Bearer {
                token: "t0k".into()
            }
        );

        let fetch: FetchConfig = serde_json::from_str(r#"{"auth": {"mode": "netrc"}}"#).unwrap();
        assert_eq!(fetch.auth, AuthConfig::Netrc { path: None });
    }

    #[test]
    fn test_env_overrides_apply_once() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_SEARCH_URL, "http://localhost:3003"),
            (ENV_TOKEN, "secret"),
        ]);
        let config = Config::default().with_env_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.search.base_url, "http://localhost:3003");
        assert_eq!(
            config.fetch.auth,
            AuthConfig::Bearer {
                token: "secret".into()
            }
        );
    }

    #[test]
    fn test_blank_env_values_are_ignored() {
        let config = Config::default().with_env_overrides(|_| Some("  ".to_string()));
        assert_eq!(config.search.base_url, DEFAULT_SEARCH_URL);
        assert_eq!(config.fetch.auth, AuthConfig::None);
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let mut config = Config::default();
        config.fetch.concurrency = 0;
        match config.validate() {
            Err(Error::Config { key, .. }) => assert_eq!(key.as_deref(), Some("fetch.concurrency")),
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_rejects_bad_page_size_and_url() {
        let mut config = Config::default();
        config.search.page_size = MAX_PAGE_SIZE + 1;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.search.base_url = "not a url".into();
        match config.validate() {
            Err(Error::Config { key, .. }) => assert_eq!(key.as_deref(), Some("search.base_url")),
            other => panic!("expected config error, got {other:?}"),
        }
    }
}
