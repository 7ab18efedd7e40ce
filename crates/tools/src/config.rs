use std::env;
use std::path::PathBuf;
use std::time::Duration;

use catalog::Locale;
use layers::ManagerConfig;
use tracing::warn;

pub const DEFAULT_PUBLIC_DIR: &str = "public";
pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 10_000;

/// Runtime settings read from `JPMAP_*` environment variables.
///
/// Command-line flags override these field by field in `main`.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Overlay URLs are fetched over HTTP relative to this when set,
    /// otherwise read from `public_dir`.
    pub base_url: Option<String>,
    pub public_dir: PathBuf,
    pub locale: Locale,
    pub fetch_timeout: Duration,
    pub dormant_source_limit: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: None,
            public_dir: PathBuf::from(DEFAULT_PUBLIC_DIR),
            locale: Locale::default(),
            fetch_timeout: Duration::from_millis(DEFAULT_FETCH_TIMEOUT_MS),
            dormant_source_limit: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let locale = match lookup("JPMAP_LOCALE") {
            Some(raw) => raw.parse().unwrap_or_else(|err| {
                warn!(%err, "ignoring JPMAP_LOCALE");
                Locale::default()
            }),
            None => Locale::default(),
        };

        Self {
            base_url: lookup("JPMAP_BASE_URL").filter(|v| !v.trim().is_empty()),
            public_dir: lookup("JPMAP_PUBLIC_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PUBLIC_DIR)),
            locale,
            fetch_timeout: Duration::from_millis(env_var_u64(
                &lookup,
                "JPMAP_FETCH_TIMEOUT_MS",
                DEFAULT_FETCH_TIMEOUT_MS,
            )),
            dormant_source_limit: env_var_usize_opt(&lookup, "JPMAP_DORMANT_SOURCE_LIMIT"),
        }
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            dormant_source_limit: self.dormant_source_limit,
        }
    }
}

fn env_var_u64(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> u64 {
    lookup(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_var_usize_opt(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<usize> {
    lookup(key).and_then(|v| v.parse().ok())
}
