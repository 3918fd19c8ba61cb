use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

// =============================================================================
// Config
// =============================================================================

#[derive(Deserialize, Default, Clone, Debug)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub tail: TailConfig,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// Where compiled SQL is sent for execution.
#[derive(Deserialize, Clone, Debug)]
pub struct ExecutionConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            timeout_ms: default_timeout_ms(),
            api_key: None,
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct QueryConfig {
    #[serde(default = "default_page_size")]
    pub default_page_size: u32,
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u32,
    #[serde(default = "default_facet_limit")]
    pub facet_limit: u64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            facet_limit: default_facet_limit(),
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct TailConfig {
    #[serde(default = "default_tail_interval")]
    pub interval_ms: u64,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_tail_interval(),
        }
    }
}

impl TailConfig {
    /// The re-dispatch period. Never zero: `tokio::time::interval` panics on
    /// a zero period.
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

fn default_bind() -> String {
    "127.0.0.1:3100".into()
}
fn default_endpoint() -> String {
    "http://127.0.0.1:4000/api/logs/query".into()
}
fn default_timeout_ms() -> u64 {
    30_000
}
fn default_page_size() -> u32 {
    tr_core::filter::DEFAULT_PAGE_SIZE
}
fn default_max_page_size() -> u32 {
    1000
}
fn default_facet_limit() -> u64 {
    tr_core::compile::DEFAULT_FACET_LIMIT
}
fn default_tail_interval() -> u64 {
    10_000
}

impl Config {
    /// Read `path` if it exists. A missing file yields the defaults; an
    /// unreadable or malformed one is logged and also yields the defaults.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            tracing::info!("No config at {:?}, using defaults", path);
            return Self::default();
        }
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!("Failed to read config {:?}: {}", path, e);
                return Self::default();
            }
        };
        match toml::from_str::<Config>(&content) {
            Ok(config) => config.normalized(),
            Err(e) => {
                tracing::warn!("Failed to parse config {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    /// Replace zero values that have no sensible meaning with their defaults.
    pub fn normalized(mut self) -> Self {
        if self.tail.interval_ms == 0 {
            tracing::warn!(
                "[tail] interval_ms = 0 is not usable, using {} ms",
                default_tail_interval()
            );
            self.tail.interval_ms = default_tail_interval();
        }
        if self.execution.timeout_ms == 0 {
            tracing::warn!(
                "[execution] timeout_ms = 0 is not usable, using {} ms",
                default_timeout_ms()
            );
            self.execution.timeout_ms = default_timeout_ms();
        }
        if self.query.max_page_size == 0 {
            tracing::warn!(
                "[query] max_page_size = 0 is not usable, using {}",
                default_max_page_size()
            );
            self.query.max_page_size = default_max_page_size();
        }
        if self.query.default_page_size == 0 {
            self.query.default_page_size = default_page_size();
        }
        self.query.default_page_size = self.query.default_page_size.min(self.query.max_page_size);
        self
    }
}
