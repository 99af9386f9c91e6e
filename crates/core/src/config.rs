use serde::Deserialize;

use crate::error::AffiliateResult;

/// Root application configuration. Loaded from environment variables
/// with the prefix `AFFILIATE__`, e.g. `AFFILIATE__POSTGRES__URL`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub postgres: PostgresConfig,
    #[serde(default)]
    pub attribution: AttributionConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostgresConfig {
    #[serde(default = "default_postgres_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttributionConfig {
    /// Days before the first payment in which a click can still be credited.
    #[serde(default = "default_window_days")]
    pub window_days: u32,
    /// Upper bound on chain lookups in flight at once.
    #[serde(default = "default_max_concurrent_lookups")]
    pub max_concurrent_lookups: usize,
}

// Default functions
fn default_postgres_url() -> String {
    "postgres://localhost:5432/affiliate".to_string()
}
fn default_max_connections() -> u32 {
    8
}
fn default_connect_timeout_ms() -> u64 {
    5000
}
fn default_window_days() -> u32 {
    30
}
fn default_max_concurrent_lookups() -> usize {
    8
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            url: default_postgres_url(),
            max_connections: default_max_connections(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl Default for AttributionConfig {
    fn default() -> Self {
        Self {
            window_days: default_window_days(),
            max_concurrent_lookups: default_max_concurrent_lookups(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            postgres: PostgresConfig::default(),
            attribution: AttributionConfig::default(),
        }
    }
}

impl AttributionConfig {
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.window_days))
    }

    /// Lookup fan-out, never below one worker.
    pub fn fan_out(&self) -> usize {
        self.max_concurrent_lookups.max(1)
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> AffiliateResult<Self> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("AFFILIATE")
                .separator("__")
                .try_parsing(true),
        );
        Self::from_builder(builder)
    }

    fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> AffiliateResult<Self> {
        Ok(builder.build()?.try_deserialize()?)
    }
}
