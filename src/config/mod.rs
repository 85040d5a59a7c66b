pub mod basic;
pub mod pool;

pub use basic::BasicConfig;
pub use pool::{AutoBanSettings, HeaderPassthroughConfig, PoolConfig, RetrySettings};

use figment::Figment;
use figment::providers::{Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Process-wide configuration, merged from compiled-in defaults, `config.toml`, and
/// environment variables, in that order — the same layering this codebase already uses
/// for its other settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub basic: BasicConfig,
    #[serde(default)]
    pub pool: PoolConfig,
}

pub static CONFIG: LazyLock<Config> = LazyLock::new(Config::from_optional_toml);

impl Config {
    fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file("config.toml"))
            .merge(figment::providers::Env::prefixed("CREDPOOL_").split("__"))
    }

    /// Non-validating load: missing `config.toml` is fine, falls back to defaults. Used by
    /// the lazily-initialized global and by tests.
    pub fn from_optional_toml() -> Self {
        Self::figment().extract().unwrap_or_default()
    }

    /// Validating load: panics if `config.toml` is absent or required fields are empty.
    /// Used only by the server binary at startup.
    pub fn from_toml() -> Self {
        if !std::path::Path::new("config.toml").exists() {
            panic!("config.toml not found; copy config.example.toml and edit it");
        }
        let cfg: Config = Self::figment()
            .extract()
            .expect("config.toml failed to parse");
        if cfg.pool.auth_directory.as_os_str().is_empty() {
            panic!("pool.auth_directory must be set in config.toml");
        }
        if cfg.basic.proxy_key.is_empty() {
            panic!("basic.proxy_key must be set in config.toml");
        }
        cfg
    }
}
