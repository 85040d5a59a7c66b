use serde::{Deserialize, Serialize};
use std::path::PathBuf;

fn default_true() -> bool {
    true
}

/// Every recognized configuration key for the credential pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Directory the file source scans for `*.json` credential records.
    pub auth_directory: PathBuf,
    /// Call count after which a credential is skipped for rotation and its counter reset.
    /// Zero disables rotation-skipping entirely.
    pub rotation_threshold: u64,
    #[serde(flatten)]
    pub auto_ban: AutoBanSettings,
    pub auto_recovery_enabled: bool,
    pub auto_recovery_interval_secs: u64,
    pub max_concurrent_per_credential: usize,
    pub refresh_ahead_seconds: i64,
    #[serde(rename = "retry")]
    pub retry: RetrySettings,
    pub preferred_base_models: Vec<String>,
    pub disabled_models: Vec<String>,
    pub header_passthrough: HeaderPassthroughConfig,
    /// Enable the env-var credential source (`GCLI_CREDS_*`).
    pub auto_load_env_creds: bool,
    /// Base URL of the upstream Gemini Code Assist backend. TOML: `pool.gemini_base_url`.
    pub gemini_base_url: url::Url,
    /// `X-Goog-User-Project` fallback when a credential carries no `project_id`.
    /// TOML: `pool.default_user_project`.
    pub default_user_project: String,
    /// Upstream timeout for streaming calls. TOML: `pool.stream_timeout_secs`.
    pub stream_timeout_secs: u64,
    /// Upstream timeout for non-streaming calls. TOML: `pool.non_stream_timeout_secs`.
    pub non_stream_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            auth_directory: PathBuf::from("./auth"),
            rotation_threshold: 50,
            auto_ban: AutoBanSettings::default(),
            auto_recovery_enabled: true,
            auto_recovery_interval_secs: 600,
            max_concurrent_per_credential: 0,
            refresh_ahead_seconds: 180,
            retry: RetrySettings::default(),
            preferred_base_models: vec!["gemini-2.5-pro".to_string()],
            disabled_models: Vec::new(),
            header_passthrough: HeaderPassthroughConfig::default(),
            auto_load_env_creds: true,
            gemini_base_url: url::Url::parse("https://cloudcode-pa.googleapis.com")
                .expect("valid built-in base url"),
            default_user_project: String::new(),
            stream_timeout_secs: 300,
            non_stream_timeout_secs: 120,
        }
    }
}

/// Policy thresholds for auto-banning a credential.
///
/// `enabled` defaults to `true`; only an explicit `false` in `config.toml` turns the policy off.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoBanSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub threshold_429: u32,
    pub threshold_403: u32,
    pub threshold_401: u32,
    pub threshold_5xx: u32,
    pub consecutive_fail_limit: u32,
}

impl Default for AutoBanSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_429: 3,
            threshold_403: 5,
            threshold_401: 3,
            threshold_5xx: 10,
            consecutive_fail_limit: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub enabled: bool,
    pub max: u32,
    pub interval_ms: u64,
    pub max_interval_ms: u64,
    pub on_network_error: bool,
    pub on_5xx: bool,
    /// Rotate credentials on 5xx in addition to 401/403/429 (engine §4.G step 6).
    pub rotate_on_5xx: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max: 3,
            interval_ms: 500,
            max_interval_ms: 15_000,
            on_network_error: true,
            on_5xx: true,
            rotate_on_5xx: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeaderPassthroughConfig {
    pub enabled: bool,
    pub allow_list: Vec<String>,
    pub deny_list: Vec<String>,
    pub audit_log: bool,
}

impl Default for HeaderPassthroughConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allow_list: vec!["x-request-id".to_string(), "x-session-id".to_string()],
            deny_list: vec!["authorization".to_string(), "cookie".to_string()],
            audit_log: false,
        }
    }
}
