use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Serializable projection of `Credential` containing only the mutable runtime fields worth
/// persisting. Access tokens and secrets never appear here — they ride with the credential
/// record itself, written back through the source that produced it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CredentialState {
    pub total_requests: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub consecutive_fails: u32,
    pub calls_since_rotation: u64,

    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub banned_at: Option<DateTime<Utc>>,
    pub ban_until: Option<DateTime<Utc>>,
    pub quota_reset_time: Option<DateTime<Utc>>,
    pub last_score_calc: Option<DateTime<Utc>>,
    pub last_failure_weight_decay: Option<DateTime<Utc>>,

    pub status_code_counts: HashMap<u16, u32>,
    pub recent_codes: Vec<u16>,

    pub disabled: bool,
    pub auto_banned: bool,
    pub banned_reason: Option<String>,

    pub daily_limit: u64,
    pub daily_usage: u64,

    pub health_score: f64,
    pub failure_weight: f64,
}
