use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

use crate::config::AutoBanSettings;

use super::score::{ScoreInputs, compute_score, decay_failure_weight, severity_penalty};
use super::state::CredentialState;

const RECENT_CODE_RING_CAP: usize = 20;
const SCORE_CACHE_SECS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    Oauth,
    ApiKey,
}

/// One API identity usable to call the upstream Gemini backend.
///
/// Mutated only from inside the Credential Manager actor's mailbox (`manager::actor`); callers
/// never see a live reference, only a `Clone`d snapshot, so the pool's aliasing rules hold by
/// construction without any locking on this type itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub id: String,
    pub kind: CredentialKind,
    pub source_tag: String,

    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub token_uri: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub api_key: Option<String>,

    pub project_id: Option<String>,
    pub email: Option<String>,

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

    pub recent_codes: VecDeque<u16>,
    pub status_code_counts: HashMap<u16, u32>,

    pub disabled: bool,
    pub auto_banned: bool,
    pub banned_reason: Option<String>,

    pub daily_limit: u64,
    pub daily_usage: u64,

    pub health_score: f64,
    pub failure_weight: f64,
}

impl Credential {
    pub fn new_oauth(id: impl Into<String>, source_tag: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: CredentialKind::Oauth,
            source_tag: source_tag.into(),
            client_id: None,
            client_secret: None,
            access_token: None,
            refresh_token: None,
            token_uri: None,
            expires_at: None,
            api_key: None,
            project_id: None,
            email: None,
            total_requests: 0,
            success_count: 0,
            failure_count: 0,
            consecutive_fails: 0,
            calls_since_rotation: 0,
            last_success: None,
            last_failure: None,
            banned_at: None,
            ban_until: None,
            quota_reset_time: None,
            last_score_calc: None,
            last_failure_weight_decay: None,
            recent_codes: VecDeque::with_capacity(RECENT_CODE_RING_CAP),
            status_code_counts: HashMap::new(),
            disabled: false,
            auto_banned: false,
            banned_reason: None,
            daily_limit: 0,
            daily_usage: 0,
            health_score: 0.0,
            failure_weight: 0.0,
        }
    }

    /// Snapshot the persistable subset of this record (§3.2).
    pub fn snapshot_state(&self) -> CredentialState {
        CredentialState {
            total_requests: self.total_requests,
            success_count: self.success_count,
            failure_count: self.failure_count,
            consecutive_fails: self.consecutive_fails,
            calls_since_rotation: self.calls_since_rotation,
            last_success: self.last_success,
            last_failure: self.last_failure,
            banned_at: self.banned_at,
            ban_until: self.ban_until,
            quota_reset_time: self.quota_reset_time,
            last_score_calc: self.last_score_calc,
            last_failure_weight_decay: self.last_failure_weight_decay,
            status_code_counts: self.status_code_counts.clone(),
            recent_codes: self.recent_codes.iter().copied().collect(),
            disabled: self.disabled,
            auto_banned: self.auto_banned,
            banned_reason: self.banned_reason.clone(),
            daily_limit: self.daily_limit,
            daily_usage: self.daily_usage,
            health_score: self.health_score,
            failure_weight: self.failure_weight,
        }
    }

    /// Apply a previously persisted state projection onto this record (restore path).
    pub fn restore_state(&mut self, state: CredentialState) {
        self.total_requests = state.total_requests;
        self.success_count = state.success_count;
        self.failure_count = state.failure_count;
        self.consecutive_fails = state.consecutive_fails;
        self.calls_since_rotation = state.calls_since_rotation;
        self.last_success = state.last_success;
        self.last_failure = state.last_failure;
        self.banned_at = state.banned_at;
        self.ban_until = state.ban_until;
        self.quota_reset_time = state.quota_reset_time;
        self.last_score_calc = state.last_score_calc;
        self.last_failure_weight_decay = state.last_failure_weight_decay;
        self.status_code_counts = state.status_code_counts;
        self.recent_codes = state.recent_codes.into_iter().collect();
        self.disabled = state.disabled;
        self.auto_banned = state.auto_banned;
        self.banned_reason = state.banned_reason;
        self.daily_limit = state.daily_limit;
        self.daily_usage = state.daily_usage;
        self.health_score = state.health_score;
        self.failure_weight = state.failure_weight;
    }

    fn roll_daily_usage(&mut self, now: DateTime<Utc>) {
        let due = self.quota_reset_time.is_none_or(|t| now >= t);
        if due {
            self.daily_usage = 0;
            self.quota_reset_time = Some(next_midnight_utc(now));
        } else {
            self.daily_usage += 1;
        }
    }

    /// §4.A `mark_success`.
    pub fn mark_success(&mut self) {
        let now = Utc::now();
        self.total_requests += 1;
        self.success_count += 1;
        self.consecutive_fails = 0;
        self.failure_count = 0;
        self.last_success = Some(now);

        for count in self.status_code_counts.values_mut() {
            *count = count.saturating_sub(1);
        }
        self.status_code_counts.retain(|_, count| *count > 0);
        self.recent_codes.clear();

        self.failure_weight = decay_failure_weight(
            self.failure_weight,
            self.last_failure_weight_decay,
            now,
            true,
        );
        self.last_failure_weight_decay = Some(now);

        self.roll_daily_usage(now);
        self.recompute_score(now);
    }

    /// §4.A `mark_failure`. `ban_cfg` drives the auto-ban policy evaluation.
    pub fn mark_failure(&mut self, reason: &str, status_code: u16, ban_cfg: &AutoBanSettings) {
        let now = Utc::now();
        self.total_requests += 1;
        self.failure_count += 1;
        self.consecutive_fails += 1;
        self.last_failure = Some(now);

        if self.recent_codes.len() >= RECENT_CODE_RING_CAP {
            self.recent_codes.pop_front();
        }
        self.recent_codes.push_back(status_code);
        *self.status_code_counts.entry(status_code).or_insert(0) += 1;

        self.failure_weight = decay_failure_weight(
            self.failure_weight,
            self.last_failure_weight_decay,
            now,
            false,
        );
        self.last_failure_weight_decay = Some(now);
        self.failure_weight = (self.failure_weight + severity_penalty(status_code)).min(10.0);

        if ban_cfg.enabled && !self.auto_banned {
            if let Some((cooldown, label)) = self.evaluate_ban_trigger(status_code, ban_cfg) {
                self.auto_banned = true;
                self.banned_at = Some(now);
                self.ban_until = Some(now + cooldown);
                self.banned_reason = Some(format!("{label} ({reason})"));
            }
        }

        self.recompute_score(now);
    }

    fn evaluate_ban_trigger(
        &self,
        status_code: u16,
        cfg: &AutoBanSettings,
    ) -> Option<(Duration, String)> {
        let five_xx_total = [500u16, 502, 503]
            .iter()
            .map(|c| self.status_code_counts.get(c).copied().unwrap_or(0))
            .sum::<u32>();

        let tally = self.status_code_counts.get(&status_code).copied().unwrap_or(0);

        match status_code {
            429 if tally >= cfg.threshold_429 => {
                Some((Duration::minutes(30), "Rate limit exceeded (429)".to_string()))
            }
            403 if tally >= cfg.threshold_403 => {
                Some((Duration::minutes(60), "Forbidden (403)".to_string()))
            }
            401 if tally >= cfg.threshold_401 => {
                Some((Duration::minutes(120), "Unauthorized (401)".to_string()))
            }
            500..=599 if five_xx_total >= cfg.threshold_5xx => {
                Some((Duration::minutes(15), "Server errors (5xx)".to_string()))
            }
            _ if self.consecutive_fails >= cfg.consecutive_fail_limit => Some((
                Duration::minutes(60),
                "Consecutive failure limit reached".to_string(),
            )),
            _ => None,
        }
    }

    /// §4.A `is_healthy`.
    pub fn is_healthy(&self) -> bool {
        if self.disabled || self.auto_banned {
            return false;
        }
        if self.consecutive_fails > 5 || self.failure_weight > 4.0 {
            return false;
        }
        if self.daily_limit > 0 && self.daily_usage >= self.daily_limit {
            return false;
        }
        let now = Utc::now();
        if let Some(failure) = self.last_failure {
            let recent_failure = (now - failure) <= Duration::minutes(5);
            let recovered_since = self.last_success.is_some_and(|s| s > failure);
            if recent_failure && !recovered_since {
                return false;
            }
        }
        if self.status_code_counts.get(&429).copied().unwrap_or(0) > 3 {
            return false;
        }
        true
    }

    /// §4.A `get_score`, cached for one minute.
    pub fn get_score(&mut self) -> f64 {
        let now = Utc::now();
        let fresh = self
            .last_score_calc
            .is_some_and(|t| (now - t) < Duration::seconds(SCORE_CACHE_SECS));
        if fresh {
            return self.health_score;
        }
        self.failure_weight = decay_failure_weight(
            self.failure_weight,
            self.last_failure_weight_decay,
            now,
            false,
        );
        self.last_failure_weight_decay = Some(now);
        self.recompute_score(now);
        self.health_score
    }

    fn recompute_score(&mut self, now: DateTime<Utc>) {
        let inputs = ScoreInputs {
            success_count: self.success_count,
            total_requests: self.total_requests,
            disabled: self.disabled,
            auto_banned: self.auto_banned,
            last_failure: self.last_failure,
            last_success: self.last_success,
            consecutive_fails: self.consecutive_fails,
            status_code_counts: &self.status_code_counts,
            daily_limit: self.daily_limit,
            daily_usage: self.daily_usage,
            failure_weight: self.failure_weight,
            now,
        };
        self.health_score = compute_score(&inputs);
        self.last_score_calc = Some(now);
    }

    /// §4.A `can_recover`.
    pub fn can_recover(&self) -> bool {
        if !self.auto_banned {
            return false;
        }
        let now = Utc::now();
        let past_ban_until = self.ban_until.is_some_and(|u| now >= u);
        let long_enough_since_ban = self.banned_at.is_some_and(|b| (now - b) >= Duration::hours(2));
        past_ban_until || long_enough_since_ban
    }

    /// §4.A `recover`.
    pub fn recover(&mut self) {
        self.auto_banned = false;
        self.banned_at = None;
        self.ban_until = None;
        self.banned_reason = None;
        self.failure_weight = 0.0;
        self.consecutive_fails = 0;
        self.failure_count = 0;
        self.status_code_counts.clear();
        self.recent_codes.clear();
        self.recompute_score(Utc::now());
    }

    /// §4.A `should_rotate`. `threshold == 0` disables rotation-skipping entirely.
    pub fn should_rotate(&self, threshold: u64) -> bool {
        threshold > 0 && self.calls_since_rotation >= threshold
    }

    pub fn is_oauth(&self) -> bool {
        self.kind == CredentialKind::Oauth
    }

    pub fn is_token_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(exp) => now >= exp,
            None => self.access_token.is_none(),
        }
    }
}

fn next_midnight_utc(now: DateTime<Utc>) -> DateTime<Utc> {
    let tomorrow = (now + Duration::days(1)).date_naive();
    tomorrow
        .and_hms_opt(0, 0, 0)
        .expect("valid midnight time")
        .and_utc()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ban_cfg() -> AutoBanSettings {
        AutoBanSettings {
            enabled: true,
            threshold_429: 3,
            threshold_403: 5,
            threshold_401: 3,
            threshold_5xx: 10,
            consecutive_fail_limit: 10,
        }
    }

    #[test]
    fn mark_success_clears_failure_counters() {
        let mut c = Credential::new_oauth("a", "file");
        c.mark_failure("boom", 500, &ban_cfg());
        assert_eq!(c.failure_count, 1);
        c.mark_success();
        assert_eq!(c.consecutive_fails, 0);
        assert_eq!(c.failure_count, 0);
        assert_eq!(c.success_count, 1);
    }

    #[test]
    fn ten_consecutive_429_caps_failure_weight_at_ten() {
        let mut c = Credential::new_oauth("a", "file");
        let cfg = ban_cfg();
        for _ in 0..10 {
            c.mark_failure("rate limited", 429, &cfg);
        }
        assert_eq!(c.failure_weight, 10.0);
    }

    #[test]
    fn auto_bans_after_429_threshold() {
        let mut c = Credential::new_oauth("a", "file");
        let cfg = ban_cfg();
        for _ in 0..3 {
            c.mark_failure("rate limited", 429, &cfg);
        }
        assert!(c.auto_banned);
        assert_eq!(
            c.banned_reason.as_deref(),
            Some("Rate limit exceeded (429) (rate limited)")
        );
        assert_eq!(c.ban_until, c.banned_at.map(|b| b + Duration::minutes(30)));
    }

    #[test]
    fn recover_clears_ban_state() {
        let mut c = Credential::new_oauth("a", "file");
        let cfg = ban_cfg();
        for _ in 0..3 {
            c.mark_failure("rate limited", 429, &cfg);
        }
        assert!(c.auto_banned);
        c.ban_until = Some(Utc::now() - Duration::seconds(1));
        assert!(c.can_recover());
        c.recover();
        assert!(!c.auto_banned);
        assert_eq!(c.consecutive_fails, 0);
        assert_eq!(c.failure_weight, 0.0);
        assert!(c.status_code_counts.is_empty());
    }

    #[test]
    fn rotation_threshold_zero_never_triggers() {
        let mut c = Credential::new_oauth("a", "file");
        c.calls_since_rotation = 1_000_000;
        assert!(!c.should_rotate(0));
    }

    #[test]
    fn snapshot_restore_round_trips() {
        let mut c = Credential::new_oauth("a", "file");
        c.mark_failure("boom", 500, &ban_cfg());
        let state = c.snapshot_state();
        let mut restored = Credential::new_oauth("a", "file");
        restored.restore_state(state.clone());
        assert_eq!(restored.snapshot_state(), state);
    }
}
