use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Per-status penalty added to `failure_weight` on a single failure (§4.A.1).
pub fn severity_penalty(status_code: u16) -> f64 {
    match status_code {
        429 => 2.5,
        401 => 2.2,
        403 => 1.8,
        500 | 502 | 503 => 1.2,
        500..=599 => 1.0,
        400..=499 => 0.8,
        _ => 0.5,
    }
}

/// Exponential decay toward zero with the given half-life, snapping sub-0.05 values to 0.
///
/// `aggressive` selects the 5-minute half-life used by `mark_success`; otherwise the normal
/// 10-minute half-life applies (§4.A.3).
pub fn decay_failure_weight(
    weight: f64,
    last_decay: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    aggressive: bool,
) -> f64 {
    if weight <= 0.0 {
        return 0.0;
    }
    let Some(last) = last_decay else {
        return weight;
    };
    let elapsed_secs = (now - last).num_milliseconds().max(0) as f64 / 1000.0;
    let half_life_secs = if aggressive { 5.0 * 60.0 } else { 10.0 * 60.0 };
    let decayed = weight * 0.5_f64.powf(elapsed_secs / half_life_secs);
    if decayed < 0.05 { 0.0 } else { decayed }
}

/// Inputs to the health-score formula, decoupled from the `Credential` struct so the formula
/// can be unit tested without constructing a full record.
pub struct ScoreInputs<'a> {
    pub success_count: u64,
    pub total_requests: u64,
    pub disabled: bool,
    pub auto_banned: bool,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub consecutive_fails: u32,
    pub status_code_counts: &'a HashMap<u16, u32>,
    pub daily_limit: u64,
    pub daily_usage: u64,
    pub failure_weight: f64,
    pub now: DateTime<Utc>,
}

/// §4.A.2 score formula: a product of independent [0,1]-ish components, clamped to [0,1].
pub fn compute_score(inputs: &ScoreInputs) -> f64 {
    let success_rate = if inputs.disabled || inputs.auto_banned || inputs.total_requests == 0 {
        0.0
    } else {
        inputs.success_count as f64 / inputs.total_requests.max(1) as f64
    };

    let recency_penalty = match inputs.last_failure {
        Some(t) => {
            let mins = (inputs.now - t).num_milliseconds().max(0) as f64 / 60_000.0;
            if mins >= 10.0 { 1.0 } else { mins / 10.0 }
        }
        None => 1.0,
    };

    let recency_bonus = match inputs.last_success {
        Some(t) if (inputs.now - t).num_milliseconds().max(0) as f64 / 60_000.0 < 5.0 => 1.2,
        _ => 1.0,
    };

    let consecutive_penalty = 1.0 / (1.0 + 0.2 * inputs.consecutive_fails as f64);

    let mut error_penalty = 1.0_f64;
    if inputs.status_code_counts.get(&429).copied().unwrap_or(0) > 0 {
        error_penalty *= 0.5;
    }
    if inputs.status_code_counts.get(&403).copied().unwrap_or(0) > 0 {
        error_penalty *= 0.7;
    }
    if inputs.status_code_counts.get(&500).copied().unwrap_or(0) > 2 {
        error_penalty *= 0.8;
    }

    let quota_penalty = if inputs.daily_limit == 0 {
        1.0
    } else {
        let ratio = inputs.daily_usage as f64 / inputs.daily_limit as f64;
        if ratio > 0.9 {
            0.1
        } else if ratio > 0.75 {
            0.5
        } else if ratio > 0.5 {
            0.8
        } else {
            1.0
        }
    };

    let failure_penalty = 1.0 / (1.0 + inputs.failure_weight);

    let score = success_rate
        * recency_penalty
        * recency_bonus
        * consecutive_penalty
        * error_penalty
        * quota_penalty
        * failure_penalty;

    score.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn decay_halves_every_half_life() {
        let now = Utc::now();
        let last = now - Duration::minutes(30);
        let decayed = decay_failure_weight(5.0, Some(last), now, false);
        let expected = 5.0 * 0.5_f64.powi(3);
        assert!((decayed - expected).abs() < expected * 0.01);
    }

    #[test]
    fn decay_snaps_small_values_to_zero() {
        let now = Utc::now();
        let last = now - Duration::hours(5);
        let decayed = decay_failure_weight(0.1, Some(last), now, false);
        assert_eq!(decayed, 0.0);
    }

    #[test]
    fn score_is_zero_with_no_requests() {
        let counts = HashMap::new();
        let inputs = ScoreInputs {
            success_count: 0,
            total_requests: 0,
            disabled: false,
            auto_banned: false,
            last_failure: None,
            last_success: None,
            consecutive_fails: 0,
            status_code_counts: &counts,
            daily_limit: 0,
            daily_usage: 0,
            failure_weight: 0.0,
            now: Utc::now(),
        };
        assert_eq!(compute_score(&inputs), 0.0);
    }

    #[test]
    fn score_clamped_and_penalized_by_rate_limit_history() {
        let mut counts = HashMap::new();
        counts.insert(429u16, 1u32);
        let now = Utc::now();
        let inputs = ScoreInputs {
            success_count: 9,
            total_requests: 10,
            disabled: false,
            auto_banned: false,
            last_failure: Some(now - Duration::minutes(20)),
            last_success: Some(now - Duration::seconds(1)),
            consecutive_fails: 0,
            status_code_counts: &counts,
            daily_limit: 0,
            daily_usage: 0,
            failure_weight: 0.0,
            now,
        };
        let score = compute_score(&inputs);
        // success_rate=0.9 * 1.0 * 1.2 * 1.0 * 0.5 * 1.0 * 1.0 = 0.54
        assert!((score - 0.54).abs() < 1e-9);
    }
}
