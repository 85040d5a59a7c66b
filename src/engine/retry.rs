//! Single-attempt retry policy and backoff.
//!
//! The teacher drives its retry loop with `backon::ExponentialBuilder` + `.retry()`, but that
//! combinator doesn't give per-status control over whether `Retry-After` should override the
//! computed backoff, which 429/503 handling requires. `backon` stays the project's idiom for
//! plain exponential retries elsewhere (see `oauth::refresher::do_refresh`); here the *decision*
//! — retry or not, and for how long — is a small pure function so it can be unit tested without
//! standing up an HTTP server.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use reqwest::header::HeaderMap;

use crate::config::RetrySettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    Retry,
    Stop,
}

/// Whether a single HTTP attempt that resulted in `status` should be retried (not rotated —
/// rotation is a separate, outer decision made by `engine::mod`).
pub fn decide_for_status(status: u16, cfg: &RetrySettings) -> Attempt {
    if !cfg.enabled {
        return Attempt::Stop;
    }
    match status {
        429 | 503 | 408 | 425 => Attempt::Retry,
        500..=599 if cfg.on_5xx => Attempt::Retry,
        _ => Attempt::Stop,
    }
}

pub fn decide_for_network_error(cfg: &RetrySettings) -> Attempt {
    if cfg.enabled && cfg.on_network_error {
        Attempt::Retry
    } else {
        Attempt::Stop
    }
}

/// Delay before the next attempt: `Retry-After` when present (numeric seconds or HTTP-date),
/// otherwise exponential backoff `base * 2^attempt`, capped at `max_interval`, jittered by a
/// uniform factor in `[0.5, 1.5]`.
pub fn backoff_for(attempt: u32, headers: Option<&HeaderMap>, cfg: &RetrySettings) -> Duration {
    if let Some(retry_after) = headers.and_then(parse_retry_after) {
        return retry_after;
    }

    let base = Duration::from_millis(cfg.interval_ms);
    let max = Duration::from_millis(cfg.max_interval_ms);
    let exp = base.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
    let capped = exp.min(max);

    let jitter = rand::rng().random_range(0.5..=1.5);
    capped.mul_f64(jitter)
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(reqwest::header::RETRY_AFTER)?.to_str().ok()?;

    if let Ok(secs) = value.trim().parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let target: DateTime<Utc> = DateTime::parse_from_rfc2822(value.trim()).ok()?.with_timezone(&Utc);
    let now = Utc::now();
    let delta = (target - now).num_milliseconds();
    Some(Duration::from_millis(delta.max(0) as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> RetrySettings {
        RetrySettings {
            enabled: true,
            max: 3,
            interval_ms: 500,
            max_interval_ms: 15_000,
            on_network_error: true,
            on_5xx: true,
            rotate_on_5xx: false,
        }
    }

    #[test]
    fn retries_429_503_408_425() {
        for status in [429, 503, 408, 425] {
            assert_eq!(decide_for_status(status, &cfg()), Attempt::Retry);
        }
    }

    #[test]
    fn does_not_retry_4xx_other_than_listed() {
        assert_eq!(decide_for_status(404, &cfg()), Attempt::Stop);
        assert_eq!(decide_for_status(400, &cfg()), Attempt::Stop);
    }

    #[test]
    fn respects_on_5xx_toggle() {
        let mut c = cfg();
        c.on_5xx = false;
        assert_eq!(decide_for_status(500, &c), Attempt::Stop);
    }

    #[test]
    fn disabled_policy_never_retries() {
        let mut c = cfg();
        c.enabled = false;
        assert_eq!(decide_for_status(429, &c), Attempt::Stop);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let c = cfg();
        let d0 = backoff_for(0, None, &c);
        let d3 = backoff_for(3, None, &c);
        assert!(d0.as_millis() >= 250 && d0.as_millis() <= 750);
        // base=500ms, attempt=3 => 4000ms before jitter, still under max_interval_ms=15000
        assert!(d3.as_millis() <= 6000);
    }

    #[test]
    fn backoff_caps_at_max_interval() {
        let c = cfg();
        let d = backoff_for(20, None, &c);
        assert!(d.as_millis() as u64 <= (c.max_interval_ms as f64 * 1.5) as u64);
    }

    #[test]
    fn retry_after_numeric_seconds_wins_over_backoff() {
        let mut headers = HeaderMap::new();
        headers.insert(reqwest::header::RETRY_AFTER, "7".parse().unwrap());
        let d = backoff_for(0, Some(&headers), &cfg());
        assert_eq!(d, Duration::from_secs(7));
    }
}
