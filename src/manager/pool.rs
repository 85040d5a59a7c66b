use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::credential::Credential;
use crate::error::CoreError;

const PERSIST_DEBOUNCE: Duration = Duration::seconds(10);

/// Ordered pool of credentials plus the indexes the Manager needs to route requests and
/// debounce persistence.
///
/// Pure in-memory logic, no I/O: the Manager actor is the only thing that mutates it, so it
/// needs no internal locking of its own — the actor's single-threaded mailbox is the lock.
pub struct Pool {
    credentials: Vec<Credential>,
    current_index: usize,
    id_source: HashMap<String, String>,
    id_semaphore: HashMap<String, Arc<Semaphore>>,
    id_last_persist: HashMap<String, DateTime<Utc>>,
    max_concurrent_per_credential: usize,
}

impl Pool {
    pub fn new(max_concurrent_per_credential: usize) -> Self {
        Self {
            credentials: Vec::new(),
            current_index: 0,
            id_source: HashMap::new(),
            id_semaphore: HashMap::new(),
            id_last_persist: HashMap::new(),
            max_concurrent_per_credential,
        }
    }

    /// Replace the pool contents, sorted by id for reproducible reloads.
    pub fn load(&mut self, mut credentials: Vec<Credential>, source_tags: HashMap<String, String>) {
        credentials.sort_by(|a, b| a.id.cmp(&b.id));
        for cred in &credentials {
            self.id_semaphore
                .entry(cred.id.clone())
                .or_insert_with(|| Arc::new(new_semaphore(self.max_concurrent_per_credential)));
        }
        self.id_source = source_tags;
        self.credentials = credentials;
        self.current_index = 0;
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    pub fn find(&self, id: &str) -> Option<&Credential> {
        self.credentials.iter().find(|c| c.id == id)
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut Credential> {
        self.credentials.iter_mut().find(|c| c.id == id)
    }

    pub fn all(&self) -> &[Credential] {
        &self.credentials
    }

    pub fn source_tag(&self, id: &str) -> Option<&str> {
        self.id_source.get(id).map(String::as_str)
    }

    pub fn semaphore(&mut self, id: &str) -> Option<Arc<Semaphore>> {
        if self.find(id).is_none() {
            return None;
        }
        Some(
            self.id_semaphore
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(new_semaphore(self.max_concurrent_per_credential)))
                .clone(),
        )
    }

    pub fn delete(&mut self, id: &str) -> bool {
        let before = self.credentials.len();
        self.credentials.retain(|c| c.id != id);
        self.id_source.remove(id);
        self.id_semaphore.remove(id);
        self.id_last_persist.remove(id);
        self.credentials.len() != before
    }

    /// §4.E round-robin pick: skip credentials due for rotation, return the first healthy one;
    /// if none, fall back to the highest-scoring non-disabled record (degraded mode).
    pub fn get_credential(&mut self, rotation_threshold: u64) -> Result<Credential, CoreError> {
        if self.credentials.is_empty() {
            return Err(CoreError::NoAvailableCredential);
        }
        let len = self.credentials.len();
        for step in 0..len {
            let idx = (self.current_index + step) % len;
            let cred = &self.credentials[idx];
            if cred.should_rotate(rotation_threshold) {
                // Skipping it for rotation is the rotation event itself (§3.1 invariant v:
                // "calls_since_rotation resets on rotation only").
                self.credentials[idx].calls_since_rotation = 0;
                continue;
            }
            if cred.is_healthy() {
                self.current_index = (idx + 1) % len;
                self.credentials[idx].calls_since_rotation += 1;
                return Ok(self.credentials[idx].clone());
            }
        }

        let mut best: Option<usize> = None;
        let mut best_score = -1.0_f64;
        for (idx, cred) in self.credentials.iter_mut().enumerate() {
            if cred.disabled {
                continue;
            }
            let score = cred.get_score();
            if score > best_score {
                best_score = score;
                best = Some(idx);
            }
        }

        match best {
            Some(idx) => {
                self.current_index = (idx + 1) % len;
                self.credentials[idx].calls_since_rotation += 1;
                Ok(self.credentials[idx].clone())
            }
            None => Err(CoreError::NoAvailableCredential),
        }
    }

    /// §4.E alternate pick: healthy, non-disabled, excluding `exclude_id`; else any non-disabled.
    /// The excluded credential is the one the caller is rotating away from; its own call-count
    /// streak resets, since a mid-request rotation is a rotation event too.
    pub fn get_alternate(&mut self, exclude_id: &str) -> Result<Credential, CoreError> {
        let len = self.credentials.len();
        if len == 0 {
            return Err(CoreError::NoAvailableCredential);
        }
        if let Some(excluded) = self.find_mut(exclude_id) {
            excluded.calls_since_rotation = 0;
        }

        for step in 0..len {
            let idx = (self.current_index + step) % len;
            let cred = &self.credentials[idx];
            if cred.id == exclude_id || cred.disabled {
                continue;
            }
            if cred.is_healthy() {
                self.current_index = (idx + 1) % len;
                self.credentials[idx].calls_since_rotation += 1;
                return Ok(self.credentials[idx].clone());
            }
        }

        for step in 0..len {
            let idx = (self.current_index + step) % len;
            let cred = &self.credentials[idx];
            if cred.id == exclude_id || cred.disabled {
                continue;
            }
            self.current_index = (idx + 1) % len;
            self.credentials[idx].calls_since_rotation += 1;
            return Ok(self.credentials[idx].clone());
        }

        Err(CoreError::NoAvailableCredential)
    }

    /// True if persisting `id` now would be within the 10s debounce window of its last persist.
    pub fn should_debounce(&self, id: &str, now: DateTime<Utc>) -> bool {
        self.id_last_persist
            .get(id)
            .is_some_and(|last| now - *last < PERSIST_DEBOUNCE)
    }

    pub fn record_persist(&mut self, id: &str, now: DateTime<Utc>) {
        self.id_last_persist.insert(id.to_string(), now);
    }
}

fn new_semaphore(max_concurrent: usize) -> Semaphore {
    if max_concurrent == 0 {
        Semaphore::new(Semaphore::MAX_PERMITS)
    } else {
        Semaphore::new(max_concurrent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::CredentialKind;

    fn cred(id: &str) -> Credential {
        let mut c = Credential::new_oauth(id, "file");
        c.kind = CredentialKind::Oauth;
        c.access_token = Some("at".to_string());
        c
    }

    #[test]
    fn round_robin_advances_and_wraps() {
        let mut pool = Pool::new(0);
        pool.load(vec![cred("a"), cred("b")], HashMap::new());
        let first = pool.get_credential(0).unwrap();
        let second = pool.get_credential(0).unwrap();
        let third = pool.get_credential(0).unwrap();
        assert_eq!(first.id, "a");
        assert_eq!(second.id, "b");
        assert_eq!(third.id, "a");
    }

    #[test]
    fn rotation_threshold_skips_due_credentials() {
        let mut pool = Pool::new(0);
        let mut a = cred("a");
        a.calls_since_rotation = 100;
        pool.load(vec![a, cred("b")], HashMap::new());
        let picked = pool.get_credential(50).unwrap();
        assert_eq!(picked.id, "b");
    }

    #[test]
    fn degraded_mode_picks_highest_score_when_none_healthy() {
        let mut pool = Pool::new(0);
        let mut a = cred("a");
        a.consecutive_fails = 10;
        let mut b = cred("b");
        b.consecutive_fails = 10;
        b.success_count = 5;
        b.total_requests = 5;
        pool.load(vec![a, b], HashMap::new());
        let picked = pool.get_credential(0).unwrap();
        assert_eq!(picked.id, "b");
    }

    #[test]
    fn empty_pool_errors() {
        let mut pool = Pool::new(0);
        assert!(pool.get_credential(0).is_err());
    }

    #[test]
    fn get_alternate_excludes_given_id() {
        let mut pool = Pool::new(0);
        pool.load(vec![cred("a"), cred("b")], HashMap::new());
        let alt = pool.get_alternate("a").unwrap();
        assert_eq!(alt.id, "b");
    }

    #[test]
    fn all_disabled_fails_alternate() {
        let mut pool = Pool::new(0);
        let mut a = cred("a");
        a.disabled = true;
        let mut b = cred("b");
        b.disabled = true;
        pool.load(vec![a, b], HashMap::new());
        assert!(pool.get_alternate("a").is_err());
    }
}
