//! Routing Strategy: picks the first credential for a request, remembers sticky bindings, and
//! brokers the single 401-compensation refresh.
//!
//! The Manager actor already owns rotation/health/scoring; this is a thin struct in front of it,
//! a small stateless-ish collaborator rather than another actor. Stickiness uses a plain
//! `tokio::sync::Mutex<HashMap>` rather than `dashmap`, since nothing else in this codebase's
//! dependency stack pulls it in.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::credential::Credential;
use crate::error::CoreError;
use crate::manager::ManagerHandle;
use crate::oauth::{CredentialLookup, OauthRefresher};

/// Opaque sticky-routing key, derived by the caller (Dispatcher) from whatever passthrough
/// header it treats as a session hint. The Strategy never inspects the request body.
pub type StickyKey = String;

const STICKY_TTL: Duration = Duration::from_secs(600);
const STICKY_MAX_ENTRIES: usize = 10_000;

struct StickyEntry {
    credential_id: String,
    bound_at: Instant,
}

pub struct RoutingStrategy {
    manager: Arc<ManagerHandle>,
    oauth: Arc<OauthRefresher>,
    sticky: Mutex<HashMap<StickyKey, StickyEntry>>,
}

impl RoutingStrategy {
    pub fn new(manager: Arc<ManagerHandle>, oauth: Arc<OauthRefresher>) -> Self {
        Self {
            manager,
            oauth,
            sticky: Mutex::new(HashMap::new()),
        }
    }

    /// Pick a credential for a new request. `sticky_key`, when present, is honored if the bound
    /// credential is still healthy and the binding hasn't expired.
    pub async fn pick(&self, sticky_key: Option<&StickyKey>) -> Result<Credential, CoreError> {
        if let Some(key) = sticky_key {
            if let Some(id) = self.bound_healthy_credential(key).await {
                if let Some(cred) = self.manager.snapshot(&id).await {
                    return Ok(cred);
                }
            }
        }

        let credential = self.manager.get_credential().await?;

        if let Some(key) = sticky_key {
            self.bind(key.clone(), credential.id.clone()).await;
        }

        Ok(credential)
    }

    async fn bound_healthy_credential(&self, key: &StickyKey) -> Option<String> {
        let sticky = self.sticky.lock().await;
        let entry = sticky.get(key)?;
        if entry.bound_at.elapsed() > STICKY_TTL {
            return None;
        }
        Some(entry.credential_id.clone())
    }

    async fn bind(&self, key: StickyKey, credential_id: String) {
        let mut sticky = self.sticky.lock().await;
        if sticky.len() >= STICKY_MAX_ENTRIES {
            prune_expired(&mut sticky);
        }
        sticky.insert(
            key,
            StickyEntry {
                credential_id,
                bound_at: Instant::now(),
            },
        );
    }

    /// Notified by the Dispatcher after every upstream attempt. Clears a sticky binding once its
    /// credential has gone unhealthy, so the next pick re-resolves through the Manager.
    pub async fn on_result(&self, sticky_key: Option<&StickyKey>, credential_id: &str, success: bool) {
        if success {
            return;
        }
        let Some(key) = sticky_key else { return };
        let mut sticky = self.sticky.lock().await;
        if sticky.get(key).is_some_and(|e| e.credential_id == credential_id) {
            sticky.remove(key);
        }
    }

    /// One-shot 401 compensation: refresh the given credential and return the refreshed clone.
    pub async fn compensate_401(&self, credential_id: &str) -> Result<Credential, CoreError> {
        let lookup: Arc<dyn CredentialLookup> = self.manager.clone();
        self.oauth
            .refresh(credential_id, lookup)
            .await
            .map_err(|err| CoreError::Upstream {
                status: 401,
                body: err.to_string(),
            })
    }
}

fn prune_expired(sticky: &mut HashMap<StickyKey, StickyEntry>) {
    sticky.retain(|_, entry| entry.bound_at.elapsed() <= STICKY_TTL);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prune_removes_only_expired_entries() {
        let mut sticky = HashMap::new();
        sticky.insert(
            "fresh".to_string(),
            StickyEntry {
                credential_id: "a".to_string(),
                bound_at: Instant::now(),
            },
        );
        sticky.insert(
            "stale".to_string(),
            StickyEntry {
                credential_id: "b".to_string(),
                bound_at: Instant::now() - STICKY_TTL - Duration::from_secs(1),
            },
        );
        prune_expired(&mut sticky);
        assert!(sticky.contains_key("fresh"));
        assert!(!sticky.contains_key("stale"));
    }
}
