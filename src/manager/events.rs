use serde::Serialize;
use tokio::sync::broadcast;

use crate::credential::{Credential, CredentialKind};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Scrubbed summary of a credential for event consumers — no tokens or secrets.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialSummary {
    pub id: String,
    pub kind: CredentialKind,
    pub source_tag: String,
    pub disabled: bool,
    pub auto_banned: bool,
    pub health_score: f64,
    pub success_count: u64,
    pub failure_count: u64,
    pub total_requests: u64,
}

impl From<&Credential> for CredentialSummary {
    fn from(c: &Credential) -> Self {
        Self {
            id: c.id.clone(),
            kind: c.kind,
            source_tag: c.source_tag.clone(),
            disabled: c.disabled,
            auto_banned: c.auto_banned,
            health_score: c.health_score,
            success_count: c.success_count,
            failure_count: c.failure_count,
            total_requests: c.total_requests,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub enum CredentialEvent {
    Changed(CredentialSummary),
    Deleted(String),
    Snapshot(Vec<CredentialSummary>),
}

/// Broadcasts credential lifecycle events to whoever is listening (admin UI, metrics exporter,
/// log fan-out — all external collaborators). Publishing with no subscribers is a no-op;
/// `broadcast::Sender::send` errors are deliberately ignored.
#[derive(Clone)]
pub struct EventPublisher {
    tx: broadcast::Sender<CredentialEvent>,
}

impl EventPublisher {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CredentialEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: CredentialEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new()
    }
}
