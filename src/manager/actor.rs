use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Semaphore, broadcast};
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::credential::Credential;
use crate::error::CoreError;
use crate::oauth::{CredentialLookup, OauthRefresher};
use crate::sources::CredentialWriter;
use crate::store::StateStore;

use super::{CredentialEvent, CredentialSummary, EventPublisher, Pool, SourceHandle};

#[derive(Debug)]
pub enum ManagerMessage {
    GetCredential(RpcReplyPort<Result<Credential, CoreError>>),
    GetAlternate(String, RpcReplyPort<Result<Credential, CoreError>>),
    Snapshot(String, RpcReplyPort<Option<Credential>>),
    ListSnapshots(RpcReplyPort<Vec<Credential>>),
    PoolSize(RpcReplyPort<usize>),
    AllOauthSnapshots(RpcReplyPort<Vec<Credential>>),
    SemaphoreFor(String, RpcReplyPort<Option<Arc<Semaphore>>>),
    MarkSuccess(String),
    MarkFailure {
        id: String,
        reason: String,
        status: u16,
    },
    Enable(String, RpcReplyPort<Result<(), CoreError>>),
    Disable(String, RpcReplyPort<Result<(), CoreError>>),
    Delete(String, RpcReplyPort<Result<(), CoreError>>),
    CleanupExpired(RpcReplyPort<usize>),
    ApplyRefresh(
        String,
        String,
        Option<String>,
        DateTime<Utc>,
        RpcReplyPort<Result<(), CoreError>>,
    ),
    SourceFor(String, RpcReplyPort<Option<Arc<dyn CredentialWriter>>>),
    RecoveryTick,
    ReloadNow,
    Subscribe(RpcReplyPort<broadcast::Receiver<CredentialEvent>>),
}

/// Handle for interacting with the Credential Manager actor.
#[derive(Clone)]
pub struct ManagerHandle {
    actor: ActorRef<ManagerMessage>,
}

impl ManagerHandle {
    pub async fn get_credential(&self) -> Result<Credential, CoreError> {
        ractor::call!(self.actor, ManagerMessage::GetCredential)
            .map_err(|e| CoreError::RactorError(format!("GetCredential RPC failed: {e}")))?
    }

    pub async fn get_alternate(&self, exclude_id: &str) -> Result<Credential, CoreError> {
        ractor::call!(
            self.actor,
            ManagerMessage::GetAlternate,
            exclude_id.to_string()
        )
        .map_err(|e| CoreError::RactorError(format!("GetAlternate RPC failed: {e}")))?
    }

    pub async fn snapshot(&self, id: &str) -> Option<Credential> {
        ractor::call!(self.actor, ManagerMessage::Snapshot, id.to_string())
            .unwrap_or(None)
    }

    pub async fn list_snapshots(&self) -> Vec<Credential> {
        ractor::call!(self.actor, ManagerMessage::ListSnapshots).unwrap_or_default()
    }

    /// Number of credentials currently in the pool, used by the Engine to size its
    /// per-request rotation budget.
    pub async fn pool_size(&self) -> usize {
        ractor::call!(self.actor, ManagerMessage::PoolSize).unwrap_or(0)
    }

    pub async fn semaphore_for(&self, id: &str) -> Option<Arc<Semaphore>> {
        ractor::call!(self.actor, ManagerMessage::SemaphoreFor, id.to_string())
            .ok()
            .flatten()
    }

    pub fn mark_success(&self, id: &str) {
        let _ = ractor::cast!(self.actor, ManagerMessage::MarkSuccess(id.to_string()));
    }

    pub fn mark_failure(&self, id: &str, reason: &str, status: u16) {
        let _ = ractor::cast!(
            self.actor,
            ManagerMessage::MarkFailure {
                id: id.to_string(),
                reason: reason.to_string(),
                status,
            }
        );
    }

    pub async fn enable(&self, id: &str) -> Result<(), CoreError> {
        ractor::call!(self.actor, ManagerMessage::Enable, id.to_string())
            .map_err(|e| CoreError::RactorError(format!("Enable RPC failed: {e}")))?
    }

    pub async fn disable(&self, id: &str) -> Result<(), CoreError> {
        ractor::call!(self.actor, ManagerMessage::Disable, id.to_string())
            .map_err(|e| CoreError::RactorError(format!("Disable RPC failed: {e}")))?
    }

    pub async fn delete(&self, id: &str) -> Result<(), CoreError> {
        ractor::call!(self.actor, ManagerMessage::Delete, id.to_string())
            .map_err(|e| CoreError::RactorError(format!("Delete RPC failed: {e}")))?
    }

    /// Batch variant of enable/disable/delete: apply to every id, collecting per-id results.
    pub async fn enable_many(&self, ids: &[String]) -> Vec<(String, Result<(), CoreError>)> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            out.push((id.clone(), self.enable(id).await));
        }
        out
    }

    pub async fn disable_many(&self, ids: &[String]) -> Vec<(String, Result<(), CoreError>)> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            out.push((id.clone(), self.disable(id).await));
        }
        out
    }

    pub async fn delete_many(&self, ids: &[String]) -> Vec<(String, Result<(), CoreError>)> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            out.push((id.clone(), self.delete(id).await));
        }
        out
    }

    pub async fn cleanup_expired(&self) -> usize {
        ractor::call!(self.actor, ManagerMessage::CleanupExpired).unwrap_or(0)
    }

    pub fn reload_now(&self) {
        let _ = ractor::cast!(self.actor, ManagerMessage::ReloadNow);
    }

    fn recovery_tick(&self) {
        let _ = ractor::cast!(self.actor, ManagerMessage::RecoveryTick);
    }

    pub async fn subscribe(&self) -> Option<broadcast::Receiver<CredentialEvent>> {
        ractor::call!(self.actor, ManagerMessage::Subscribe).ok()
    }
}

#[async_trait]
impl CredentialLookup for ManagerHandle {
    async fn snapshot(&self, id: &str) -> Option<Credential> {
        ManagerHandle::snapshot(self, id).await
    }

    async fn all_oauth_snapshots(&self) -> Vec<Credential> {
        ractor::call!(self.actor, ManagerMessage::AllOauthSnapshots).unwrap_or_default()
    }

    async fn apply_refresh(
        &self,
        id: &str,
        access_token: String,
        refresh_token: Option<String>,
        expires_at: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        ractor::call!(
            self.actor,
            ManagerMessage::ApplyRefresh,
            id.to_string(),
            access_token,
            refresh_token,
            expires_at
        )
        .map_err(|e| CoreError::RactorError(format!("ApplyRefresh RPC failed: {e}")))?
    }

    async fn source_for(&self, id: &str) -> Option<Arc<dyn CredentialWriter>> {
        ractor::call!(self.actor, ManagerMessage::SourceFor, id.to_string())
            .ok()
            .flatten()
    }
}

struct ManagerState {
    pool: Pool,
    sources: Vec<SourceHandle>,
    state_store: Option<Arc<dyn StateStore>>,
    events: EventPublisher,
    config: Arc<PoolConfig>,
    oauth: Arc<OauthRefresher>,
}

impl ManagerState {
    fn writer_for(&self, id: &str) -> Option<Arc<dyn CredentialWriter>> {
        let tag = self.pool.source_tag(id)?;
        self.sources
            .iter()
            .find(|s| s.name() == tag)
            .and_then(|s| s.writer.clone())
    }

    fn stateful_for(&self, id: &str) -> Option<Arc<dyn crate::sources::CredentialStateful>> {
        let tag = self.pool.source_tag(id)?;
        self.sources
            .iter()
            .find(|s| s.name() == tag)
            .and_then(|s| s.stateful.clone())
    }

    /// Schedule an out-of-band persist for `id`. A configured `StateStore` always wins over
    /// source write-back.
    fn spawn_persist(&self, id: &str, force: bool, now: DateTime<Utc>) {
        let Some(cred) = self.pool.find(id) else {
            return;
        };
        if !force && self.pool.should_debounce(id, now) {
            return;
        }
        let state = cred.snapshot_state();
        let cred_clone = cred.clone();

        if let Some(store) = self.state_store.clone() {
            tokio::spawn(async move {
                if let Err(err) = store.persist(&cred_clone, &state).await {
                    warn!(credential_id = %cred_clone.id, error = %err, "state store persist failed");
                }
            });
            return;
        }

        if let Some(stateful) = self.stateful_for(id) {
            let id = id.to_string();
            tokio::spawn(async move {
                if let Err(err) = stateful.persist_state(&id, &state).await {
                    warn!(credential_id = %id, error = %err, "source state persist failed");
                }
            });
        }
    }

    fn emit_changed(&self, id: &str) {
        if let Some(cred) = self.pool.find(id) {
            self.events
                .publish(CredentialEvent::Changed(CredentialSummary::from(cred)));
        }
    }

    fn emit_snapshot(&self) {
        let summaries = self.pool.all().iter().map(CredentialSummary::from).collect();
        self.events.publish(CredentialEvent::Snapshot(summaries));
    }
}

pub struct ManagerActor;

#[ractor::async_trait]
impl Actor for ManagerActor {
    type Msg = ManagerMessage;
    type State = ManagerState;
    type Arguments = (
        Vec<SourceHandle>,
        Option<Arc<dyn StateStore>>,
        Arc<PoolConfig>,
        Arc<OauthRefresher>,
    );

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        (sources, state_store, config, oauth): Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let mut pool = Pool::new(config.max_concurrent_per_credential);
        let (credentials, source_tags) = load_from_sources(&sources, state_store.as_deref()).await;
        if credentials.is_empty() {
            return Err(ActorProcessingErr::from(
                "credential pool is empty after loading all sources".to_string(),
            ));
        }
        pool.load(credentials, source_tags);

        let state = ManagerState {
            pool,
            sources,
            state_store,
            events: EventPublisher::new(),
            config: config.clone(),
            oauth,
        };
        state.emit_snapshot();

        if config.auto_recovery_enabled {
            let handle = ManagerHandle {
                actor: myself.clone(),
            };
            let interval = std::time::Duration::from_secs(config.auto_recovery_interval_secs.max(1));
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    ticker.tick().await;
                    handle.recovery_tick();
                }
            });
        }

        Ok(state)
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            ManagerMessage::GetCredential(reply) => {
                let result = state.pool.get_credential(state.config.rotation_threshold);
                let _ = reply.send(result);
            }
            ManagerMessage::GetAlternate(exclude_id, reply) => {
                let result = state.pool.get_alternate(&exclude_id);
                let _ = reply.send(result);
            }
            ManagerMessage::Snapshot(id, reply) => {
                let _ = reply.send(state.pool.find(&id).cloned());
            }
            ManagerMessage::ListSnapshots(reply) => {
                let _ = reply.send(state.pool.all().to_vec());
            }
            ManagerMessage::PoolSize(reply) => {
                let _ = reply.send(state.pool.len());
            }
            ManagerMessage::AllOauthSnapshots(reply) => {
                let snapshots = state
                    .pool
                    .all()
                    .iter()
                    .filter(|c| c.is_oauth())
                    .cloned()
                    .collect();
                let _ = reply.send(snapshots);
            }
            ManagerMessage::SemaphoreFor(id, reply) => {
                let _ = reply.send(state.pool.semaphore(&id));
            }
            ManagerMessage::MarkSuccess(id) => {
                if let Some(cred) = state.pool.find_mut(&id) {
                    cred.mark_success();
                }
                state.spawn_persist(&id, false, Utc::now());
                state.emit_changed(&id);
            }
            ManagerMessage::MarkFailure { id, reason, status } => {
                if let Some(cred) = state.pool.find_mut(&id) {
                    cred.mark_failure(&reason, status, &state.config.auto_ban);
                }
                state.spawn_persist(&id, true, Utc::now());
                state.emit_changed(&id);
            }
            ManagerMessage::Enable(id, reply) => {
                let result = match state.pool.find_mut(&id) {
                    Some(cred) => {
                        cred.disabled = false;
                        Ok(())
                    }
                    None => Err(CoreError::NotFound(id.clone())),
                };
                if result.is_ok() {
                    state.emit_changed(&id);
                }
                let _ = reply.send(result);
            }
            ManagerMessage::Disable(id, reply) => {
                let result = match state.pool.find_mut(&id) {
                    Some(cred) => {
                        cred.disabled = true;
                        Ok(())
                    }
                    None => Err(CoreError::NotFound(id.clone())),
                };
                if result.is_ok() {
                    state.emit_changed(&id);
                }
                let _ = reply.send(result);
            }
            ManagerMessage::Delete(id, reply) => {
                let writer = state.writer_for(&id);
                let stateful = state.stateful_for(&id);
                let state_store = state.state_store.clone();
                let removed = state.pool.delete(&id);
                let result = if removed {
                    Ok(())
                } else {
                    Err(CoreError::NotFound(id.clone()))
                };
                if removed {
                    let id_for_task = id.clone();
                    tokio::spawn(async move {
                        if let Some(writer) = writer {
                            if let Err(err) = writer.delete(&id_for_task).await {
                                warn!(credential_id = %id_for_task, error = %err, "source delete failed");
                            }
                        }
                        if let Some(store) = state_store {
                            if let Err(err) = store.delete(&id_for_task).await {
                                warn!(credential_id = %id_for_task, error = %err, "state store delete failed");
                            }
                        } else if let Some(stateful) = stateful {
                            if let Err(err) = stateful.delete_state(&id_for_task).await {
                                warn!(credential_id = %id_for_task, error = %err, "source state delete failed");
                            }
                        }
                    });
                    state.events.publish(CredentialEvent::Deleted(id.clone()));
                }
                let _ = reply.send(result);
            }
            ManagerMessage::CleanupExpired(reply) => {
                let now = Utc::now();
                let before = state.pool.len();
                let expired_ids: Vec<String> = state
                    .pool
                    .all()
                    .iter()
                    .filter(|c| {
                        c.is_oauth() && c.refresh_token.is_none() && c.is_token_expired(now)
                    })
                    .map(|c| c.id.clone())
                    .collect();
                for id in &expired_ids {
                    // In-memory removal only: backing files/state are left for the operator.
                    state.pool.delete(id);
                }
                let removed = before - state.pool.len();
                if removed > 0 {
                    info!(removed, "cleaned up expired unrefreshable oauth credentials");
                    state.emit_snapshot();
                }
                let _ = reply.send(removed);
            }
            ManagerMessage::ApplyRefresh(id, access_token, refresh_token, expires_at, reply) => {
                let result = match state.pool.find_mut(&id) {
                    Some(cred) => {
                        cred.access_token = Some(access_token);
                        if refresh_token.is_some() {
                            cred.refresh_token = refresh_token;
                        }
                        cred.expires_at = Some(expires_at);
                        Ok(())
                    }
                    None => Err(CoreError::NotFound(id.clone())),
                };
                let _ = reply.send(result);
            }
            ManagerMessage::SourceFor(id, reply) => {
                let _ = reply.send(state.writer_for(&id));
            }
            ManagerMessage::RecoveryTick => {
                run_recovery_tick(state).await;
            }
            ManagerMessage::ReloadNow => {
                let (credentials, source_tags) =
                    load_from_sources(&state.sources, state.state_store.as_deref()).await;
                if credentials.is_empty() {
                    warn!("reload produced an empty credential set; keeping current pool");
                } else {
                    state.pool.load(credentials, source_tags);
                    state.emit_snapshot();
                    info!("credential pool reloaded from sources");
                }
            }
            ManagerMessage::Subscribe(reply) => {
                let _ = reply.send(state.events.subscribe());
            }
        }
        Ok(())
    }
}

/// Auto-recovery: for every credential where `can_recover()` holds, refresh first if the oauth
/// token has expired and a refresh token is present, then `recover()` and persist.
async fn run_recovery_tick(state: &mut ManagerState) {
    let recoverable = super::recovery::recoverable_ids(state.pool.all());
    let now = Utc::now();

    for id in recoverable {
        let needs_refresh = state
            .pool
            .find(&id)
            .is_some_and(|cred| cred.is_oauth() && cred.refresh_token.is_some() && cred.is_token_expired(now));

        if needs_refresh {
            let cred = state.pool.find(&id).cloned();
            if let Some(cred) = cred {
                match state.oauth.refresh_for_recovery(&cred).await {
                    Ok(refreshed) => {
                        if let Some(cred) = state.pool.find_mut(&id) {
                            cred.access_token = Some(refreshed.access_token.clone());
                            if refreshed.refresh_token.is_some() {
                                cred.refresh_token = refreshed.refresh_token.clone();
                            }
                            cred.expires_at = Some(refreshed.expires_at);
                        }
                        if let Some(writer) = state.writer_for(&id) {
                            if let Some(updated) = state.pool.find(&id).cloned() {
                                if let Err(err) = writer.save(&updated).await {
                                    warn!(credential_id = %id, error = %err, "failed to persist refreshed credential during auto-recovery");
                                }
                            }
                        }
                    }
                    Err(err) => {
                        warn!(credential_id = %id, error = %err, "token refresh failed during auto-recovery");
                    }
                }
            }
        }

        if let Some(cred) = state.pool.find_mut(&id) {
            cred.recover();
        }
        state.spawn_persist(&id, true, Utc::now());
        state.emit_changed(&id);
        debug!(credential_id = %id, "auto-recovered credential");
    }
}

/// Load credentials from every source in order, first-wins by id, restoring persisted state
/// afterward (preferring a standalone `StateStore` over source-level write-back).
async fn load_from_sources(
    sources: &[SourceHandle],
    state_store: Option<&dyn StateStore>,
) -> (Vec<Credential>, HashMap<String, String>) {
    let mut by_id: HashMap<String, Credential> = HashMap::new();
    let mut source_tags: HashMap<String, String> = HashMap::new();

    for source in sources {
        match source.reader.load().await {
            Ok(creds) => {
                for mut cred in creds {
                    if by_id.contains_key(&cred.id) {
                        warn!(
                            credential_id = %cred.id,
                            source = source.name(),
                            "duplicate credential id across sources; first source wins"
                        );
                        continue;
                    }
                    // A configured StateStore always wins; a source's own CredentialStateful
                    // capability is used only as a fallback.
                    if let Some(store) = state_store {
                        if let Ok(Some(state)) = store.restore(&cred).await {
                            cred.restore_state(state);
                        }
                    } else if let Some(stateful) = &source.stateful {
                        if let Ok(Some(state)) = stateful.restore_state(&cred.id).await {
                            cred.restore_state(state);
                        }
                    }
                    source_tags.insert(cred.id.clone(), source.name().to_string());
                    by_id.insert(cred.id.clone(), cred);
                }
            }
            Err(err) => warn!(source = source.name(), error = %err, "credential source load failed"),
        }
    }

    (by_id.into_values().collect(), source_tags)
}

pub async fn spawn(
    sources: Vec<SourceHandle>,
    state_store: Option<Arc<dyn StateStore>>,
    config: Arc<PoolConfig>,
    oauth: Arc<OauthRefresher>,
) -> Result<ManagerHandle, ActorProcessingErr> {
    let (actor, _jh) = Actor::spawn(
        Some("CredentialManager".to_string()),
        ManagerActor,
        (sources, state_store, config, oauth),
    )
    .await
    .map_err(|e| ActorProcessingErr::from(format!("CredentialManager spawn failed: {e}")))?;
    Ok(ManagerHandle { actor })
}
