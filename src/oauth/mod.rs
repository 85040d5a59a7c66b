pub mod coordinator;
pub mod refresher;

pub use coordinator::RefreshCoordinator;
pub use refresher::OauthRefresher;

use async_trait::async_trait;
use std::sync::Arc;

use crate::credential::Credential;
use crate::error::CoreError;
use crate::sources::CredentialWriter;

/// Thin interface the OAuth Refresher needs from the Credential Manager.
///
/// Breaking the Manager↔Refresher cycle this way (rather than handing the refresher the full
/// manager) keeps the refresher's needs narrow: read one record, write one record back, and
/// enumerate oauth records for the proactive sweep.
#[async_trait]
pub trait CredentialLookup: Send + Sync {
    async fn snapshot(&self, id: &str) -> Option<Credential>;
    async fn all_oauth_snapshots(&self) -> Vec<Credential>;
    async fn apply_refresh(
        &self,
        id: &str,
        access_token: String,
        refresh_token: Option<String>,
        expires_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), CoreError>;
    async fn source_for(&self, id: &str) -> Option<Arc<dyn CredentialWriter>>;
}
