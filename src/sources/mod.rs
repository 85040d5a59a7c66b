pub mod env;
pub mod file;

use async_trait::async_trait;

use crate::credential::{Credential, CredentialState};
use crate::error::CoreError;

/// Tier 1: a loader that can enumerate credentials. Every source implements this.
#[async_trait]
pub trait CredentialReader: Send + Sync {
    fn name(&self) -> &str;
    async fn load(&self) -> Result<Vec<Credential>, CoreError>;
}

/// Tier 2: a loader that can also write back credential records (e.g. after an onboarding
/// flow mutates `project_id`, or an OAuth refresh rotates `refresh_token`).
#[async_trait]
pub trait CredentialWriter: CredentialReader {
    async fn save(&self, cred: &Credential) -> Result<(), CoreError>;
    async fn delete(&self, id: &str) -> Result<(), CoreError>;
}

/// Tier 3: a loader that additionally owns its own runtime-state persistence, making a
/// separate `StateStore` unnecessary for credentials it produced.
#[async_trait]
pub trait CredentialStateful: CredentialWriter {
    async fn restore_state(&self, id: &str) -> Result<Option<CredentialState>, CoreError>;
    async fn persist_state(&self, id: &str, state: &CredentialState) -> Result<(), CoreError>;
    async fn delete_state(&self, id: &str) -> Result<(), CoreError>;
}

pub use env::EnvSource;
pub use file::FileSource;
