pub mod file_store;

pub use file_store::FileStateStore;

use async_trait::async_trait;

use crate::credential::{Credential, CredentialState};
use crate::error::CoreError;

/// A minimal key-value facade for `CredentialState`, independent of the `sources` hierarchy.
/// Used when the configured credential source is not itself `CredentialStateful`, or when the
/// operator wants a single store regardless of which source produced a credential.
///
/// Precedence between this and a `CredentialStateful` source: a configured `StateStore` always
/// wins; source-level write-back is used only when no standalone store is configured. See
/// `manager::actor` for where that choice is made.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn persist(&self, cred: &Credential, state: &CredentialState) -> Result<(), CoreError>;
    async fn restore(&self, cred: &Credential) -> Result<Option<CredentialState>, CoreError>;
    async fn delete(&self, id: &str) -> Result<(), CoreError>;
}
