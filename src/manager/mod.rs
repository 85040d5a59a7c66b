pub mod actor;
pub mod events;
pub mod pool;
pub mod recovery;
pub mod reload;

pub use actor::{ManagerHandle, spawn};
pub use events::{CredentialEvent, CredentialSummary, EventPublisher};
pub use pool::Pool;

use std::sync::Arc;

use crate::sources::{CredentialReader, CredentialStateful, CredentialWriter};

/// A registered credential source, exposing whichever capability tiers it supports.
/// Built at the composition root, where the concrete source type is still known.
pub struct SourceHandle {
    pub reader: Arc<dyn CredentialReader>,
    pub writer: Option<Arc<dyn CredentialWriter>>,
    pub stateful: Option<Arc<dyn CredentialStateful>>,
}

impl SourceHandle {
    pub fn name(&self) -> &str {
        self.reader.name()
    }
}
