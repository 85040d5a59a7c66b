use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::credential::{Credential, CredentialState};
use crate::error::CoreError;
use crate::fsutil::{atomic_write, remove_if_exists};

use super::StateStore;

const STATE_SUFFIX: &str = ".state.json";
const FILE_MODE: u32 = 0o600;

/// File-backed `StateStore`: `<id>.state.json`, written via `<id>.state.json.tmp` + rename.
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn state_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}{STATE_SUFFIX}"))
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn persist(&self, cred: &Credential, state: &CredentialState) -> Result<(), CoreError> {
        let bytes = serde_json::to_vec_pretty(state)?;
        atomic_write(&self.state_path(&cred.id), &bytes, FILE_MODE).await
    }

    async fn restore(&self, cred: &Credential) -> Result<Option<CredentialState>, CoreError> {
        let path = self.state_path(&cred.id);
        read_state(&path).await
    }

    async fn delete(&self, id: &str) -> Result<(), CoreError> {
        remove_if_exists(&self.state_path(id)).await
    }
}

async fn read_state(path: &Path) -> Result<Option<CredentialState>, CoreError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::CredentialKind;

    #[tokio::test]
    async fn persist_then_restore_round_trips() {
        let dir = tempdir();
        let store = FileStateStore::new(dir.path());
        let mut cred = Credential::new_oauth("cred-a", "file");
        cred.kind = CredentialKind::Oauth;
        cred.mark_failure("boom", 500, &crate::config::AutoBanSettings::default());
        let state = cred.snapshot_state();

        store.persist(&cred, &state).await.unwrap();
        let restored = store.restore(&cred).await.unwrap();
        assert_eq!(restored, Some(state));
    }

    #[tokio::test]
    async fn restore_missing_is_none() {
        let dir = tempdir();
        let store = FileStateStore::new(dir.path());
        let cred = Credential::new_oauth("missing", "file");
        assert_eq!(store.restore(&cred).await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempdir();
        let store = FileStateStore::new(dir.path());
        store.delete("nonexistent").await.unwrap();
        store.delete("nonexistent").await.unwrap();
    }

    fn tempdir() -> tempfile::TempDir {
        tempfile::tempdir().expect("tempdir")
    }
}
