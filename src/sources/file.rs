use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::credential::{Credential, CredentialKind, CredentialState};
use crate::error::CoreError;
use crate::fsutil::{atomic_write, remove_if_exists};

use super::{CredentialReader, CredentialStateful, CredentialWriter};

const STATE_SUFFIX: &str = ".state.json";
const FILE_MODE: u32 = 0o600;

/// On-disk shape of a `<id>.json` credential file. Permissive: only the fields needed to
/// reconstruct a `Credential` record are required, everything else defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CredentialFile {
    id: Option<String>,
    project_id: Option<String>,
    email: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    access_token: Option<String>,
    refresh_token: Option<String>,
    token_uri: Option<String>,
    expires_at: Option<DateTime<Utc>>,
    api_key: Option<String>,
    daily_limit: Option<u64>,
}

/// Scans a directory for `*.json` credential files (ignoring `*.state.json` siblings),
/// persists runtime state as sibling `<id>.state.json` files, and writes back credential
/// records as `<id>.json` — all via atomic write-then-rename.
pub struct FileSource {
    dir: PathBuf,
}

impl FileSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn credential_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn state_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}{STATE_SUFFIX}"))
    }

    async fn list_credential_files(&self) -> Result<Vec<PathBuf>, CoreError> {
        let mut out = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(err) => return Err(err.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.ends_with(STATE_SUFFIX) || !name.ends_with(".json") {
                continue;
            }
            out.push(path);
        }
        Ok(out)
    }

    fn infer_kind(file: &CredentialFile) -> CredentialKind {
        if file.access_token.is_some() || file.refresh_token.is_some() {
            CredentialKind::Oauth
        } else {
            CredentialKind::ApiKey
        }
    }

    fn id_for(path: &Path, file: &CredentialFile) -> String {
        file.id.clone().unwrap_or_else(|| {
            path.file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("unknown")
                .to_string()
        })
    }
}

#[async_trait]
impl CredentialReader for FileSource {
    fn name(&self) -> &str {
        "file"
    }

    async fn load(&self) -> Result<Vec<Credential>, CoreError> {
        let mut out = Vec::new();
        for path in self.list_credential_files().await? {
            let bytes = match tokio::fs::read(&path).await {
                Ok(b) => b,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "failed to read credential file");
                    continue;
                }
            };
            let file: CredentialFile = match serde_json::from_slice(&bytes) {
                Ok(f) => f,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "failed to parse credential file");
                    continue;
                }
            };
            let id = Self::id_for(&path, &file);
            let mut cred = Credential::new_oauth(&id, self.name());
            cred.kind = Self::infer_kind(&file);
            cred.project_id = file.project_id;
            cred.email = file.email;
            cred.client_id = file.client_id;
            cred.client_secret = file.client_secret;
            cred.access_token = file.access_token;
            cred.refresh_token = file.refresh_token;
            cred.token_uri = file.token_uri;
            cred.expires_at = file.expires_at;
            cred.api_key = file.api_key;
            if let Some(limit) = file.daily_limit {
                cred.daily_limit = limit;
            }

            if let Some(state) = self.restore_state(&id).await? {
                cred.restore_state(state);
            }

            out.push(cred);
        }
        debug!(dir = %self.dir.display(), count = out.len(), "file source loaded credentials");
        Ok(out)
    }
}

#[async_trait]
impl CredentialWriter for FileSource {
    async fn save(&self, cred: &Credential) -> Result<(), CoreError> {
        let file = CredentialFile {
            id: Some(cred.id.clone()),
            project_id: cred.project_id.clone(),
            email: cred.email.clone(),
            client_id: cred.client_id.clone(),
            client_secret: cred.client_secret.clone(),
            access_token: cred.access_token.clone(),
            refresh_token: cred.refresh_token.clone(),
            token_uri: cred.token_uri.clone(),
            expires_at: cred.expires_at,
            api_key: cred.api_key.clone(),
            daily_limit: Some(cred.daily_limit),
        };
        let bytes = serde_json::to_vec_pretty(&file)?;
        atomic_write(&self.credential_path(&cred.id), &bytes, FILE_MODE).await
    }

    async fn delete(&self, id: &str) -> Result<(), CoreError> {
        remove_if_exists(&self.credential_path(id)).await?;
        self.delete_state(id).await
    }
}

#[async_trait]
impl CredentialStateful for FileSource {
    async fn restore_state(&self, id: &str) -> Result<Option<CredentialState>, CoreError> {
        let path = self.state_path(id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn persist_state(&self, id: &str, state: &CredentialState) -> Result<(), CoreError> {
        let bytes = serde_json::to_vec_pretty(state)?;
        atomic_write(&self.state_path(id), &bytes, FILE_MODE).await
    }

    async fn delete_state(&self, id: &str) -> Result<(), CoreError> {
        remove_if_exists(&self.state_path(id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tempdir() -> tempfile::TempDir {
        tempfile::tempdir().expect("tempdir")
    }

    #[tokio::test]
    async fn load_ignores_state_siblings_and_non_json() {
        let dir = tempdir();
        tokio::fs::write(
            dir.path().join("a.json"),
            br#"{"id":"a","refresh_token":"rt","client_id":"cid","client_secret":"sec"}"#,
        )
        .await
        .unwrap();
        tokio::fs::write(dir.path().join("a.state.json"), b"{}").await.unwrap();
        tokio::fs::write(dir.path().join("readme.txt"), b"not json").await.unwrap();

        let source = FileSource::new(dir.path());
        let creds = source.load().await.unwrap();
        assert_eq!(creds.len(), 1);
        assert_eq!(creds[0].id, "a");
        assert_eq!(creds[0].kind, CredentialKind::Oauth);
    }

    #[tokio::test]
    async fn infers_api_key_kind() {
        let dir = tempdir();
        tokio::fs::write(dir.path().join("b.json"), br#"{"id":"b","api_key":"sk-test"}"#)
            .await
            .unwrap();
        let source = FileSource::new(dir.path());
        let creds = source.load().await.unwrap();
        assert_eq!(creds[0].kind, CredentialKind::ApiKey);
    }

    #[tokio::test]
    async fn save_then_load_round_trips_and_delete_removes_both() {
        let dir = tempdir();
        let source = FileSource::new(dir.path());
        let mut cred = Credential::new_oauth("c", source.name());
        cred.refresh_token = Some("rt".to_string());
        cred.client_id = Some("cid".to_string());
        cred.client_secret = Some("sec".to_string());
        source.save(&cred).await.unwrap();
        source
            .persist_state(&cred.id, &cred.snapshot_state())
            .await
            .unwrap();

        let creds = source.load().await.unwrap();
        assert_eq!(creds.len(), 1);
        assert_eq!(creds[0].refresh_token.as_deref(), Some("rt"));

        source.delete(&cred.id).await.unwrap();
        assert!(!dir.path().join("c.json").exists());
        assert!(!dir.path().join("c.state.json").exists());
    }

    #[tokio::test]
    async fn load_from_missing_directory_is_empty() {
        let source = FileSource::new("/nonexistent/does/not/exist");
        assert_eq!(source.load().await.unwrap().len(), 0);
    }
}
