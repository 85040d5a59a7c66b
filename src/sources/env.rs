use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;
use tracing::warn;

use crate::credential::{Credential, CredentialKind};
use crate::error::CoreError;

use super::CredentialReader;

const ENV_PREFIX: &str = "GCLI_CREDS_";

/// On-the-wire shape of a `GCLI_CREDS_*` value: either raw JSON or base64(JSON) of this shape.
#[derive(Debug, Deserialize)]
struct EnvCredentialPayload {
    client_id: String,
    client_secret: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    token_uri: Option<String>,
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

/// Read-only loader that enumerates `GCLI_CREDS_<suffix>` environment variables.
///
/// Each value is parsed as JSON directly, falling back to base64-decode-then-parse. `id` is
/// derived from `project_id` when present, otherwise from the variable's suffix.
pub struct EnvSource;

impl EnvSource {
    pub fn new() -> Self {
        Self
    }

    fn parse_payload(suffix: &str, raw: &str) -> Option<EnvCredentialPayload> {
        if let Ok(payload) = serde_json::from_str::<EnvCredentialPayload>(raw) {
            return Some(payload);
        }
        let decoded = base64::engine::general_purpose::STANDARD.decode(raw.trim()).ok()?;
        match serde_json::from_slice::<EnvCredentialPayload>(&decoded) {
            Ok(payload) => Some(payload),
            Err(err) => {
                warn!(suffix, error = %err, "env credential payload is neither JSON nor base64(JSON)");
                None
            }
        }
    }
}

impl Default for EnvSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialReader for EnvSource {
    fn name(&self) -> &str {
        "env"
    }

    async fn load(&self) -> Result<Vec<Credential>, CoreError> {
        let mut out = Vec::new();
        for (key, value) in std::env::vars() {
            let Some(suffix) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let Some(payload) = Self::parse_payload(suffix, &value) else {
                continue;
            };
            if payload.refresh_token.is_none() && payload.access_token.is_none() {
                warn!(suffix, "env credential missing both refresh_token and access_token, skipping");
                continue;
            }
            let id = payload
                .project_id
                .clone()
                .unwrap_or_else(|| suffix.to_ascii_lowercase());

            let mut cred = Credential::new_oauth(&id, self.name());
            cred.kind = CredentialKind::Oauth;
            cred.client_id = Some(payload.client_id);
            cred.client_secret = Some(payload.client_secret);
            cred.refresh_token = payload.refresh_token;
            cred.access_token = payload.access_token;
            cred.token_uri = payload.token_uri;
            cred.project_id = payload.project_id;
            cred.email = payload.email;
            out.push(cred);
        }
        Ok(out)
    }
}
