use backon::{ExponentialBuilder, Retryable};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use governor::{Quota, RateLimiter};
use oauth2::basic::{BasicClient, BasicTokenResponse};
use oauth2::RequestTokenError;
use oauth2::{ClientId, ClientSecret, RefreshToken, TokenResponse, TokenUrl};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::credential::Credential;
use crate::error::OauthError;

use super::{CredentialLookup, RefreshCoordinator};

/// Google's OAuth token endpoint, used when a credential doesn't carry its own `token_uri`.
const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Ceiling on proactive refresh calls against Google's token endpoint, so a large pool coming
/// due for refresh at once doesn't burst the whole sweep in a single tick.
const PROACTIVE_REFRESH_TPS: u32 = 2;

/// Exchanges refresh tokens for access tokens, coalescing concurrent refreshes for the same
/// credential id.
pub struct OauthRefresher {
    http: reqwest::Client,
    coordinator: RefreshCoordinator,
    proactive_limiter: governor::DefaultDirectRateLimiter,
}

impl OauthRefresher {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            coordinator: RefreshCoordinator::new(),
            proactive_limiter: RateLimiter::direct(
                Quota::per_second(NonZeroU32::new(PROACTIVE_REFRESH_TPS).unwrap())
                    .allow_burst(NonZeroU32::new(PROACTIVE_REFRESH_TPS * 2).unwrap()),
            ),
        }
    }

    /// Refresh the credential identified by `id`, applying the result to the canonical record
    /// through `lookup` and persisting it through whatever source produced it.
    pub async fn refresh(
        &self,
        id: &str,
        lookup: Arc<dyn CredentialLookup>,
    ) -> Result<Credential, Arc<OauthError>> {
        let http = self.http.clone();
        let id_owned = id.to_string();

        self.coordinator
            .run(id, move || async move { do_refresh(id_owned, http, lookup).await })
            .await
    }

    /// Refresh `cred` in isolation, without going through a `CredentialLookup`. The Credential
    /// Manager actor calls this from inside its own message handler (auto-recovery), where it
    /// already holds the canonical record directly; routing a refresh through `CredentialLookup`
    /// there would mean calling back into the actor's own mailbox while that mailbox is busy
    /// handling the message that triggered the refresh.
    ///
    /// Bypasses the singleflight coordinator used by `refresh`: the actor's mailbox already
    /// serializes access to `cred`, so there is no concurrent caller to coalesce with here.
    pub async fn refresh_for_recovery(
        &self,
        cred: &Credential,
    ) -> Result<RefreshedToken, OauthError> {
        exchange_refresh_token(
            self.http.clone(),
            cred.client_id.clone(),
            cred.client_secret.clone(),
            cred.refresh_token.clone(),
            cred.token_uri.clone(),
        )
        .await
    }

    /// Periodically refresh every oauth credential whose access token is absent or expires
    /// within `refresh_ahead`. Failures are logged and never abort the loop.
    pub fn spawn_proactive(
        self: Arc<Self>,
        lookup: Arc<dyn CredentialLookup>,
        refresh_ahead: ChronoDuration,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let now = Utc::now();
                for cred in lookup.all_oauth_snapshots().await {
                    if !needs_refresh(&cred, now, refresh_ahead) {
                        continue;
                    }
                    self.proactive_limiter.until_ready().await;
                    match self.refresh(&cred.id, lookup.clone()).await {
                        Ok(_) => info!(credential_id = %cred.id, "proactive refresh succeeded"),
                        Err(err) => {
                            warn!(credential_id = %cred.id, error = %err, "proactive refresh failed");
                        }
                    }
                }
            }
        })
    }
}

fn needs_refresh(cred: &Credential, now: DateTime<Utc>, refresh_ahead: ChronoDuration) -> bool {
    if !cred.is_oauth() || cred.refresh_token.is_none() {
        return false;
    }
    match cred.expires_at {
        None => cred.access_token.is_none(),
        Some(expiry) => expiry - now <= refresh_ahead,
    }
}

/// The three fields a token exchange actually changes on a credential.
pub struct RefreshedToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// Exchange `refresh_token` for a fresh access token. Transient network failures get a few quick
/// retries; a server-returned error response (bad refresh token, revoked grant, ...) is permanent
/// and fails immediately.
async fn exchange_refresh_token(
    http: reqwest::Client,
    client_id: Option<String>,
    client_secret: Option<String>,
    refresh_token: Option<String>,
    token_uri: Option<String>,
) -> Result<RefreshedToken, OauthError> {
    let refresh_token = refresh_token.ok_or(OauthError::MissingRefreshToken)?;
    let client_id = client_id.ok_or(OauthError::MissingClientCredentials)?;
    let client_secret = client_secret.ok_or(OauthError::MissingClientCredentials)?;
    let token_uri = token_uri.unwrap_or_else(|| GOOGLE_TOKEN_URI.to_string());

    let oauth_client = BasicClient::new(ClientId::new(client_id))
        .set_client_secret(ClientSecret::new(client_secret))
        .set_token_uri(TokenUrl::new(token_uri)?);

    let response: BasicTokenResponse = (|| async {
        oauth_client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.clone()))
            .request_async(&http)
            .await
    })
    .retry(ExponentialBuilder::default().with_max_times(3))
    .when(|err| matches!(err, RequestTokenError::Request(_)))
    .await?;

    let access_token = response.access_token().secret().clone();
    let refresh_token = response.refresh_token().map(|t| t.secret().clone());
    let expires_in = response
        .expires_in()
        .unwrap_or(Duration::from_secs(3600));
    let expires_at = Utc::now()
        + ChronoDuration::from_std(expires_in).unwrap_or_else(|_| ChronoDuration::seconds(3600));

    Ok(RefreshedToken {
        access_token,
        refresh_token,
        expires_at,
    })
}

async fn do_refresh(
    id: String,
    http: reqwest::Client,
    lookup: Arc<dyn CredentialLookup>,
) -> Result<Credential, OauthError> {
    let cred = lookup
        .snapshot(&id)
        .await
        .ok_or_else(|| OauthError::NotOauth(id.clone()))?;

    if !cred.is_oauth() {
        return Err(OauthError::NotOauth(id));
    }

    let refreshed = exchange_refresh_token(
        http,
        cred.client_id.clone(),
        cred.client_secret.clone(),
        cred.refresh_token.clone(),
        cred.token_uri.clone(),
    )
    .await?;

    debug!(credential_id = %id, "token endpoint returned a fresh access token");

    if let Err(err) = lookup
        .apply_refresh(
            &id,
            refreshed.access_token.clone(),
            refreshed.refresh_token.clone(),
            refreshed.expires_at,
        )
        .await
    {
        warn!(credential_id = %id, error = %err, "failed to apply refreshed token to canonical record");
    }

    let mut updated = cred;
    updated.access_token = Some(refreshed.access_token);
    if refreshed.refresh_token.is_some() {
        updated.refresh_token = refreshed.refresh_token;
    }
    updated.expires_at = Some(refreshed.expires_at);

    if let Some(source) = lookup.source_for(&id).await {
        if let Err(err) = source.save(&updated).await {
            warn!(credential_id = %id, error = %err, "failed to persist refreshed credential through its source");
        }
    }

    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::CredentialKind;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakeLookup {
        cred: Mutex<Credential>,
    }

    #[async_trait]
    impl CredentialLookup for FakeLookup {
        async fn snapshot(&self, id: &str) -> Option<Credential> {
            let cred = self.cred.lock().unwrap();
            (cred.id == id).then(|| cred.clone())
        }
        async fn all_oauth_snapshots(&self) -> Vec<Credential> {
            vec![self.cred.lock().unwrap().clone()]
        }
        async fn apply_refresh(
            &self,
            _id: &str,
            access_token: String,
            refresh_token: Option<String>,
            expires_at: DateTime<Utc>,
        ) -> Result<(), crate::error::CoreError> {
            let mut cred = self.cred.lock().unwrap();
            cred.access_token = Some(access_token);
            if refresh_token.is_some() {
                cred.refresh_token = refresh_token;
            }
            cred.expires_at = Some(expires_at);
            Ok(())
        }
        async fn source_for(
            &self,
            _id: &str,
        ) -> Option<Arc<dyn crate::sources::CredentialWriter>> {
            None
        }
    }

    #[test]
    fn needs_refresh_true_without_access_token() {
        let mut cred = Credential::new_oauth("a", "file");
        cred.kind = CredentialKind::Oauth;
        cred.refresh_token = Some("rt".to_string());
        assert!(needs_refresh(&cred, Utc::now(), ChronoDuration::seconds(180)));
    }

    #[test]
    fn needs_refresh_false_when_far_from_expiry() {
        let mut cred = Credential::new_oauth("a", "file");
        cred.refresh_token = Some("rt".to_string());
        cred.access_token = Some("at".to_string());
        cred.expires_at = Some(Utc::now() + ChronoDuration::hours(1));
        assert!(!needs_refresh(&cred, Utc::now(), ChronoDuration::seconds(180)));
    }

    #[test]
    fn needs_refresh_false_without_oauth_kind_mismatch() {
        let mut cred = Credential::new_oauth("a", "file");
        cred.refresh_token = None;
        assert!(!needs_refresh(&cred, Utc::now(), ChronoDuration::seconds(180)));
    }

    #[tokio::test]
    async fn refresh_rejects_missing_refresh_token() {
        let mut cred = Credential::new_oauth("a", "file");
        cred.client_id = Some("cid".to_string());
        cred.client_secret = Some("sec".to_string());
        let lookup: Arc<dyn CredentialLookup> = Arc::new(FakeLookup {
            cred: Mutex::new(cred),
        });
        let err = do_refresh("a".to_string(), reqwest::Client::new(), lookup)
            .await
            .unwrap_err();
        assert!(matches!(err, OauthError::MissingRefreshToken));
    }
}
