use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::post,
};
use chrono::{DateTime, Utc};
use credpool::credential::Credential;
use credpool::error::CoreError;
use credpool::oauth::{CredentialLookup, OauthRefresher};
use credpool::sources::CredentialWriter;
use serde_json::{Value, json};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};
use tokio::net::TcpListener;

#[derive(Clone, Default)]
struct TokenEndpointState {
    hit_count: Arc<AtomicUsize>,
    respond_with_error: bool,
}

async fn token_handler(State(state): State<TokenEndpointState>) -> (StatusCode, Json<Value>) {
    state.hit_count.fetch_add(1, Ordering::SeqCst);
    if state.respond_with_error {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "invalid_grant" })),
        )
    } else {
        (
            StatusCode::OK,
            Json(json!({
                "access_token": "fresh-access-token",
                "token_type": "Bearer",
                "expires_in": 3600,
            })),
        )
    }
}

async fn spawn_token_endpoint(state: TokenEndpointState) -> String {
    let app = Router::new()
        .route("/token", post(token_handler))
        .with_state(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("mock token server");
    });
    format!("http://{addr}/token")
}

struct SingleCredentialLookup {
    cred: Mutex<Credential>,
}

#[async_trait]
impl CredentialLookup for SingleCredentialLookup {
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
    ) -> Result<(), CoreError> {
        let mut cred = self.cred.lock().unwrap();
        cred.access_token = Some(access_token);
        if refresh_token.is_some() {
            cred.refresh_token = refresh_token;
        }
        cred.expires_at = Some(expires_at);
        Ok(())
    }

    async fn source_for(&self, _id: &str) -> Option<Arc<dyn CredentialWriter>> {
        None
    }
}

fn oauth_credential(token_uri: &str) -> Credential {
    let mut cred = Credential::new_oauth("cred-a", "file");
    cred.client_id = Some("client-id".to_string());
    cred.client_secret = Some("client-secret".to_string());
    cred.refresh_token = Some("refresh-token".to_string());
    cred.token_uri = Some(token_uri.to_string());
    cred
}

#[tokio::test]
async fn refresh_exchanges_token_and_applies_it_through_lookup() {
    let endpoint_state = TokenEndpointState::default();
    let token_url = spawn_token_endpoint(endpoint_state.clone()).await;

    let lookup: Arc<dyn CredentialLookup> = Arc::new(SingleCredentialLookup {
        cred: Mutex::new(oauth_credential(&token_url)),
    });
    let refresher = OauthRefresher::new(reqwest::Client::new());

    let updated = refresher.refresh("cred-a", lookup.clone()).await.unwrap();

    assert_eq!(updated.access_token.as_deref(), Some("fresh-access-token"));
    assert!(updated.expires_at.is_some());
    assert_eq!(
        lookup.snapshot("cred-a").await.unwrap().access_token.as_deref(),
        Some("fresh-access-token")
    );
    assert_eq!(endpoint_state.hit_count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn refresh_does_not_retry_a_permanent_server_error() {
    let endpoint_state = TokenEndpointState {
        hit_count: Arc::new(AtomicUsize::new(0)),
        respond_with_error: true,
    };
    let token_url = spawn_token_endpoint(endpoint_state.clone()).await;

    let lookup: Arc<dyn CredentialLookup> = Arc::new(SingleCredentialLookup {
        cred: Mutex::new(oauth_credential(&token_url)),
    });
    let refresher = OauthRefresher::new(reqwest::Client::new());

    let err = refresher.refresh("cred-a", lookup).await.unwrap_err();
    assert!(!err.to_string().is_empty());
    // A server-returned error response (invalid_grant) is permanent: exactly one attempt,
    // not the backon retry budget applied to transport failures.
    assert_eq!(endpoint_state.hit_count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn concurrent_refreshes_for_the_same_credential_hit_the_token_endpoint_once() {
    let endpoint_state = TokenEndpointState::default();
    let token_url = spawn_token_endpoint(endpoint_state.clone()).await;

    let lookup: Arc<dyn CredentialLookup> = Arc::new(SingleCredentialLookup {
        cred: Mutex::new(oauth_credential(&token_url)),
    });
    let refresher = Arc::new(OauthRefresher::new(reqwest::Client::new()));

    let mut handles = Vec::new();
    for _ in 0..10 {
        let refresher = refresher.clone();
        let lookup = lookup.clone();
        handles.push(tokio::spawn(
            async move { refresher.refresh("cred-a", lookup).await },
        ));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(endpoint_state.hit_count.load(Ordering::SeqCst), 1);
}
