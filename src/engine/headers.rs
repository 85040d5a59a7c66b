//! Outbound header construction for calls to the Gemini Code Assist backend.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::config::HeaderPassthroughConfig;
use crate::credential::Credential;

/// Stable CLI-style `User-Agent` identifying calls to the upstream as coming from this pool.
const USER_AGENT: &str = "credpool-gemini-cli/0.1.0 (linux; x64)";
const API_CLIENT: &str = "gl-rust/credpool";
const CLIENT_METADATA: &str = "ideType=IDE_UNSPECIFIED,platform=PLATFORM_UNSPECIFIED,pluginType=GEMINI";

const X_REQUEST_ID: &str = "x-request-id";
const X_CLIENT_REQUEST_ID: &str = "x-client-request-id";

/// Build the full set of headers for one upstream attempt: the headers §6 mandates on every
/// call, plus whatever inbound headers the passthrough allow-list permits.
pub fn build(
    credential: &Credential,
    stream: bool,
    default_user_project: &str,
    passthrough_cfg: &HeaderPassthroughConfig,
    inbound: &HeaderMap,
) -> HeaderMap {
    let mut headers = HeaderMap::new();

    if let Some(token) = &credential.access_token {
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}")) {
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }
    }

    let accept = if stream { "text/event-stream" } else { "application/json" };
    headers.insert(reqwest::header::ACCEPT, HeaderValue::from_static(accept));
    headers.insert(reqwest::header::USER_AGENT, HeaderValue::from_static(USER_AGENT));
    headers.insert("x-goog-api-client", HeaderValue::from_static(API_CLIENT));
    headers.insert("client-metadata", HeaderValue::from_static(CLIENT_METADATA));

    let user_project = credential
        .project_id
        .as_deref()
        .filter(|p| !p.is_empty())
        .unwrap_or(default_user_project);
    if !user_project.is_empty() {
        if let Ok(value) = HeaderValue::from_str(user_project) {
            headers.insert("x-goog-user-project", value);
        }
    }

    apply_passthrough(&mut headers, passthrough_cfg, inbound);

    headers
}

fn apply_passthrough(out: &mut HeaderMap, cfg: &HeaderPassthroughConfig, inbound: &HeaderMap) {
    if !cfg.enabled {
        return;
    }

    for name in &cfg.allow_list {
        let lower = name.to_ascii_lowercase();
        if cfg.deny_list.iter().any(|d| d.eq_ignore_ascii_case(&lower)) {
            continue;
        }
        let Ok(header_name) = HeaderName::try_from(lower.as_str()) else {
            continue;
        };
        if let Some(value) = inbound.get(&header_name) {
            out.insert(header_name, value.clone());
        }
    }

    if let Some(request_id) = inbound.get(X_REQUEST_ID) {
        if let Ok(name) = HeaderName::try_from(X_CLIENT_REQUEST_ID) {
            out.insert(name, request_id.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::Credential;

    #[test]
    fn sets_bearer_and_stream_accept() {
        let mut cred = Credential::new_oauth("a", "file");
        cred.access_token = Some("tok".to_string());
        let headers = build(&cred, true, "default-proj", &HeaderPassthroughConfig::default(), &HeaderMap::new());
        assert_eq!(headers.get(reqwest::header::AUTHORIZATION).unwrap(), "Bearer tok");
        assert_eq!(headers.get(reqwest::header::ACCEPT).unwrap(), "text/event-stream");
    }

    #[test]
    fn falls_back_to_default_user_project() {
        let cred = Credential::new_oauth("a", "file");
        let headers = build(&cred, false, "default-proj", &HeaderPassthroughConfig::default(), &HeaderMap::new());
        assert_eq!(headers.get("x-goog-user-project").unwrap(), "default-proj");
    }

    #[test]
    fn mirrors_request_id_to_client_request_id() {
        let cred = Credential::new_oauth("a", "file");
        let mut inbound = HeaderMap::new();
        inbound.insert(X_REQUEST_ID, HeaderValue::from_static("req-123"));
        let headers = build(&cred, false, "", &HeaderPassthroughConfig::default(), &inbound);
        assert_eq!(headers.get(X_CLIENT_REQUEST_ID).unwrap(), "req-123");
    }

    #[test]
    fn deny_list_blocks_passthrough() {
        let cred = Credential::new_oauth("a", "file");
        let mut cfg = HeaderPassthroughConfig::default();
        cfg.allow_list = vec!["authorization".to_string()];
        cfg.deny_list = vec!["authorization".to_string()];
        let mut inbound = HeaderMap::new();
        inbound.insert(reqwest::header::AUTHORIZATION, HeaderValue::from_static("Bearer client-token"));
        let headers = build(&cred, false, "", &cfg, &inbound);
        // credential carries no access token and passthrough denies the inbound one, so no
        // Authorization header should reach the upstream request at all.
        assert!(headers.get(reqwest::header::AUTHORIZATION).is_none());
    }
}
