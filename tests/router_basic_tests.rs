use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use credpool::config::PoolConfig;
use credpool::dispatcher::RequestDispatcher;
use credpool::engine::UpstreamEngine;
use credpool::manager::{self, SourceHandle};
use credpool::oauth::OauthRefresher;
use credpool::routing::RoutingStrategy;
use credpool::server::{self, AppState};
use credpool::sources::EnvSource;
use std::sync::Arc;
use tower::ServiceExt;

async fn empty_pool_app(proxy_key: &str) -> axum::Router {
    let config = Arc::new(PoolConfig::default());
    let sources = vec![SourceHandle {
        reader: Arc::new(EnvSource::new()),
        writer: None,
        stateful: None,
    }];
    let http = reqwest::Client::new();
    let oauth = Arc::new(OauthRefresher::new(http.clone()));
    let manager_handle = Arc::new(
        manager::spawn(sources, None, config.clone(), oauth.clone())
            .await
            .unwrap(),
    );
    let strategy = Arc::new(RoutingStrategy::new(manager_handle.clone(), oauth));
    let engine = Arc::new(UpstreamEngine::new(http, manager_handle.clone(), strategy.clone(), config.clone()));
    let dispatcher = Arc::new(RequestDispatcher::new(engine, strategy));

    let state = AppState {
        dispatcher,
        manager: manager_handle,
        config,
        proxy_key: Arc::from(proxy_key),
    };
    server::build_router(state)
}

#[tokio::test]
async fn chat_completions_requires_key_then_503s_on_an_empty_pool() {
    let app = empty_pool_app("secret-key").await;

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/chat/completions")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"model":"gemini-2.5-pro","messages":[]}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/chat/completions")
                .header("content-type", "application/json")
                .header("x-goog-api-key", "secret-key")
                .body(Body::from(
                    r#"{"model":"gemini-2.5-pro","messages":[{"role":"user","content":"hi"}]}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn unknown_route_falls_back_to_404() {
    let app = empty_pool_app("secret-key").await;

    let resp = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/definitely-not-a-route")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn models_route_is_reachable_with_the_proxy_key() {
    let app = empty_pool_app("secret-key").await;

    let resp = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/v1/models")
                .header("x-goog-api-key", "secret-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}
