use std::sync::Arc;

use credpool::config::Config;
use credpool::engine::UpstreamEngine;
use credpool::manager::{self, SourceHandle};
use credpool::oauth::OauthRefresher;
use credpool::routing::RoutingStrategy;
use credpool::server::{self, AppState};
use credpool::sources::{EnvSource, FileSource};
use mimalloc::MiMalloc;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::{net::TcpListener, signal};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

const HOT_RELOAD_POLL: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // The server binary requires a real config file with a non-empty proxy_key and
    // auth_directory. (Library code uses `config::CONFIG` which is best-effort and does not
    // validate.)
    let cfg = Config::from_toml();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cfg.basic.loglevel.clone()));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_level(true)
                .with_target(false),
        )
        .init();

    let pool_config = Arc::new(cfg.pool.clone());

    let http = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .connect_timeout(Duration::from_secs(10))
        .build()?;

    let file_source = Arc::new(FileSource::new(&pool_config.auth_directory));
    let mut sources = vec![SourceHandle {
        reader: file_source.clone(),
        writer: Some(file_source.clone()),
        stateful: Some(file_source.clone()),
    }];
    if pool_config.auto_load_env_creds {
        sources.push(SourceHandle {
            reader: Arc::new(EnvSource::new()),
            writer: None,
            stateful: None,
        });
    }

    let oauth_refresher = Arc::new(OauthRefresher::new(http.clone()));

    // No standalone StateStore is configured here, so each source's own `CredentialStateful`
    // capability is used as the restore-on-load fallback.
    let manager_handle =
        manager::spawn(sources, None, pool_config.clone(), oauth_refresher.clone()).await?;
    let manager_handle = Arc::new(manager_handle);

    manager::reload::spawn(
        (*manager_handle).clone(),
        pool_config.auth_directory.clone(),
        HOT_RELOAD_POLL,
    );

    oauth_refresher.clone().spawn_proactive(
        manager_handle.clone(),
        chrono::Duration::seconds(pool_config.refresh_ahead_seconds),
        Duration::from_secs(60),
    );

    let strategy = Arc::new(RoutingStrategy::new(manager_handle.clone(), oauth_refresher));
    let engine = Arc::new(UpstreamEngine::new(
        http,
        manager_handle.clone(),
        strategy.clone(),
        pool_config.clone(),
    ));
    let dispatcher = Arc::new(credpool::dispatcher::RequestDispatcher::new(engine, strategy));

    let state = AppState {
        dispatcher,
        manager: manager_handle,
        config: pool_config,
        proxy_key: Arc::from(cfg.basic.proxy_key.as_str()),
    };
    let app = server::build_router(state);

    let addr = SocketAddr::from((cfg.basic.listen_addr, cfg.basic.listen_port));
    let listener = TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Server has shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { /* ... */ },
        _ = terminate => { /* ... */ },
    }
}
