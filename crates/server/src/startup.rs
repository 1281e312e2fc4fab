use std::future::{Future, IntoFuture};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use configs::AppConfig;
use prometheus::Registry;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Notify};
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use crate::errors::StartupError;
use crate::routes::{self, AppState};
use service::{
    giveaway::{GiveawayService, GiveawayStores, XRedirects},
    oauth::{XEndpoints, XOAuth2Client, XOAuthClient},
    runtime,
    storage::{termination_signal, FsFileStore, ShutdownDrain, StoreOptions, StoreRegistry},
    verify::{AnyOfVerifiers, HttpSignatureVerifier, SignatureVerifier},
};

fn build_cors() -> CorsLayer {
    CorsLayer::very_permissive()
}

/// Build the application router on top of prepared state.
pub fn app(state: AppState) -> Router {
    routes::build_router(state, build_cors())
}

fn build_verifier(cfg: &AppConfig, client: &reqwest::Client) -> Arc<dyn SignatureVerifier> {
    let verifiers = cfg
        .chains
        .verifier_endpoints
        .iter()
        .map(|endpoint| {
            let v: Arc<dyn SignatureVerifier> = Arc::new(HttpSignatureVerifier::new(client.clone(), endpoint.clone()));
            (endpoint.clone(), v)
        })
        .collect::<Vec<_>>();
    if verifiers.is_empty() {
        warn!("no verifier endpoints configured; every signature will be rejected");
    }
    Arc::new(AnyOfVerifiers::new(verifiers))
}

fn build_x_client(cfg: &AppConfig, client: &reqwest::Client) -> Option<Arc<dyn XOAuthClient>> {
    match cfg.x.credentials() {
        Some((id, secret)) => Some(Arc::new(XOAuth2Client::new(client.clone(), id, secret, XEndpoints::default()))),
        None => {
            warn!("X_CLIENT_ID / X_CLIENT_SECRET not set; X login is disabled");
            None
        }
    }
}

/// Open the stores and wire the giveaway service from configuration.
pub fn build_state(cfg: &AppConfig, registry: &StoreRegistry, metrics: Registry) -> anyhow::Result<AppState> {
    let client = reqwest::Client::builder()
        .timeout(cfg.chains.request_timeout())
        .build()?;
    let stores = GiveawayStores::open(registry)?;
    let service = GiveawayService::new(
        stores,
        build_verifier(cfg, &client),
        build_x_client(cfg, &client),
        XRedirects { callback_uri: cfg.x.callback_uri.clone(), success_uri: cfg.x.success_uri.clone() },
    );
    Ok(AppState {
        service: Arc::new(service),
        admin_api_key: cfg.admin.api_key.as_deref().map(Arc::from),
        metrics,
    })
}

/// Serve `app` until `shutdown` resolves, then give in-flight requests at
/// most `grace` to finish. Returns `false` when the grace period ran out and
/// the remaining connections were abandoned.
pub async fn serve_until<F>(listener: TcpListener, app: Router, shutdown: F, grace: Duration) -> std::io::Result<bool>
where
    F: Future<Output = ()> + Send,
{
    let stop = Arc::new(Notify::new());
    let server = axum::serve(listener, app).with_graceful_shutdown({
        let stop = Arc::clone(&stop);
        async move { stop.notified().await }
    });
    let mut server = std::pin::pin!(server.into_future());

    tokio::select! {
        res = &mut server => return res.map(|()| true),
        _ = shutdown => {}
    }
    stop.notify_one();

    match tokio::time::timeout(grace, server).await {
        Ok(res) => res.map(|()| true),
        Err(_) => {
            warn!(grace_ms = grace.as_millis() as u64, "in-flight requests still running; closing anyway");
            Ok(false)
        }
    }
}

/// Public entry: build the app, serve until a termination signal, then flush
/// every store once.
pub async fn run(cfg: AppConfig) -> anyhow::Result<()> {
    runtime::ensure_env(&cfg.storage.dir)
        .await
        .map_err(|e| StartupError::Runtime(e.to_string()))?;

    let backend = FsFileStore::new(cfg.storage.dir.clone()).await?;
    let metrics = Registry::new();
    let options = StoreOptions { debounce: cfg.storage.flush_debounce(), pretty: cfg.storage.pretty };
    let registry = Arc::new(StoreRegistry::new(Arc::new(backend), options, &metrics)?);
    let state = build_state(&cfg, &registry, metrics)?;
    let app = app(state);

    let listener = TcpListener::bind((cfg.server.host.as_str(), cfg.server.port)).await?;
    let addr = listener.local_addr()?;
    info!(%addr, storage = %cfg.storage.dir, "webserver started");

    // First signal stops the server; later ones only get logged.
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let watcher = tokio::spawn(async move {
        termination_signal().await;
        info!("stopping...");
        let _ = stop_tx.send(());
        loop {
            termination_signal().await;
            warn!("already stopping; signal ignored");
        }
    });

    let served = serve_until(
        listener,
        app,
        async {
            let _ = stop_rx.await;
        },
        cfg.storage.shutdown_timeout(),
    )
    .await;
    if let Err(e) = &served {
        error!(error = %e, "server stopped with error");
    }

    let drain = ShutdownDrain::new(Arc::clone(&registry), cfg.storage.shutdown_timeout());
    let report = drain.drain().await;
    watcher.abort();

    served?;
    if report.is_clean() {
        info!(flushed = report.flushed.len(), "all stores flushed");
        Ok(())
    } else {
        error!(failed = ?report.failed, timed_out = report.timed_out, "shutdown flush incomplete");
        Err(StartupError::Runtime(format!("shutdown flush incomplete: failed {:?}", report.failed)).into())
    }
}
