use std::sync::Arc;

use axum::http::HeaderValue;
use ludo_arena_server::broadcast::WsBroadcaster;
use ludo_arena_server::cache::shared::{MemoryCache, SharedCache};
use ludo_arena_server::cache::GameStateCache;
use ludo_arena_server::config::ServerConfig;
use ludo_arena_server::coordinator::Coordinator;
use ludo_arena_server::engagement::EngagementEngine;
use ludo_arena_server::http::{router, AppState};
use ludo_arena_server::store::{GameStore, MemoryStore, MongoStore};
use ludo_arena_server::taunt::{TauntDirector, TauntOptions};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::from_env();

    let store: Arc<dyn GameStore> = match config.mongodb_uri.as_deref() {
        Some(uri) => match MongoStore::connect(uri).await {
            Ok(store) => Arc::new(store),
            Err(err) => {
                error!(%err, "mongodb connection failed");
                std::process::exit(1);
            }
        },
        None => {
            warn!("MONGODB_URI not set; running with the in-memory store (state is not durable)");
            Arc::new(MemoryStore::new())
        }
    };

    let shared: Arc<dyn SharedCache> = Arc::new(MemoryCache::new());
    let cache = Arc::new(GameStateCache::new(
        shared.clone(),
        config.state_cache_ttl,
        config.move_log_ttl,
        config.move_log_max_items,
    ));
    let engagement = Arc::new(EngagementEngine::new(
        shared.clone(),
        config.engagement_dice_enabled,
    ));
    let taunts = Arc::new(TauntDirector::new(
        shared.clone(),
        TauntOptions {
            enabled: config.taunt_system_enabled,
            cooldown_ms: config.taunt_cooldown_ms,
            limit_per_min: config.taunt_limit_per_min,
            auto_burst_limit: config.taunt_auto_burst_limit,
        },
    ));
    let ws = Arc::new(WsBroadcaster::new());
    let coordinator = Arc::new(Coordinator::new(
        store.clone(),
        cache.clone(),
        engagement,
        taunts,
        ws.clone(),
    ));

    let flusher = cache.spawn_flusher(store.clone(), config.flush_interval);

    let state = Arc::new(AppState {
        coordinator,
        store: store.clone(),
        shared_cache: shared,
        ws,
    });

    let cors = if config.cors_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    };

    let app = router(state).layer(cors).layer(TraceLayer::new_for_http());

    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(%err, %bind_addr, "failed to bind server socket");
            std::process::exit(1);
        }
    };

    info!(port = config.port, store = store.kind(), "server listening");
    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(%err, "server runtime failed");
    }

    // Stop the write-behind loop, then run one final synchronous flush so
    // no dirty room state is lost on the way out.
    flusher.abort();
    cache.shutdown(&store).await;
    info!("shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received ctrl-c"),
        () = terminate => info!("received terminate signal"),
    }
}
