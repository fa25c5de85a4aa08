mod api;
mod config;
mod crawler;
mod events;
mod explorer;
mod ingest;
mod markers;
mod playback;
mod session;
mod state;
mod surface;
mod utils;

use std::sync::Arc;
use std::time::Duration;

use api::api_router;
use atlas::Resolver;
use axum::Router;
use config::{config_path_from_env, load_or_create_config};
use crawler::StreamEndpoint;
use events::EventBroadcaster;
use explorer::Explorer;
use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::SeedableRng;
use reqwest::Client;
use session::spawn_session;
use state::AppState;
use surface::{BrowserAudio, BrowserMap};
use tower_http::request_id::{MakeRequestUuid, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config_path = config_path_from_env();
    let (config, created) = load_or_create_config(&config_path)?;
    let config_store = Arc::new(RwLock::new(config.clone()));

    if created {
        info!("Created default config at {:?}", config_path);
    } else {
        info!("Loaded config from {:?}", config_path);
    }

    let resolver = Arc::new(Resolver::with_extra(config.extra_cities.clone()));
    info!("Resolver knows {} cities", resolver.cities().len());

    let client = Client::builder()
        .user_agent(config.user_agent.clone())
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .build()?;
    let source = StreamEndpoint {
        client,
        endpoint: config.stream_endpoint.clone(),
        title_timeout: Duration::from_secs(config.title_timeout_secs),
        max_frame_bytes: config.max_frame_bytes,
    };

    let events = EventBroadcaster::new(config.event_buffer);
    let explorer = Explorer::new(
        BrowserAudio::acquire(events.clone()),
        BrowserMap::acquire(events.clone()),
        resolver,
        config.explorer_options(),
    );
    let (session, controller) = spawn_session(
        explorer,
        source,
        events.clone(),
        StdRng::from_os_rng(),
        config.command_buffer,
    );

    let state = AppState {
        config: config_store,
        session: session.clone(),
        events: events.clone(),
    };

    let app = Router::new()
        .nest("/api/v1", api_router(state))
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(TraceLayer::new_for_http());

    let bind_addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Listening on {}", bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            events.close();
        })
        .await?;

    if let Err(err) = session.shutdown().await {
        warn!("Session controller already gone: {}", err);
    }
    if let Err(err) = controller.await {
        warn!("Session controller join error: {}", err);
    }
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(err) => {
                warn!("Failed to install terminate signal handler: {}", err);
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", err);
        }
    }

    info!("Shutdown signal received.");
}
