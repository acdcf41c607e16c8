use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info};

use kilim_api::{
    app_router,
    config::{init_tracing, load_config},
    db::{establish_connection_from_app_config, run_migrations},
    events::{process_events, EventSender},
    AppState,
};

const EVENT_CHANNEL_CAPACITY: usize = 1024;
const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;
    init_tracing(config.log_level(), config.log_json);

    let db = establish_connection_from_app_config(&config).await?;
    if config.auto_migrate {
        run_migrations(&db).await?;
    }

    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    tokio::spawn(process_events(rx));

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let state = AppState::build(config, db, EventSender::new(tx))?;

    // Periodically expire orders abandoned at the payment page.
    let sweeper = state.orders.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        interval.tick().await;
        loop {
            interval.tick().await;
            if let Err(e) = sweeper.expire_stale_pending().await {
                error!(error = %e, "Stale order sweep failed");
            }
        }
    });

    let app = app_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
