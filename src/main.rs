mod calendar;
mod config;
mod db;
mod engine;
mod errors;
mod feeds;
mod models;
mod portfolio;
mod risk;
mod server;
mod state;

use crate::state::{AppState, DbCommand, EngineEvent};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("fat_tails risk engine starting");

    let cfg = match config::AppConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("config error: {e}");
            std::process::exit(1);
        }
    };

    let db_pool = match db::init_db(&cfg.data_dir) {
        Ok(d) => d,
        Err(e) => {
            tracing::error!("database init error: {e}");
            std::process::exit(1);
        }
    };

    // Bounded channels
    let (engine_tx, engine_rx) = mpsc::channel::<EngineEvent>(64);
    let (db_tx, db_rx) = mpsc::channel::<DbCommand>(256);

    let base_date = chrono::Utc::now().date_naive();
    let app_state = AppState::new(cfg.clone(), db_pool.clone(), base_date, engine_tx.clone(), db_tx);
    tracing::info!(
        base_date = %base_date,
        paths = cfg.default_path_count,
        bins = cfg.default_bin_count,
        debounce_ms = cfg.debounce_ms,
        rayon_threads = rayon::current_num_threads(),
        "session configured"
    );

    // ── Spawn tasks ──

    // 1. DB writer task (the only writer to the parameter store)
    tokio::spawn(db::run_db_writer(db_pool, db_rx));

    // 2. Simulation coordinator
    let engine = tokio::spawn(engine::run_engine(app_state.clone(), engine_rx));

    // 3. Axum HTTP + WS server
    let app = server::router(app_state.clone());
    let addr = format!("0.0.0.0:{}", cfg.server_port);
    tracing::info!("server listening on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("bind error: {e}");
            std::process::exit(1);
        });

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("signal handler error: {e}");
        }
        tracing::info!("ctrl-c received, shutting down");
    };
    if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown).await {
        tracing::error!("server error: {e}");
    }

    let _ = engine_tx.send(EngineEvent::Shutdown).await;
    let _ = engine.await;
}
