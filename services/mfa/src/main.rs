use sea_orm::Database;
use tracing::info;

use warden_core::tracing::init_tracing;
use warden_mfa::config::MfaConfig;
use warden_mfa::router::build_router;
use warden_mfa::state::AppState;

#[tokio::main]
async fn main() {
    init_tracing();

    let config = MfaConfig::from_env();

    let db = Database::connect(&config.database_url)
        .await
        .expect("failed to connect to database");

    let state = AppState::new(db, config.policy());
    let shutdown = state.shutdown.clone();

    let router = build_router(state);
    let addr = format!("0.0.0.0:{}", config.mfa_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind");

    info!("mfa service listening on {addr}");
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            // In-flight operations holding a child token stop before their next write.
            shutdown.cancel();
        })
        .await
        .expect("server error");
}
