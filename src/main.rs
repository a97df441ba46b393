//! Foxya Ledger service entry point

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use foxya_ledger::auth::AuthService;
use foxya_ledger::config::AppConfig;
use foxya_ledger::db::Database;
use foxya_ledger::gateway::{self, state::AppState};
use foxya_ledger::logging::init_logging;
use foxya_ledger::outbox::EventOutbox;
use foxya_ledger::transfer::{
    PgReceiverDirectory, ReconciliationWorker, TransferRepo, TransferService,
};

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let config = AppConfig::load(&env);
    let _guard = init_logging(&config);
    tracing::info!(env = %env, "Starting foxya-ledger");

    let db = Database::connect(&config.postgres_url).await?;
    let outbox = EventOutbox::connect(&config.redis_url).await?;

    let repo = TransferRepo::new(db.pool().clone());
    let directory = Arc::new(PgReceiverDirectory::new(db.pool().clone()));
    let service = Arc::new(TransferService::new(
        repo,
        outbox,
        directory,
        config.transfer.clone(),
    ));

    let cancel = CancellationToken::new();

    let worker = ReconciliationWorker::new(service.clone(), config.reconciliation.clone());
    let worker_handle = tokio::spawn(worker.run(cancel.clone()));

    let state = Arc::new(AppState::new(
        service,
        AuthService::new(config.auth.jwt_secret.clone()),
        db,
    ));

    let server_cancel = cancel.clone();
    let server = tokio::spawn(async move {
        gateway::run_server(
            state,
            &config.gateway.host,
            config.gateway.port,
            server_cancel,
        )
        .await
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");
    cancel.cancel();

    worker_handle.await?;
    server.await??;

    tracing::info!("Shutdown complete");
    Ok(())
}
