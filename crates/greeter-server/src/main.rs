use clap::Parser;
use greeter_server::server::{
    config::{CliArgs, ServerConfig},
    supervisor::{Supervisor, default_handler},
    telemetry::init_telemetry,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry(config.log_format)?;

    let supervisor = Supervisor::bind(&config, default_handler(&config)).await?;
    log_startup_info(&supervisor, &config);

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let result = supervisor.run(shutdown).await;
    match &result {
        Ok(()) => tracing::info!("Service shut down successfully"),
        Err(err) => tracing::error!(error = %err, "Service stopped with an error"),
    }

    providers.shutdown();
    Ok(result?)
}

fn log_startup_info(supervisor: &Supervisor, config: &ServerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!(
            "Starting greeter on {} (gRPC) and {} (HTTP) with full config: {:#?}",
            supervisor.rpc_addr(),
            supervisor.http_addr(),
            config
        );
    } else {
        tracing::info!(
            "Starting greeter on {} (gRPC) and {} (HTTP)",
            supervisor.rpc_addr(),
            supervisor.http_addr()
        );
    }
}

/// Cancels `shutdown` on Ctrl+C or SIGTERM.
async fn shutdown_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
        () = shutdown.cancelled() => return,
    }

    tracing::info!("Shutdown signal received, terminating gracefully...");
    shutdown.cancel();
}
