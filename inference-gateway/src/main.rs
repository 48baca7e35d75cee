//! Inference Gateway - routes public model IDs onto inference engines.

use std::env;

use inference_gateway::{logging, server, Config};
use tokio_util::sync::CancellationToken;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_version() {
    println!("nb-inference-gateway {}", VERSION);
}

/// Resolve once SIGINT or (on unix) SIGTERM arrives.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received interrupt"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Handle --version / -V
    if env::args().any(|a| a == "--version" || a == "-V") {
        print_version();
        return Ok(());
    }

    let config = Config::load().map_err(|e| format!("Failed to load configuration: {}", e))?;
    logging::init_tracing(&config.env);

    tracing::info!(
        env = %config.env,
        models = config.models.len(),
        compat = config.http.enable_oai_compat,
        "Starting nb-inference-gateway {}",
        VERSION
    );

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    server::run(config, shutdown).await?;
    Ok(())
}
