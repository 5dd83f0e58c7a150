use crate::{
    config::Config,
    labels::ClassLabels,
    ort_service::OrtModelService,
    server::{HttpServer, SharedState},
    telemetry::Metrics,
    upload::UploadStore,
};

use std::{error::Error, sync::Arc};
use tokio::{signal, sync::broadcast};

pub async fn start_app(config: Config) -> Result<(), Box<dyn Error>> {
    let uploads = match UploadStore::new(&config.uploads.dir) {
        Ok(store) => store,
        Err(e) => {
            tracing::error!("Failed to prepare upload directory: {:?}", e);
            return Err(Box::new(e));
        }
    };
    tracing::info!("Staging uploads in {:?}", uploads.dir());

    let model_service = match OrtModelService::new(&config.model) {
        Ok(service) => service,
        Err(e) => {
            tracing::error!("Failed to initialize model service: {:?}", e);
            return Err(Box::new(e));
        }
    };

    let labels = ClassLabels::default();
    tracing::info!("Serving {} classes: {:?}", labels.len(), labels.as_slice());

    let metrics = Arc::new(Metrics::new()?);
    let state = SharedState::new(model_service, labels, uploads, metrics);
    let server = HttpServer::new(state, &config.server).await?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let server_shutdown_rx = shutdown_tx.subscribe();

    let server_handle = server.run(server_shutdown_rx).await?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    let _ = shutdown_tx.send(());
    if let Ok(Err(e)) = server_handle.await {
        tracing::error!("Server stopped with an error: {:?}", e);
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
