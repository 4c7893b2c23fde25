use gateway::{AppState, config::get_configuration, logging::setup_logging, router};
use inference::{ModelLoader, Segmenter, backend::ort::OrtBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = get_configuration()?;
    let _telemetry = setup_logging(&config)?;

    tracing::info!(
        environment = config.environment.as_str(),
        host = %config.host,
        port = config.port,
        model_path = %config.model_path,
        execution_provider = config.execution_provider.as_str(),
        input_width = config.input_width,
        input_height = config.input_height,
        max_upload_bytes = config.max_upload_bytes,
        max_entry_bytes = config.max_entry_bytes,
        auth_enabled = config.api_key().is_some(),
        "Loaded configuration"
    );

    let model_config = config.model_config();
    let loader = ModelLoader::new(move || {
        let backend = OrtBackend::load(&model_config)?;
        Ok(Segmenter::new(backend, &model_config))
    });

    if config.preload_model {
        loader.get().await?;
    }

    let device = OrtBackend::resolve_device(config.execution_provider);
    tracing::info!(device, "Resolved execution device");

    let app = router(AppState::new(loader, &config, device));

    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    tracing::info!(addr = %listener.local_addr()?, "ToonOut API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
