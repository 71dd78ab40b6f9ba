use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use axum_server::Handle;
use blob_store::BlobStorage;
use tokio::signal;
use tracing::{error, info};

use crate::{
    config::ServerConfig,
    gateway::DatasetGateway,
    hub::HuggingFaceHub,
    routes::{create_routes, RouteState},
};

#[derive(Clone)]
pub struct Service {
    pub config: ServerConfig,
    pub blob_storage: Arc<BlobStorage>,
    pub gateway: Arc<DatasetGateway>,
}

impl Service {
    pub async fn new(config: ServerConfig) -> Result<Self> {
        let meter = opentelemetry::global::meter("dataset-gateway");
        let blob_storage = Arc::new(
            BlobStorage::new(&config.blob_storage)
                .context("error initializing BlobStorage")?
                .with_metrics(&meter),
        );
        let hub = Arc::new(
            HuggingFaceHub::new(config.hub.clone()).context("error initializing dataset hub")?,
        );
        let gateway = Arc::new(DatasetGateway::new(
            blob_storage.clone(),
            hub,
            &config.stream,
        ));

        Ok(Self {
            config,
            blob_storage,
            gateway,
        })
    }

    pub async fn start(&self) -> Result<()> {
        let route_state = RouteState {
            gateway: self.gateway.clone(),
        };

        let handle = Handle::new();
        let handle_sh = handle.clone();
        tokio::spawn(async move {
            shutdown_signal(handle_sh).await;
            info!("graceful shutdown signal received, shutting down server gracefully");
        });

        let addr: SocketAddr = self.config.listen_addr.parse()?;
        info!(
            storage = self.blob_storage.get_url(),
            "server api listening on {}", self.config.listen_addr
        );
        let routes = create_routes(route_state);
        axum_server::bind(addr)
            .handle(handle)
            .serve(routes.into_make_service())
            .await?;

        Ok(())
    }
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {:?}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("failed to install signal handler: {:?}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
        },
        _ = terminate => {
        },
    }
    handle.shutdown();
    info!("signal received, shutting down server gracefully");
}
