//! Server node composition.
//!
//! Wires the store, the vehicle resource and both transports together and
//! owns their lifecycle.

use crate::config::ServerConfig;
use crate::http::{self, HttpServer};
use fleet_resource::store::{connect_with_retry, Store, StoreResult};
use fleet_resource::{MemoryStore, Resource, StoredVehicle, Vehicle};
use fleet_transport_grpc::GrpcServer;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

/// Server node - main composition root.
pub struct Node {
    config: ServerConfig,
    store: Arc<dyn Store<Vehicle>>,
    vehicles: Arc<StoredVehicle>,
    grpc_server: Option<GrpcServer>,
    http_server: Option<HttpServer>,
}

impl Node {
    /// Create a node backed by an in-process store.
    pub async fn new(config: ServerConfig) -> Result<Self, NodeError> {
        Self::connect(config, || async {
            let store: Arc<dyn Store<Vehicle>> = Arc::new(MemoryStore::<Vehicle>::new());
            Ok(store)
        })
        .await
    }

    /// Create a node whose store is produced by `connect`.
    ///
    /// # Arguments
    /// - `config`: Node configuration; `config.store` bounds the retries
    /// - `connect`: Opens a store handle, called once per attempt
    ///
    /// Refused connections are retried; any other failure, or running out of
    /// retries, fails initialization.
    pub async fn connect<F, Fut>(config: ServerConfig, connect: F) -> Result<Self, NodeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<Arc<dyn Store<Vehicle>>>>,
    {
        tracing::info!("Initializing node");

        let store = connect_with_retry(
            config.store.connect_retries,
            config.connect_backoff(),
            connect,
        )
        .await
        .map_err(|e| NodeError::Initialization(format!("Failed to connect to store: {}", e)))?;

        store
            .ping()
            .await
            .map_err(|e| NodeError::Initialization(format!("Store ping failed: {}", e)))?;

        let vehicles = Arc::new(StoredVehicle::new(store.clone()));
        vehicles
            .create_schema()
            .await
            .map_err(|e| NodeError::Initialization(format!("Failed to create schema: {}", e)))?;
        tracing::info!("Vehicle schema ready");

        Ok(Self {
            config,
            store,
            vehicles,
            grpc_server: None,
            http_server: None,
        })
    }

    /// Start the gRPC and HTTP servers.
    pub async fn start(&mut self) -> Result<(), NodeError> {
        tracing::info!("Starting node");

        let grpc_addr = self
            .config
            .grpc_socket_addr()
            .map_err(|e| NodeError::Startup(e.to_string()))?;
        let mut grpc_server = GrpcServer::new(grpc_addr, self.vehicles.clone());
        grpc_server
            .start()
            .await
            .map_err(|e| NodeError::Startup(format!("Failed to start gRPC server: {}", e)))?;
        self.grpc_server = Some(grpc_server);

        let http_addr = self
            .config
            .http_socket_addr()
            .map_err(|e| NodeError::Startup(e.to_string()))?;
        let router = http::router(
            self.vehicles.clone(),
            self.store.clone(),
            self.config.request_timeout(),
        );
        let mut http_server = HttpServer::new(http_addr, router);
        http_server
            .start()
            .await
            .map_err(|e| NodeError::Startup(format!("Failed to start HTTP server: {}", e)))?;
        self.http_server = Some(http_server);

        tracing::info!(
            http = ?self.http_addr(),
            grpc = ?self.grpc_addr(),
            "Node started"
        );
        Ok(())
    }

    /// Shutdown the node gracefully.
    ///
    /// Each server gets the configured grace period to drain in-flight requests.
    pub async fn shutdown(mut self) -> Result<(), NodeError> {
        tracing::info!("Shutting down node");
        let grace = self.config.shutdown_grace();

        if let Some(http_server) = self.http_server.take() {
            http_server
                .shutdown(grace)
                .await
                .map_err(|e| NodeError::Shutdown(format!("Failed to shutdown HTTP server: {}", e)))?;
        }

        if let Some(grpc_server) = self.grpc_server.take() {
            grpc_server
                .shutdown(grace)
                .await
                .map_err(|e| NodeError::Shutdown(format!("Failed to shutdown gRPC server: {}", e)))?;
        }

        tracing::info!("Node shutdown complete");
        Ok(())
    }

    /// Bound REST address, once started.
    pub fn http_addr(&self) -> Option<SocketAddr> {
        self.http_server.as_ref().and_then(HttpServer::local_addr)
    }

    /// Bound gRPC address, once started.
    pub fn grpc_addr(&self) -> Option<SocketAddr> {
        self.grpc_server.as_ref().and_then(GrpcServer::local_addr)
    }

    pub fn vehicles(&self) -> &Arc<StoredVehicle> {
        &self.vehicles
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("Initialization error: {0}")]
    Initialization(String),

    #[error("Startup error: {0}")]
    Startup(String),

    #[error("Shutdown error: {0}")]
    Shutdown(String),
}
