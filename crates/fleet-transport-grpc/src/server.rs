//! gRPC server that hosts the VehicleStore service.

use crate::proto::vehicle_store_server::VehicleStoreServer;
use crate::vehicle::VehicleStoreService;
use fleet_resource::{Resource, Vehicle};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::service::Routes;
use tonic::transport::Server;

/// gRPC server wrapper.
///
/// Owns the listener and the background serving task. `addr` may use port 0;
/// after [`GrpcServer::start`] the actual bound address is available from
/// [`GrpcServer::local_addr`].
pub struct GrpcServer {
    addr: SocketAddr,
    routes: Routes,
    local_addr: Option<SocketAddr>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    server_handle: Option<JoinHandle<Result<(), tonic::transport::Error>>>,
}

impl GrpcServer {
    /// Create a server exposing `resource` as `fleet.v1.VehicleStore`.
    ///
    /// # Arguments
    /// - `addr`: Socket address to bind; port 0 picks a free port
    /// - `resource`: Vehicle resource shared with the other transports
    pub fn new<R>(addr: SocketAddr, resource: Arc<R>) -> Self
    where
        R: Resource<Value = Vehicle>,
    {
        let service = VehicleStoreService::new(resource);
        Self {
            addr,
            routes: Routes::new(VehicleStoreServer::new(service)),
            local_addr: None,
            shutdown_tx: None,
            server_handle: None,
        }
    }

    /// Bind the listener and spawn the serving task.
    ///
    /// Returns once the socket is bound, so a client may connect immediately.
    pub async fn start(&mut self) -> Result<(), GrpcServerError> {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|e| GrpcServerError::Bind(self.addr, e.to_string()))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| GrpcServerError::Bind(self.addr, e.to_string()))?;
        self.local_addr = Some(local_addr);
        tracing::info!(configured = %self.addr, "Starting gRPC server on {}", local_addr);

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);

        let server = Server::builder()
            .add_routes(self.routes.clone())
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async {
                shutdown_rx.await.ok();
            });

        let handle = tokio::spawn(async move {
            tracing::info!("gRPC server task started");
            let result = server.await;
            tracing::info!("gRPC server task stopped");
            result
        });
        self.server_handle = Some(handle);

        Ok(())
    }

    /// Stop accepting requests and wait up to `grace` for in-flight calls.
    ///
    /// The serving task is aborted if it has not finished within `grace`.
    pub async fn shutdown(mut self, grace: Duration) -> Result<(), GrpcServerError> {
        tracing::info!("Shutting down gRPC server");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(mut handle) = self.server_handle.take() {
            match tokio::time::timeout(grace, &mut handle).await {
                Ok(joined) => joined
                    .map_err(|e| GrpcServerError::Shutdown(e.to_string()))?
                    .map_err(|e| GrpcServerError::Server(e.to_string()))?,
                Err(_) => {
                    tracing::warn!(?grace, "gRPC server did not drain in time, aborting");
                    handle.abort();
                }
            }
        }

        tracing::info!("gRPC server shutdown complete");
        Ok(())
    }

    /// Configured address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Bound address, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GrpcServerError {
    #[error("Failed to bind {0}: {1}")]
    Bind(SocketAddr, String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Shutdown error: {0}")]
    Shutdown(String),
}
