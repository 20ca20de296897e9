//! HTTP REST API server.
//!
//! Mounts every resource under `/api` and exposes `GET /health`.
//!
//! Routes for a resource with collection `vehicles` and identity `vin`:
//! - GET    /api/vehicles        list, or search when a query string is present
//! - POST   /api/vehicles        create
//! - GET    /api/vehicles/:vin   read (honors If-None-Match)
//! - PUT    /api/vehicles/:vin   update (honors If-Match / If-None-Match)
//! - DELETE /api/vehicles/:vin   delete (honors If-Match / If-None-Match)

use axum::{
    body::{Bytes, HttpBody},
    extract::{ConnectInfo, Path, RawQuery, Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use fleet_resource::encoding::MediaType;
use fleet_resource::etag::{ETag, EXPIRES_IN_THE_PAST, NO_CACHE};
use fleet_resource::store::{Row, Store};
use fleet_resource::{
    Conditional, ErrorKind, ErrorResponse, Payload, Pipeline, QueryParams, Resource,
    ResourceError, Tagged,
};
use prost::Message;
use serde::Serialize;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tower_http::timeout::TimeoutLayer;

/// Prefix under which resources are mounted.
pub const API_PREFIX: &str = "/api";

const REQUEST_ID: &str = "request-id";
const X_REQUEST_ID: &str = "x-request-id";

/// HTTP server state for one resource.
pub struct RestState<R> {
    pipeline: Pipeline<R>,
}

impl<R> Clone for RestState<R> {
    fn clone(&self) -> Self {
        Self {
            pipeline: self.pipeline.clone(),
        }
    }
}

/// Build the REST router for `resource`, with `/health` backed by `store`.
pub fn router<R>(
    resource: Arc<R>,
    store: Arc<dyn Store<R::Value>>,
    request_timeout: Duration,
) -> Router
where
    R: Resource,
    R::Value: Row,
{
    let binding = resource.routes();
    let state = RestState {
        pipeline: Pipeline::new(resource),
    };

    let api = Router::new()
        .route(
            &binding.collection_path(),
            get(list_or_search::<R>).post(create::<R>),
        )
        .route(
            &binding.item_path(),
            get(get_one::<R>).put(update::<R>).delete(delete::<R>),
        )
        .with_state(state);

    let health = Router::new()
        .route("/health", get(health_handler::<R::Value>))
        .with_state(store);

    Router::new()
        .nest(API_PREFIX, api)
        .merge(health)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(middleware::from_fn(access_log))
}

/// HTTP server for the REST API.
pub struct HttpServer {
    addr: SocketAddr,
    router: Router,
    local_addr: Option<SocketAddr>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    server_handle: Option<JoinHandle<Result<(), std::io::Error>>>,
}

impl HttpServer {
    /// Create a new HTTP server serving `router`.
    ///
    /// # Arguments
    /// - `addr`: Socket address to bind; port 0 picks a free port
    /// - `router`: Routes to serve, usually from [`router`]
    pub fn new(addr: SocketAddr, router: Router) -> Self {
        Self {
            addr,
            router,
            local_addr: None,
            shutdown_tx: None,
            server_handle: None,
        }
    }

    /// Start the HTTP server.
    ///
    /// Returns once the listener is bound.
    pub async fn start(&mut self) -> Result<(), HttpServerError> {
        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .map_err(|e| HttpServerError::Startup(format!("Failed to bind {}: {}", self.addr, e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| HttpServerError::Startup(format!("Failed to read bound address: {}", e)))?;
        self.local_addr = Some(local_addr);
        tracing::info!("Starting HTTP server on {}", local_addr);

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        self.shutdown_tx = Some(shutdown_tx);

        let app = self.router.clone();
        let server_handle = tokio::spawn(async move {
            axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
        });

        self.server_handle = Some(server_handle);

        tracing::info!("HTTP server started successfully");
        Ok(())
    }

    /// Shutdown the HTTP server, waiting up to `grace` for in-flight requests.
    pub async fn shutdown(mut self, grace: Duration) -> Result<(), HttpServerError> {
        tracing::info!("Shutting down HTTP server");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(mut handle) = self.server_handle.take() {
            match tokio::time::timeout(grace, &mut handle).await {
                Ok(joined) => joined
                    .map_err(|e| HttpServerError::Shutdown(format!("Join error: {}", e)))?
                    .map_err(|e| HttpServerError::Shutdown(format!("Server error: {}", e)))?,
                Err(_) => {
                    tracing::warn!(?grace, "HTTP server did not drain in time, aborting");
                    handle.abort();
                }
            }
        }

        tracing::info!("HTTP server shutdown complete");
        Ok(())
    }

    /// Bound address, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

/// HTTP server errors.
#[derive(Debug, thiserror::Error)]
pub enum HttpServerError {
    #[error("Startup error: {0}")]
    Startup(String),

    #[error("Shutdown error: {0}")]
    Shutdown(String),
}

/// Status code for an error class.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict | ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
        ErrorKind::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
        ErrorKind::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn header_values(headers: &HeaderMap, name: HeaderName) -> Vec<&str> {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect()
}

/// The tag a mutation is conditional on: `If-Match`, else `If-None-Match`.
pub fn precondition(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::IF_MATCH)
        .or_else(|| headers.get(header::IF_NONE_MATCH))
        .and_then(|v| v.to_str().ok())
}

impl<R: Resource> RestState<R> {
    fn response_encoding(&self, headers: &HeaderMap) -> MediaType {
        self.pipeline.resource().encodings().response_encoding(
            header_values(headers, header::ACCEPT),
            header_values(headers, header::CONTENT_TYPE),
        )
    }

    fn payload(&self, headers: &HeaderMap, body: Bytes) -> Payload<R::Value> {
        let content_types = header_values(headers, header::CONTENT_TYPE)
            .into_iter()
            .map(str::to_string)
            .collect();
        Payload::encoded(content_types, body)
    }

    fn tagged(&self, status: StatusCode, media: MediaType, tagged: Tagged<R::Value>) -> Response {
        match self.pipeline.resource().marshal(media, &tagged.value) {
            Ok(body) => {
                let mut response = encoded(status, media, body);
                if let Some(etag) = tagged.etag {
                    with_etag(response.headers_mut(), &etag);
                }
                response
            }
            Err(e) => self.error(media, e),
        }
    }

    fn list(&self, media: MediaType, values: &[R::Value]) -> Response {
        match self.pipeline.resource().marshal_list(media, values) {
            Ok(body) => encoded(StatusCode::OK, media, body),
            Err(e) => self.error(media, e),
        }
    }

    fn error(&self, media: MediaType, err: ResourceError) -> Response {
        let status = status_for(err.kind());
        if status.is_server_error() {
            tracing::error!(error = %err, "request failed");
        } else {
            tracing::debug!(error = %err, %status, "request rejected");
        }

        if matches!(
            err.kind(),
            ErrorKind::NotFound | ErrorKind::PreconditionFailed
        ) {
            return status.into_response();
        }

        let body = ErrorResponse::from(&err);
        let encoded_body = match media {
            MediaType::Protobuf => Ok(body.encode_to_vec()),
            other => self.pipeline.resource().encodings().marshal(other, &body),
        };
        match encoded_body {
            Ok(bytes) => encoded(status, media, bytes),
            Err(e) => {
                tracing::error!(error = %e, "failed to encode error body");
                status.into_response()
            }
        }
    }
}

fn encoded(status: StatusCode, media: MediaType, body: Vec<u8>) -> Response {
    (status, [(header::CONTENT_TYPE, media.as_str())], body).into_response()
}

fn with_etag(headers: &mut HeaderMap, etag: &ETag) {
    match HeaderValue::from_str(&etag.header_value()) {
        Ok(value) => {
            headers.insert(header::ETAG, value);
        }
        Err(e) => {
            tracing::warn!(error = %e, "etag is not a valid header value");
            return;
        }
    }
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(NO_CACHE));
    headers.insert(header::PRAGMA, HeaderValue::from_static(NO_CACHE));
    headers.insert(
        header::EXPIRES,
        HeaderValue::from_static(EXPIRES_IN_THE_PAST),
    );
}

/// GET /api/{collection}
async fn list_or_search<R: Resource>(
    State(state): State<RestState<R>>,
    RawQuery(raw): RawQuery,
    headers: HeaderMap,
) -> Response {
    let media = state.response_encoding(&headers);
    let query = QueryParams::parse(raw.as_deref().unwrap_or_default());
    match state.pipeline.collection(&query).await {
        Ok(values) => state.list(media, &values),
        Err(e) => state.error(media, e),
    }
}

/// POST /api/{collection}
async fn create<R: Resource>(
    State(state): State<RestState<R>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let media = state.response_encoding(&headers);
    match state.pipeline.create(state.payload(&headers, body)).await {
        Ok(tagged) => state.tagged(StatusCode::OK, media, tagged),
        Err(e) => state.error(media, e),
    }
}

/// GET /api/{collection}/{id}
async fn get_one<R: Resource>(
    State(state): State<RestState<R>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let media = state.response_encoding(&headers);
    let ctx = state.pipeline.resource().routes().context_for(id);
    let if_none_match = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok());

    match state.pipeline.get(&ctx, if_none_match).await {
        Ok(Conditional::NotModified(etag)) => {
            let mut response = StatusCode::NOT_MODIFIED.into_response();
            with_etag(response.headers_mut(), &etag);
            response
        }
        Ok(Conditional::Fresh(tagged)) => state.tagged(StatusCode::OK, media, tagged),
        Err(e) => state.error(media, e),
    }
}

/// PUT /api/{collection}/{id}
async fn update<R: Resource>(
    State(state): State<RestState<R>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let media = state.response_encoding(&headers);
    let ctx = state.pipeline.resource().routes().context_for(id);
    let payload = state.payload(&headers, body);

    match state
        .pipeline
        .update(payload, &ctx, precondition(&headers))
        .await
    {
        Ok(tagged) => state.tagged(StatusCode::OK, media, tagged),
        Err(e) => state.error(media, e),
    }
}

/// DELETE /api/{collection}/{id}
async fn delete<R: Resource>(
    State(state): State<RestState<R>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let media = state.response_encoding(&headers);
    let ctx = state.pipeline.resource().routes().context_for(id);

    match state.pipeline.delete(&ctx, precondition(&headers)).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => state.error(media, e),
    }
}

#[derive(Debug, Serialize)]
struct HealthStatus {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

/// Health check endpoint handler.
///
/// GET /health
///
/// Returns 200 when the store answers a ping, 503 otherwise.
async fn health_handler<V: Row>(State(store): State<Arc<dyn Store<V>>>) -> Response {
    match store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthStatus {
                status: "healthy",
                details: None,
            }),
        )
            .into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthStatus {
                    status: "unhealthy",
                    details: Some(e.to_string()),
                }),
            )
                .into_response()
        }
    }
}

/// Request attributes recorded in the access log.
#[derive(Debug, Default, PartialEq)]
struct AccessFields {
    remote_ip: Option<IpAddr>,
    request_id: Option<String>,
    user_agent: Option<String>,
    referer: Option<String>,
}

impl AccessFields {
    fn from_request(request: &Request) -> Self {
        let headers = request.headers();
        let text = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        Self {
            remote_ip: request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip()),
            request_id: text(REQUEST_ID).or_else(|| text(X_REQUEST_ID)),
            user_agent: text(header::USER_AGENT.as_str()),
            referer: text(header::REFERER.as_str()),
        }
    }
}

/// Body length in bytes, when known up front.
fn response_size(response: &Response) -> Option<u64> {
    response.body().size_hint().exact()
}

/// Access log line per request.
async fn access_log(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let fields = AccessFields::from_request(&request);
    let started = Instant::now();

    let response = next.run(request).await;

    tracing::info!(
        %method,
        %uri,
        status = response.status().as_u16(),
        size = response_size(&response),
        elapsed_ms = started.elapsed().as_millis() as u64,
        remote_ip = fields.remote_ip.map(tracing::field::display),
        request_id = fields.request_id.as_deref(),
        user_agent = fields.user_agent.as_deref(),
        referer = fields.referer.as_deref(),
        "http request"
    );
    response
}
