//! HTTP server for diagram conversion
//!
//! Provides HTTP endpoints:
//! - GET /health - Health check with service versions
//! - POST / - JSON conversion request
//! - GET /:service/:output_format/:source_encoded - Encoded-source conversion
//! - POST /:service/:output_format - Raw-body conversion

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{
        rejection::{BytesRejection, JsonRejection},
        DefaultBodyLimit, Path, State,
    },
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use diagramd_core::decode::DEFAULT_MAX_SOURCE_BYTES;
use diagramd_core::response::if_none_match;
use diagramd_core::{
    CachePolicy, DecodeError, DiagramService, DiagramSource, FileFormat, ResponseBuilder,
    ResponseEnvelope,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

use crate::error::{ApiError, Error, Result, StatusPolicy};

/// Services by name
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    services: BTreeMap<String, Arc<dyn DiagramService>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `service` under its own name, replacing any previous binding
    pub fn register(&mut self, service: Arc<dyn DiagramService>) {
        let name = service.name().to_string();
        if self.services.insert(name.clone(), service).is_some() {
            tracing::warn!(service = %name, "Replacing registered service");
        }
    }

    pub fn with(mut self, service: Arc<dyn DiagramService>) -> Self {
        self.register(service);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn DiagramService>> {
        self.services.get(name)
    }

    /// Comma-separated service names, sorted
    pub fn available(&self) -> String {
        self.services.keys().map(String::as_str).collect::<Vec<_>>().join(", ")
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn DiagramService>> {
        self.services.values()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

/// Router-level settings
#[derive(Debug, Clone)]
pub struct HttpOptions {
    pub cache_policy: CachePolicy,
    pub status_policy: StatusPolicy,
    /// Largest diagram source accepted in a request body
    pub max_source_bytes: usize,
}

/// Room for the JSON envelope around a source at the limit
const BODY_ENVELOPE_BYTES: usize = 64 * 1024;

impl HttpOptions {
    /// Transport-level cap on request bodies
    ///
    /// JSON escaping can double a source (`\n` for every newline), so the
    /// cap sits well above `max_source_bytes`. The source itself is checked
    /// against `max_source_bytes` after extraction.
    pub fn body_limit(&self) -> usize {
        self.max_source_bytes
            .saturating_mul(2)
            .saturating_add(BODY_ENVELOPE_BYTES)
    }
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            cache_policy: CachePolicy::default(),
            status_policy: StatusPolicy::default(),
            max_source_bytes: DEFAULT_MAX_SOURCE_BYTES,
        }
    }
}

/// HTTP server state shared across handlers
#[derive(Clone)]
struct ServerState {
    registry: Arc<ServiceRegistry>,
    options: Arc<HttpOptions>,
}

impl ServerState {
    fn service(&self, name: &str) -> std::result::Result<Arc<dyn DiagramService>, ApiError> {
        self.registry.get(name).cloned().ok_or_else(|| {
            ApiError::not_found(format!(
                "Unknown service: {}. Must be one of {}",
                name,
                self.registry.available()
            ))
        })
    }

    fn fail(&self, error: diagramd_core::Error) -> ApiError {
        ApiError::from_conversion(error, &self.options.status_policy)
    }

    /// Map a body extraction failure; a body over the cap is an oversized source
    fn reject_body(&self, status: StatusCode, text: String, limit: usize) -> ApiError {
        if status == StatusCode::PAYLOAD_TOO_LARGE {
            return self.fail(DecodeError::TooLarge { limit }.into());
        }
        ApiError::new(status, text)
    }
}

/// Diagram conversion server
pub struct HttpServer {
    /// Server bind address
    bind_address: String,
    state: ServerState,
}

impl HttpServer {
    pub fn new(bind_address: impl Into<String>, registry: ServiceRegistry, options: HttpOptions) -> Self {
        Self {
            bind_address: bind_address.into(),
            state: ServerState {
                registry: Arc::new(registry),
                options: Arc::new(options),
            },
        }
    }

    pub fn bind_address(&self) -> &str {
        &self.bind_address
    }

    /// Build the router with all endpoints
    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    /// Bind the configured address
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr: std::net::SocketAddr = self
            .bind_address
            .parse()
            .map_err(|e| Error::InvalidAddress(format!("{}: {}", self.bind_address, e)))?;

        TcpListener::bind(addr).await.map_err(|source| Error::Bind {
            address: self.bind_address.clone(),
            source,
        })
    }

    /// Serve on `listener` until `shutdown` resolves
    pub async fn run<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local = listener
            .local_addr()
            .map_err(|e| Error::ServerError(e.to_string()))?;
        tracing::info!(
            address = %local,
            services = %self.state.registry.available(),
            "Starting HTTP server"
        );

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| Error::ServerError(format!("Server error: {}", e)))?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Bind and serve until the process exits
    pub async fn serve(self) -> Result<()> {
        let listener = self.bind().await?;
        self.run(listener, std::future::pending()).await
    }
}

fn build_router(state: ServerState) -> Router {
    let body_limit = state.options.body_limit();

    Router::new()
        .route("/health", get(health_handler))
        .route("/", post(json_handler))
        .route("/:service/:output_format", post(raw_handler))
        .route("/:service/:output_format/:source_encoded", get(encoded_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
        .layer(
            tower::ServiceBuilder::new()
                .layer(tower_http::trace::TraceLayer::new_for_http())
                .layer(tower_http::cors::CorsLayer::permissive()),
        )
}

// Handler implementations

/// Response body for /health
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub services: BTreeMap<String, String>,
}

/// GET /health
async fn health_handler(State(state): State<ServerState>) -> Json<HealthResponse> {
    let services = state
        .registry
        .iter()
        .map(|service| (service.name().to_string(), service.version().to_string()))
        .collect();

    Json(HealthResponse {
        status: "pass".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        services,
    })
}

/// Request body for POST /
#[derive(Debug, Serialize, Deserialize)]
pub struct ConvertRequest {
    /// Unencoded diagram source
    pub diagram_source: String,
    /// Service name
    pub diagram_type: String,
    pub output_format: String,
}

/// POST / - JSON conversion
async fn json_handler(
    State(state): State<ServerState>,
    request: std::result::Result<Json<ConvertRequest>, JsonRejection>,
) -> std::result::Result<Response, ApiError> {
    let Json(request) = request.map_err(|rejection| {
        state.reject_body(
            rejection.status(),
            rejection.body_text(),
            state.options.max_source_bytes,
        )
    })?;
    let service = state.service(&request.diagram_type)?;
    let format = service
        .resolve_format(&request.output_format)
        .map_err(|e| state.fail(e))?;
    let source = service
        .raw_source(Bytes::from(request.diagram_source))
        .map_err(|e| state.fail(e))?;

    respond(&state, service.as_ref(), source, format, None).await
}

/// GET /:service/:output_format/:source_encoded
async fn encoded_handler(
    State(state): State<ServerState>,
    Path((service, output_format, source_encoded)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> std::result::Result<Response, ApiError> {
    let service = state.service(&service)?;
    let format = service
        .resolve_format(&output_format)
        .map_err(|e| state.fail(e))?;
    let source = service
        .decode_source(&source_encoded)
        .map_err(|e| state.fail(e))?;

    respond(&state, service.as_ref(), source, format, Some(&headers)).await
}

/// POST /:service/:output_format - raw source as body
async fn raw_handler(
    State(state): State<ServerState>,
    Path((service, output_format)): Path<(String, String)>,
    body: std::result::Result<Bytes, BytesRejection>,
) -> std::result::Result<Response, ApiError> {
    let service = state.service(&service)?;
    let format = service
        .resolve_format(&output_format)
        .map_err(|e| state.fail(e))?;
    let body = body.map_err(|rejection| {
        state.reject_body(
            rejection.status(),
            rejection.body_text(),
            service.max_source_bytes(),
        )
    })?;
    let source = service.raw_source(body).map_err(|e| state.fail(e))?;

    respond(&state, service.as_ref(), source, format, None).await
}

/// Answer a validated conversion
///
/// `validators` carries the request headers on GET routes only; a matching
/// `If-None-Match` there short-circuits to `304` without rendering.
async fn respond(
    state: &ServerState,
    service: &dyn DiagramService,
    source: DiagramSource,
    format: FileFormat,
    validators: Option<&HeaderMap>,
) -> std::result::Result<Response, ApiError> {
    let builder = ResponseBuilder::new(service.version(), state.options.cache_policy);
    let etag = builder.etag(&source, format);

    let matched = validators
        .and_then(|headers| headers.get(header::IF_NONE_MATCH))
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| if_none_match(value, &etag));
    if matched {
        tracing::debug!(service = %service.name(), format = %format, "Validator matched, skipping render");
        return Ok(envelope_response(builder.not_modified(etag)));
    }

    let artifact = service
        .render(&source, format)
        .await
        .map_err(|e| state.fail(e))?;

    Ok(envelope_response(builder.build(&source, artifact.format, artifact.bytes)))
}

/// Convert a transport-independent envelope into an axum response
pub fn envelope_response(envelope: ResponseEnvelope) -> Response {
    let status = StatusCode::from_u16(envelope.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let mut response = Body::from(envelope.body).into_response();
    *response.status_mut() = status;

    let headers = response.headers_mut();
    if let Some(content_type) = envelope.content_type {
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    }
    if let Some(etag) = envelope.etag.and_then(|v| HeaderValue::from_str(&v).ok()) {
        headers.insert(header::ETAG, etag);
    }
    if let Some(cache_control) = envelope
        .cache_control
        .and_then(|v| HeaderValue::from_str(&v).ok())
    {
        headers.insert(header::CACHE_CONTROL, cache_control);
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use diagramd_core::{BlockingPool, CommandService, CommandTemplate, FormatSet, ServiceDescriptor};

    fn service(name: &str, version: &str) -> Arc<dyn DiagramService> {
        Arc::new(CommandService::new(
            ServiceDescriptor::new(name, FormatSet::new([FileFormat::Svg]), CommandTemplate::new(name))
                .with_version(version),
            BlockingPool::new(1),
        ))
    }

    #[test]
    fn test_registry_lists_services_sorted() {
        let registry = ServiceRegistry::new()
            .with(service("plantuml", "1.0"))
            .with(service("graphviz", "2.0"));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.available(), "graphviz, plantuml");
        assert!(registry.get("graphviz").is_some());
        assert!(registry.get("mermaid").is_none());
    }

    #[test]
    fn test_registry_replaces_by_name() {
        let registry = ServiceRegistry::new()
            .with(service("graphviz", "1.0"))
            .with(service("graphviz", "2.0"));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("graphviz").map(|s| s.version().to_string()), Some("2.0".to_string()));
    }

    #[test]
    fn test_unknown_service_is_not_found() {
        let state = ServerState {
            registry: Arc::new(ServiceRegistry::new().with(service("graphviz", "1.0"))),
            options: Arc::new(HttpOptions::default()),
        };
        let error = state.service("mermaid").err().unwrap();
        assert_eq!(error.status, StatusCode::NOT_FOUND);
        assert!(error.message.contains("mermaid"));
        assert!(error.message.contains("graphviz"));
    }

    #[test]
    fn test_body_limit_leaves_room_for_escaping() {
        let options = HttpOptions {
            max_source_bytes: 4096,
            ..HttpOptions::default()
        };
        assert_eq!(options.body_limit(), 2 * 4096 + 64 * 1024);

        let unbounded = HttpOptions {
            max_source_bytes: usize::MAX,
            ..HttpOptions::default()
        };
        assert_eq!(unbounded.body_limit(), usize::MAX);
    }

    #[test]
    fn test_oversized_body_is_a_decode_error() {
        let state = ServerState {
            registry: Arc::new(ServiceRegistry::new()),
            options: Arc::new(HttpOptions::default()),
        };
        let error = state.reject_body(StatusCode::PAYLOAD_TOO_LARGE, "length limit exceeded".to_string(), 4096);
        assert_eq!(error.status, StatusCode::BAD_REQUEST);
        assert!(error.message.contains("exceeds the maximum size of 4096 bytes"));

        let error = state.reject_body(StatusCode::UNSUPPORTED_MEDIA_TYPE, "Expected JSON".to_string(), 4096);
        assert_eq!(error.status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(error.message, "Expected JSON");
    }

    #[test]
    fn test_convert_request_wire_names() {
        let request: ConvertRequest = serde_json::from_str(
            r#"{"diagram_source": "a -> b", "diagram_type": "graphviz", "output_format": "svg"}"#,
        )
        .unwrap();
        assert_eq!(request.diagram_source, "a -> b");
        assert_eq!(request.diagram_type, "graphviz");
        assert_eq!(request.output_format, "svg");
    }

    #[test]
    fn test_envelope_response_copies_headers() {
        let source = DiagramSource::from_raw("a -> b", 64).unwrap();
        let builder = ResponseBuilder::new("1.0", CachePolicy::default());
        let envelope = builder.build(&source, FileFormat::Svg, Bytes::from_static(b"<svg/>"));
        let etag = envelope.etag.clone().unwrap();

        let response = envelope_response(envelope);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/svg+xml");
        assert_eq!(response.headers()[header::ETAG], etag.as_str());
        assert_eq!(response.headers()[header::CACHE_CONTROL], "public, max-age=432000");
    }

    #[test]
    fn test_not_modified_envelope() {
        let builder = ResponseBuilder::new("1.0", CachePolicy::default());
        let response = envelope_response(builder.not_modified("\"abc\"".to_string()));
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
        assert!(response.headers().get(header::CONTENT_TYPE).is_none());
        assert_eq!(response.headers()[header::ETAG], "\"abc\"");
    }
}
