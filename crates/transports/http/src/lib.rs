//! HTTP transport for diagramd
//!
//! Exposes every registered [`diagramd_core::DiagramService`] over HTTP.
//!
//! # Routes
//!
//! - **Encoded source**: `GET /:service/:output_format/:source_encoded`
//! - **Raw source**: `POST /:service/:output_format` with the source as body
//! - **JSON**: `POST /` with `{ "diagram_source", "diagram_type", "output_format" }`
//! - **Health**: `GET /health`
//!
//! Successful conversions carry `Content-Type`, `ETag` and `Cache-Control`;
//! a request whose `If-None-Match` already matches is answered with `304`
//! without running the renderer. Failures are plain-text bodies whose status
//! depends only on the error kind.
//!
//! # Usage
//!
//! ```ignore
//! use diagramd_http::{HttpOptions, HttpServer, ServiceRegistry};
//!
//! let registry = ServiceRegistry::new().with(graphviz);
//! let server = HttpServer::new("127.0.0.1:8000", registry, HttpOptions::default());
//! server.serve().await?;
//! ```

pub mod error;
pub mod server;

pub use error::{ApiError, Error, Result, StatusPolicy};
pub use server::{envelope_response, ConvertRequest, HealthResponse, HttpOptions, HttpServer, ServiceRegistry};
