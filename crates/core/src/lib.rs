//! diagramd core - renderer-backed diagram conversion
//!
//! Turns an encoded diagram source into a rendered image by delegating to an
//! external command-line renderer. This crate is transport-agnostic; the HTTP
//! surface lives in `diagramd-http`.
//!
//! # Pipeline
//!
//! ```text
//! format token ──▶ FormatSet::resolve ──▶ SourceDecoder::decode ──▶ BlockingPool
//!                  (no I/O)               (pure)                    │
//!                                                                   ▼
//!                  ResponseBuilder ◀── RenderedArtifact ◀── ProcessExecutor::execute
//! ```
//!
//! Everything before the executor runs inline on the calling task; the
//! executor blocks and is always run on the bounded [`pool::BlockingPool`].
//!
//! # Example
//!
//! ```ignore
//! use diagramd_core::{BlockingPool, CommandService, CommandTemplate, FileFormat, FormatSet, ServiceDescriptor};
//!
//! let descriptor = ServiceDescriptor::new(
//!     "graphviz",
//!     FormatSet::new([FileFormat::Png, FileFormat::Svg, FileFormat::Jpeg]),
//!     CommandTemplate::new("dot").arg("-T{format}"),
//! );
//! let service = CommandService::new(descriptor, BlockingPool::new(4));
//! let artifact = service.convert(&diagramd_core::decode::encode(b"graph { a -- b }"), "svg").await?;
//! assert_eq!(artifact.content_type(), "image/svg+xml");
//! ```

pub mod decode;
pub mod error;
pub mod executor;
pub mod format;
pub mod pool;
pub mod response;
pub mod service;

pub use decode::{CompressedSourceDecoder, DecodeError, DiagramSource, SourceDecoder};
pub use error::{Error, ErrorKind, Result};
pub use executor::{CommandExecutor, ExecutionError, ExecutionRequest, ProcessExecutor};
pub use format::{FileFormat, FormatSet};
pub use pool::BlockingPool;
pub use response::{CachePolicy, ResponseBuilder, ResponseEnvelope};
pub use service::{CommandService, CommandTemplate, DiagramService, RenderedArtifact, ServiceDescriptor};
