//! Diagram services
//!
//! Every renderer is exposed through the same [`DiagramService`] contract.
//! Renderer bindings differ only in their [`ServiceDescriptor`] (command line
//! template and supported formats); the pipeline itself lives in
//! [`CommandService`] and is shared by composition.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;

use crate::decode::{CompressedSourceDecoder, DiagramSource, SourceDecoder, DEFAULT_MAX_SOURCE_BYTES};
use crate::error::{Error, Result};
use crate::executor::{CommandExecutor, ExecutionRequest, ProcessExecutor};
use crate::format::{FileFormat, FormatSet};
use crate::pool::BlockingPool;

/// Placeholder substituted with the resolved format's canonical name
pub const FORMAT_PLACEHOLDER: &str = "{format}";

/// Default per-invocation deadline
pub const DEFAULT_RENDER_TIMEOUT: Duration = Duration::from_secs(15);

/// Renderer command line with `{format}` placeholders
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandTemplate {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Replace the executable, keeping the arguments
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Arguments for `format`
    ///
    /// Only the canonical format name is ever substituted, never client input.
    pub fn args_for(&self, format: FileFormat) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| arg.replace(FORMAT_PLACEHOLDER, format.name()))
            .collect()
    }
}

/// Immutable description of one renderer binding
#[derive(Debug, Clone)]
pub struct ServiceDescriptor {
    pub name: String,
    /// Renderer version tag, part of every cache validator
    pub version: String,
    pub formats: FormatSet,
    pub command: CommandTemplate,
    pub timeout: Duration,
}

impl ServiceDescriptor {
    pub fn new(name: impl Into<String>, formats: FormatSet, command: CommandTemplate) -> Self {
        Self {
            name: name.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            formats,
            command,
            timeout: DEFAULT_RENDER_TIMEOUT,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.command = self.command.with_program(program);
        self
    }

    pub fn execution_request(&self, source: &DiagramSource, format: FileFormat) -> ExecutionRequest {
        ExecutionRequest {
            program: self.command.program().to_path_buf(),
            args: self.command.args_for(format),
            input: source.to_bytes(),
            timeout: self.timeout,
        }
    }
}

/// Output of a successful conversion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedArtifact {
    pub format: FileFormat,
    pub bytes: Bytes,
}

impl RenderedArtifact {
    pub fn content_type(&self) -> &'static str {
        self.format.mime_type()
    }
}

/// Contract shared by every renderer-backed service
#[async_trait]
pub trait DiagramService: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    fn supported_formats(&self) -> &FormatSet;

    /// Largest accepted source, encoded or raw
    fn max_source_bytes(&self) -> usize;

    /// Resolve a client format token against this service's formats
    fn resolve_format(&self, token: &str) -> Result<FileFormat> {
        self.supported_formats().resolve(token)
    }

    fn decode_source(&self, encoded: &str) -> Result<DiagramSource>;

    /// Accept an unencoded source, e.g. a POST body
    fn raw_source(&self, body: Bytes) -> Result<DiagramSource> {
        Ok(DiagramSource::from_raw(body, self.max_source_bytes())?)
    }

    /// Run the renderer; the only step that leaves the calling task
    async fn render(&self, source: &DiagramSource, format: FileFormat) -> Result<RenderedArtifact>;

    /// Resolve, decode and render
    ///
    /// Each step gates the next, so an unsupported format or a malformed
    /// source never spawns a process.
    async fn convert(&self, encoded: &str, token: &str) -> Result<RenderedArtifact> {
        let format = self.resolve_format(token)?;
        let source = self.decode_source(encoded)?;
        self.render(&source, format).await
    }
}

/// [`DiagramService`] backed by an external command
pub struct CommandService {
    descriptor: Arc<ServiceDescriptor>,
    decoder: Arc<dyn SourceDecoder>,
    executor: Arc<dyn ProcessExecutor>,
    pool: BlockingPool,
    max_source_bytes: usize,
}

impl CommandService {
    pub fn new(descriptor: ServiceDescriptor, pool: BlockingPool) -> Self {
        Self {
            descriptor: Arc::new(descriptor),
            decoder: Arc::new(CompressedSourceDecoder::new(DEFAULT_MAX_SOURCE_BYTES)),
            executor: Arc::new(CommandExecutor::new()),
            pool,
            max_source_bytes: DEFAULT_MAX_SOURCE_BYTES,
        }
    }

    /// Limit decoded and raw sources to `max_source_bytes`
    pub fn with_max_source_bytes(mut self, max_source_bytes: usize) -> Self {
        self.max_source_bytes = max_source_bytes;
        self.decoder = Arc::new(CompressedSourceDecoder::new(max_source_bytes));
        self
    }

    pub fn with_decoder(mut self, decoder: Arc<dyn SourceDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn ProcessExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }
}

#[async_trait]
impl DiagramService for CommandService {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn version(&self) -> &str {
        &self.descriptor.version
    }

    fn supported_formats(&self) -> &FormatSet {
        &self.descriptor.formats
    }

    fn max_source_bytes(&self) -> usize {
        self.max_source_bytes
    }

    fn decode_source(&self, encoded: &str) -> Result<DiagramSource> {
        Ok(self.decoder.decode(encoded)?)
    }

    async fn render(&self, source: &DiagramSource, format: FileFormat) -> Result<RenderedArtifact> {
        // Formats normally arrive through resolve_format; this guards direct callers
        if !self.descriptor.formats.supports(format) {
            return Err(Error::UnsupportedFormat {
                token: format.name().to_string(),
                supported: self.descriptor.formats.stringify().to_string(),
            });
        }

        let request = self.descriptor.execution_request(source, format);
        let executor = Arc::clone(&self.executor);
        let started = Instant::now();

        let outcome = self.pool.run(move || executor.execute(&request)).await?;

        match outcome {
            Ok(bytes) => {
                tracing::info!(
                    service = %self.descriptor.name,
                    format = %format,
                    source_bytes = source.len(),
                    output_bytes = bytes.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Diagram rendered"
                );
                Ok(RenderedArtifact {
                    format,
                    bytes: Bytes::from(bytes),
                })
            }
            Err(e) => {
                tracing::warn!(
                    service = %self.descriptor.name,
                    format = %format,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    error = %e,
                    "Diagram rendering failed"
                );
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graphviz() -> ServiceDescriptor {
        ServiceDescriptor::new(
            "graphviz",
            FormatSet::new([FileFormat::Png, FileFormat::Svg, FileFormat::Jpeg]),
            CommandTemplate::new("dot").arg("-T{format}"),
        )
    }

    #[test]
    fn test_template_substitutes_canonical_name() {
        let template = CommandTemplate::new("plantuml").arg("-pipe").arg("-t{format}");
        assert_eq!(template.args_for(FileFormat::Svg), vec!["-pipe", "-tsvg"]);
        assert_eq!(template.args_for(FileFormat::Png), vec!["-pipe", "-tpng"]);
    }

    #[test]
    fn test_execution_request_from_descriptor() {
        let descriptor = graphviz()
            .with_program("/usr/local/bin/dot")
            .with_timeout(Duration::from_secs(3));
        let source = DiagramSource::from_raw("graph { a -- b }", 1024).unwrap();

        let request = descriptor.execution_request(&source, FileFormat::Svg);
        assert_eq!(request.program, PathBuf::from("/usr/local/bin/dot"));
        assert_eq!(request.args, vec!["-Tsvg"]);
        assert_eq!(&request.input[..], b"graph { a -- b }");
        assert_eq!(request.timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_descriptor_defaults() {
        let descriptor = graphviz();
        assert_eq!(descriptor.version, env!("CARGO_PKG_VERSION"));
        assert_eq!(descriptor.timeout, DEFAULT_RENDER_TIMEOUT);
        assert_eq!(descriptor.command.program(), Path::new("dot"));
    }

    #[test]
    fn test_raw_source_respects_limit() {
        let service = CommandService::new(graphviz(), BlockingPool::new(1)).with_max_source_bytes(4);
        assert_eq!(service.max_source_bytes(), 4);
        assert!(service.raw_source(Bytes::from_static(b"a--b")).is_ok());
        assert!(matches!(
            service.raw_source(Bytes::from_static(b"a -- b")),
            Err(Error::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_render_rejects_format_outside_descriptor() {
        let service = CommandService::new(graphviz(), BlockingPool::new(1));
        let source = DiagramSource::from_raw("graph { a -- b }", 1024).unwrap();
        let err = service.render(&source, FileFormat::Pdf).await.unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat { .. }));
    }
}
