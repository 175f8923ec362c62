//! Renderer bindings
//!
//! Each binding is configuration only: a service name, the formats the
//! renderer can produce and its command line. The conversion pipeline itself
//! is shared through [`CommandService`].

use std::sync::Arc;

use diagramd_core::{
    BlockingPool, CommandService, CommandTemplate, FileFormat, FormatSet, ServiceDescriptor,
};
use diagramd_http::ServiceRegistry;

use crate::config::{Config, RendererConfig};

/// Static description of one renderer
#[derive(Debug, Clone, Copy)]
pub struct RendererBinding {
    /// Service name used in request paths
    pub service: &'static str,
    /// Default executable, also the configuration key
    pub command: &'static str,
    pub formats: &'static [FileFormat],
    /// Arguments, `{format}` replaced with the canonical format name
    pub args: &'static [&'static str],
}

pub const GRAPHVIZ: RendererBinding = RendererBinding {
    service: "graphviz",
    command: "dot",
    formats: &[FileFormat::Png, FileFormat::Svg, FileFormat::Jpeg],
    args: &["-T{format}"],
};

pub const PLANTUML: RendererBinding = RendererBinding {
    service: "plantuml",
    command: "plantuml",
    formats: &[FileFormat::Png, FileFormat::Svg, FileFormat::Txt],
    args: &["-pipe", "-t{format}"],
};

pub const ERD: RendererBinding = RendererBinding {
    service: "erd",
    command: "erd",
    formats: &[FileFormat::Png, FileFormat::Svg, FileFormat::Jpeg, FileFormat::Pdf],
    args: &["-f", "{format}"],
};

pub const SVGBOB: RendererBinding = RendererBinding {
    service: "svgbob",
    command: "svgbob",
    formats: &[FileFormat::Svg],
    args: &[],
};

pub const BINDINGS: [RendererBinding; 4] = [GRAPHVIZ, PLANTUML, ERD, SVGBOB];

impl RendererBinding {
    pub fn template(&self) -> CommandTemplate {
        self.args
            .iter()
            .fold(CommandTemplate::new(self.command), |template, arg| template.arg(*arg))
    }

    /// Descriptor with the deployment's binary path and version applied
    pub fn descriptor(&self, renderer: &RendererConfig, config: &Config) -> ServiceDescriptor {
        let mut descriptor = ServiceDescriptor::new(
            self.service,
            FormatSet::new(self.formats.iter().copied()),
            self.template(),
        )
        .with_timeout(config.render_timeout());

        if let Some(bin_path) = &renderer.bin_path {
            descriptor = descriptor.with_program(bin_path.clone());
        }
        if let Some(version) = &renderer.version {
            descriptor = descriptor.with_version(version.clone());
        }
        descriptor
    }
}

/// Build every renderer service, all sharing one bounded pool
pub fn build_registry(config: &Config) -> ServiceRegistry {
    let pool = BlockingPool::new(config.limits.max_concurrent_renders);
    let mut registry = ServiceRegistry::new();

    for binding in BINDINGS {
        let renderer = config
            .renderers
            .get(binding.command)
            .cloned()
            .unwrap_or_default();
        let descriptor = binding.descriptor(&renderer, config);

        tracing::debug!(
            service = binding.service,
            program = %descriptor.command.program().display(),
            version = %descriptor.version,
            formats = %descriptor.formats.stringify(),
            "Registering renderer"
        );

        let service = CommandService::new(descriptor, pool.clone())
            .with_max_source_bytes(config.limits.max_source_bytes);
        registry.register(Arc::new(service));
    }

    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use diagramd_core::DiagramService;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    #[test]
    fn test_templates() {
        assert_eq!(GRAPHVIZ.template().args_for(FileFormat::Svg), vec!["-Tsvg"]);
        assert_eq!(PLANTUML.template().args_for(FileFormat::Txt), vec!["-pipe", "-ttxt"]);
        assert_eq!(ERD.template().args_for(FileFormat::Pdf), vec!["-f", "pdf"]);
        assert!(SVGBOB.template().args_for(FileFormat::Svg).is_empty());
    }

    #[test]
    fn test_every_binding_has_config() {
        let config = Config::default();
        for binding in BINDINGS {
            assert!(config.renderers.get(binding.command).is_some(), "{}", binding.command);
        }
    }

    #[test]
    fn test_descriptor_defaults_to_bare_command() {
        let config = Config::default();
        let descriptor = GRAPHVIZ.descriptor(&RendererConfig::default(), &config);

        assert_eq!(descriptor.name, "graphviz");
        assert_eq!(descriptor.command.program(), Path::new("dot"));
        assert_eq!(descriptor.formats.stringify(), "png, svg, jpeg");
        assert_eq!(descriptor.timeout, Duration::from_secs(15));
    }

    #[test]
    fn test_descriptor_applies_overrides() {
        let mut config = Config::default();
        config.limits.render_timeout_seconds = 3;
        let renderer = RendererConfig {
            bin_path: Some(PathBuf::from("/opt/plantuml/plantuml")),
            version: Some("1.2024.3".to_string()),
        };

        let descriptor = PLANTUML.descriptor(&renderer, &config);
        assert_eq!(descriptor.command.program(), Path::new("/opt/plantuml/plantuml"));
        assert_eq!(descriptor.version, "1.2024.3");
        assert_eq!(descriptor.timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_build_registry() {
        let mut config = Config::default();
        config.limits.max_source_bytes = 512;
        let registry = build_registry(&config);

        assert_eq!(registry.available(), "erd, graphviz, plantuml, svgbob");
        let erd = registry.get("erd").unwrap();
        assert!(erd.supported_formats().supports(FileFormat::Pdf));
        assert_eq!(erd.max_source_bytes(), 512);

        let svgbob = registry.get("svgbob").unwrap();
        assert!(svgbob.resolve_format("png").is_err());
    }
}
