//! diagramd server
//!
//! Wires configuration and renderer bindings into an [`HttpServer`].

pub mod config;
pub mod renderers;

pub use config::{Config, ConfigError, RendererConfig, CONFIG_PATH_ENV};
pub use renderers::{build_registry, RendererBinding, BINDINGS};

use diagramd_http::HttpServer;

/// Build a server for `config`
pub fn build_server(config: &Config) -> Result<HttpServer, ConfigError> {
    config.validate()?;
    let registry = build_registry(config);
    Ok(HttpServer::new(config.bind_address(), registry, config.http_options()?))
}
