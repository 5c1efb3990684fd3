//! Guest configuration compiler.
//!
//! Resolves a manifest into the constant set a guest kernel is compiled
//! against: memory layout, dimensions, quantization scales, and the schema
//! fingerprint the guest checks at runtime.

use std::path::PathBuf;

pub mod config;
pub mod render;

pub use config::{
    generate_guest_config, GuestConfig, GuestTemplate, ModelDims, TemplateParams,
};
pub use render::{render_config, write_guest_config};

#[derive(Debug, thiserror::Error)]
pub enum GuestError {
    #[error("failed to access {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Manifest(#[from] fb_manifest::ManifestError),
    #[error(transparent)]
    Schema(#[from] fb_manifest::SchemaError),
    #[error(transparent)]
    Resolve(#[from] fb_manifest::SchemaResolveError),
    #[error("{0}")]
    Config(String),
}

impl GuestError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        GuestError::Config(msg.into())
    }
}
