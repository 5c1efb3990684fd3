use std::fs;
use std::path::{Path, PathBuf};

use toml::Table;
use tracing::debug;

use crate::model::Manifest;

/// Failure to load or parse a manifest file.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("failed to read manifest {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("manifest is not valid TOML")]
    Toml(#[from] toml::de::Error),
}

/// Parse manifest text into an untyped document view.
pub fn parse_manifest(text: &str) -> Result<Manifest, ManifestError> {
    let table: Table = text.parse()?;
    Ok(Manifest::from_table(table))
}

/// Load a manifest from disk.
pub fn load_manifest(path: &Path) -> Result<Manifest, ManifestError> {
    let text = fs::read_to_string(path).map_err(|source| ManifestError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), bytes = text.len(), "loaded manifest");
    parse_manifest(&text)
}
