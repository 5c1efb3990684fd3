//! Input and output payloads for Frostbite guests.
//!
//! Packs JSON payloads into the byte layouts each schema family declares,
//! wraps them in the optional FBH1 envelope, builds and parses the FBM1
//! control block, and decodes result bytes back into numbers.

use std::path::PathBuf;

pub mod control;
pub mod envelope;
pub mod output;
pub mod pack;
mod value;

pub use control::{build_control_block, parse_control_block, ControlBlock};
pub use envelope::{
    crc32, pack_fbh1_header, pack_input, parse_fbh1_header, resolve_schema_hash, write_input,
    Fbh1Header, SchemaHashMode, FBH1_HEADER_LEN, FBH1_MAGIC, FBH1_VERSION, FBH_FLAG_HAS_CRC32,
    FBH_FLAG_HAS_SCHEMA_HASH,
};
pub use output::decode_output;
pub use pack::{load_payload_from_path, pack_payload, unpack_payload};

#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("failed to access {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse payload JSON")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Manifest(#[from] fb_manifest::ManifestError),
    #[error(transparent)]
    Schema(#[from] fb_manifest::SchemaError),
    #[error("{0}")]
    Input(String),
}

impl PayloadError {
    pub(crate) fn input(msg: impl Into<String>) -> Self {
        PayloadError::Input(msg.into())
    }
}
